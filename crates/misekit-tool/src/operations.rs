use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use misekit_core::{CacheKey, CommandError};

/// The `mise` subcommands this crate knows how to run and decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Version,
    Env,
    EnvExtended,
    InstalledTools,
    Tasks,
    ConfigGet { key: String },
    ConfigFiles,
    Exec { argv: Vec<String> },
    Trust { path: String },
}

impl Operation {
    /// Operations re-run after every invalidation.
    pub const HOT: [Operation; 2] = [Operation::Env, Operation::InstalledTools];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Version => "version",
            Operation::Env => "env",
            Operation::EnvExtended => "env-extended",
            Operation::InstalledTools => "installed-tools",
            Operation::Tasks => "tasks",
            Operation::ConfigGet { .. } => "config-get",
            Operation::ConfigFiles => "config-files",
            Operation::Exec { .. } => "exec",
            Operation::Trust { .. } => "trust",
        }
    }

    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let fixed: &[&str] = match self {
            Operation::Version => &["version"],
            Operation::Env => &["env", "--json"],
            Operation::EnvExtended => &["env", "--json-extended"],
            Operation::InstalledTools => &["ls", "--current", "--json"],
            Operation::Tasks => &["tasks", "ls", "--json"],
            Operation::ConfigFiles => &["config", "ls", "--json"],
            Operation::ConfigGet { key } => {
                return vec!["config".to_string(), "get".to_string(), key.clone()];
            }
            Operation::Exec { argv } => {
                return ["exec".to_string(), "--".to_string()]
                    .into_iter()
                    .chain(argv.iter().cloned())
                    .collect();
            }
            Operation::Trust { path } => return vec!["trust".to_string(), path.clone()],
        };
        fixed.iter().map(|arg| (*arg).to_string()).collect()
    }

    /// `exec` and `trust` change state and always run.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, Operation::Exec { .. } | Operation::Trust { .. })
    }

    #[must_use]
    pub fn cache_key(&self, working_dir: &str, config_environment: Option<&str>) -> CacheKey {
        let key = CacheKey::new(
            self.name(),
            working_dir,
            config_environment.map(str::to_string),
        );
        match self {
            Operation::ConfigGet { key: name } => key.with_extra([name.clone()]),
            _ => key,
        }
    }
}

/// `mise env --json`
pub type EnvVars = BTreeMap<String, String>;

/// One entry of `mise env --json-extended`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtendedEnvVar {
    pub value: String,
    pub source: Option<String>,
    pub tool: Option<String>,
    pub redacted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
}

/// One installed version from `mise ls --current --json`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstalledTool {
    pub version: String,
    pub requested_version: Option<String>,
    pub install_path: Option<String>,
    pub source: Option<ToolSource>,
    pub installed: bool,
    pub active: bool,
}

pub type InstalledTools = BTreeMap<String, Vec<InstalledTool>>;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    pub name: String,
    pub aliases: Vec<String>,
    pub description: String,
    pub source: String,
    pub depends: Vec<String>,
    pub hide: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub path: String,
    pub tools: Vec<String>,
}

pub fn parse_json<T: DeserializeOwned>(operation: &Operation, stdout: &str) -> Result<T, CommandError> {
    serde_json::from_str(stdout).map_err(|error| CommandError::output_parse(operation.name(), error))
}

/// `mise config get` prints a bare value; an empty line means unset.
#[must_use]
pub fn parse_config_value(stdout: &str) -> Option<String> {
    let value = stdout.trim();
    (!value.is_empty()).then(|| value.to_string())
}
