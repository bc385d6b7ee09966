use std::fmt;

/// A single tool invocation: where to run it, which config environment to
/// activate, and the subcommand arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub working_dir: String,
    pub config_environment: Option<String>,
    pub args: Vec<String>,
}

impl InvocationRequest {
    pub fn new<I, S>(working_dir: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            working_dir: working_dir.into(),
            config_environment: None,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Blank environment names are treated as "no environment".
    #[must_use]
    pub fn with_config_environment(mut self, config_environment: Option<&str>) -> Self {
        self.config_environment = normalize_config_environment(config_environment);
        self
    }
}

/// Trims a config environment name; a blank name means "no environment".
#[must_use]
pub fn normalize_config_environment(name: Option<&str>) -> Option<String> {
    name.map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Identity of a cached command result.
///
/// Compared exactly: working directories that differ only in case or a
/// trailing separator are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub operation: String,
    pub working_dir: String,
    pub config_environment: Option<String>,
    pub extra: Vec<String>,
}

impl CacheKey {
    pub fn new(
        operation: impl Into<String>,
        working_dir: impl Into<String>,
        config_environment: Option<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            working_dir: working_dir.into(),
            config_environment,
            extra: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_extra(mut self, extra: impl IntoIterator<Item = String>) -> Self {
        self.extra.extend(extra);
        self
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}[{}]",
            self.operation,
            self.working_dir,
            self.config_environment.as_deref().unwrap_or("-")
        )?;
        if !self.extra.is_empty() {
            write!(f, " {}", self.extra.join(" "))?;
        }
        Ok(())
    }
}
