use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use log::debug;
use regex::Regex;
use which::which;

use misekit_core::{ProcessRunner, ProcessSpec};
use misekit_platform::ExecutionContext;

use crate::diagnostics::clean_output;
use crate::launch::direct_spec;

/// Bare command name, used when nothing better is known.
pub const FALLBACK_COMMAND: &str = "mise";

const SHELL_QUERY_COMMAND: &str = "mise version -v";

static ARGS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)\bARGS:\s+(\S+)").expect("ARGS line pattern should compile")
});

static BINARY_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)((?:[A-Za-z]:)?[\\/][^\s:]*[\\/]mise(?:\.exe)?)(?:\s|$)")
        .expect("binary path pattern should compile")
});

const WSL_SEARCH_PATHS: &[&str] = &[
    "$HOME/.local/bin/mise",
    "$HOME/.local/share/mise/bin/mise",
    "$HOME/.cargo/bin/mise",
    "/home/linuxbrew/.linuxbrew/bin/mise",
    "/usr/local/bin/mise",
    "/usr/bin/mise",
];

/// Locates the `mise` binary for an execution context.
///
/// The login shell is asked first so that installs only visible through the
/// user's shell profile are found. Every candidate is confirmed by running it
/// directly before it is trusted.
#[derive(Clone)]
pub struct Detector {
    runner: Arc<dyn ProcessRunner>,
    search_paths: Option<Vec<String>>,
}

impl Detector {
    #[must_use]
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            search_paths: None,
        }
    }

    /// Replaces the per-platform candidate list.
    #[must_use]
    pub fn with_search_paths(mut self, paths: Vec<String>) -> Self {
        self.search_paths = Some(paths);
        self
    }

    pub async fn detect(&self, context: &ExecutionContext, timeout: Duration) -> Option<String> {
        if let Some(path) = self.query_shell(context, timeout).await {
            debug!("Found mise via {} shell: {path}", context.display_name());
            return Some(path);
        }

        for candidate in self.existing_candidates(context, timeout).await {
            if self.verify(context, &candidate, timeout).await {
                debug!("Found mise at well-known location: {candidate}");
                return Some(candidate);
            }
            debug!("Ignoring {candidate}: it did not answer `version`");
        }

        debug!("mise not found for {}", context.display_name());
        None
    }

    async fn query_shell(&self, context: &ExecutionContext, timeout: Duration) -> Option<String> {
        let (program, args) = context.shell_invocation(SHELL_QUERY_COMMAND);
        let spec = ProcessSpec::new(program, args, timeout);
        let output = match self.runner.run(&spec).await {
            Ok(output) => output,
            Err(error) => {
                debug!("mise shell query failed: {error}");
                return None;
            }
        };

        if !output.is_success() {
            debug!("mise shell query exited with {:?}", output.exit_code);
            return None;
        }

        let Some(path) = find_binary_path(&output.combined()) else {
            debug!("mise shell query output did not name a binary");
            return None;
        };

        if path == FALLBACK_COMMAND || self.verify(context, &path, timeout).await {
            Some(path)
        } else {
            debug!("Shell-reported path {path} failed direct verification");
            None
        }
    }

    async fn verify(&self, context: &ExecutionContext, path: &str, timeout: Duration) -> bool {
        let spec = direct_spec(
            context,
            &[path.to_string()],
            vec!["version".to_string()],
            None,
            timeout,
        );
        match self.runner.run(&spec).await {
            Ok(output) => output.is_success(),
            Err(error) => {
                debug!("Verification of {path} failed: {error}");
                false
            }
        }
    }

    async fn existing_candidates(&self, context: &ExecutionContext, timeout: Duration) -> Vec<String> {
        match context {
            ExecutionContext::Wsl { .. } => {
                let paths = self.search_paths.clone().unwrap_or_else(|| {
                    WSL_SEARCH_PATHS.iter().map(|path| (*path).to_string()).collect()
                });
                self.existing_in_subsystem(context, &paths, timeout).await
            }
            ExecutionContext::Native | ExecutionContext::Unix { .. } => {
                let paths = self.search_paths.clone().unwrap_or_else(host_search_paths);
                paths
                    .into_iter()
                    .filter(|path| is_executable_file(Path::new(path)))
                    .collect()
            }
        }
    }

    async fn existing_in_subsystem(
        &self,
        context: &ExecutionContext,
        paths: &[String],
        timeout: Duration,
    ) -> Vec<String> {
        if paths.is_empty() {
            return Vec::new();
        }

        let script = executable_filter_script(paths);
        let spec = direct_spec(
            context,
            &["sh".to_string()],
            vec!["-c".to_string(), script],
            None,
            timeout,
        );
        match self.runner.run(&spec).await {
            Ok(output) => output
                .stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(error) => {
                debug!("Listing WSL install locations failed: {error}");
                Vec::new()
            }
        }
    }
}

/// Extracts the binary path from `mise version -v` output. The debug line
/// `ARGS: <path> version -v` wins; otherwise any absolute path to a `mise`
/// binary is used.
#[must_use]
pub fn find_binary_path(output: &str) -> Option<String> {
    let cleaned = clean_output(output);
    if let Some(captures) = ARGS_LINE.captures(&cleaned) {
        return Some(captures[1].to_string());
    }
    BINARY_PATH
        .captures(&cleaned)
        .map(|captures| captures[1].to_string())
}

fn executable_filter_script(paths: &[String]) -> String {
    let quoted = paths
        .iter()
        .map(|path| format!("\"{}\"", path.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(" ");
    format!("for p in {quoted}; do [ -x \"$p\" ] && echo \"$p\"; done; true")
}

fn host_search_paths() -> Vec<String> {
    let mut paths: Vec<PathBuf> = Vec::new();

    if let Ok(path) = which(FALLBACK_COMMAND) {
        paths.push(path);
    }

    if let Some(home) = dirs::home_dir() {
        #[cfg(unix)]
        {
            paths.push(home.join(".local").join("bin").join("mise"));
            paths.push(home.join(".local").join("share").join("mise").join("bin").join("mise"));
            paths.push(home.join(".cargo").join("bin").join("mise"));
        }

        #[cfg(target_os = "windows")]
        {
            paths.push(home.join("scoop").join("shims").join("mise.exe"));
            paths.push(home.join(".cargo").join("bin").join("mise.exe"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/opt/homebrew/bin/mise"));
    }

    #[cfg(unix)]
    {
        paths.push(PathBuf::from("/home/linuxbrew/.linuxbrew/bin/mise"));
        paths.push(PathBuf::from("/usr/local/bin/mise"));
        paths.push(PathBuf::from("/usr/bin/mise"));
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            paths.push(local_app_data.join("mise").join("bin").join("mise.exe"));
            paths.push(
                local_app_data
                    .join("Microsoft")
                    .join("WinGet")
                    .join("Links")
                    .join("mise.exe"),
            );
        }
    }

    let mut unique: Vec<String> = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.to_string_lossy().to_string();
        if !unique.contains(&path) {
            unique.push(path);
        }
    }
    unique
}

fn is_executable_file(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}
