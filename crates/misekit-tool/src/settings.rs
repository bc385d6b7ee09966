use std::time::Duration;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Read-only view of the settings the tool layer depends on. Values are read
/// on every call so that changes apply without rebuilding anything.
pub trait ToolSettings: Send + Sync {
    fn project_executable_path(&self) -> Option<String>;

    fn global_executable_path(&self) -> Option<String>;

    fn wsl_shell(&self) -> Option<String> {
        None
    }

    fn command_timeout(&self) -> Duration {
        DEFAULT_COMMAND_TIMEOUT
    }
}

/// Fixed settings, for embedding without a settings store.
#[derive(Debug, Clone, Default)]
pub struct StaticToolSettings {
    pub project_executable_path: Option<String>,
    pub global_executable_path: Option<String>,
    pub wsl_shell: Option<String>,
    pub command_timeout: Option<Duration>,
}

impl ToolSettings for StaticToolSettings {
    fn project_executable_path(&self) -> Option<String> {
        self.project_executable_path.clone()
    }

    fn global_executable_path(&self) -> Option<String> {
        self.global_executable_path.clone()
    }

    fn wsl_shell(&self) -> Option<String> {
        self.wsl_shell.clone()
    }

    fn command_timeout(&self) -> Duration {
        self.command_timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT)
    }
}
