use std::path::{Path, PathBuf};

use thiserror::Error;

const APP_DIR: &str = "misekit";
const PROJECT_DIR: &str = ".misekit";
const SETTINGS_FILE: &str = "settings.json";
const LOG_FILE: &str = "debug.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AppPathsError {
    #[error("Could not determine the user config directory")]
    ConfigDirUnavailable,
    #[error("Could not determine the user log directory")]
    LogDirUnavailable,
}

/// Per-user locations for global settings and the debug log.
///
/// Command results only live in memory, so nothing else is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl AppPaths {
    /// Locations for the current user on this platform.
    ///
    /// # Errors
    /// Returns an error when the platform reports no config or log base
    /// directory (for example when `HOME` is unset).
    pub fn new() -> Result<Self, AppPathsError> {
        let config_base = dirs::config_dir().ok_or(AppPathsError::ConfigDirUnavailable)?;
        let log_base = log_base_dir().ok_or(AppPathsError::LogDirUnavailable)?;
        Ok(Self::under(&config_base, &log_base))
    }

    #[must_use]
    pub fn under(config_base: &Path, log_base: &Path) -> Self {
        Self {
            config_dir: config_base.join(APP_DIR),
            log_dir: log_base.join(APP_DIR),
        }
    }

    #[must_use]
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join(SETTINGS_FILE)
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join(LOG_FILE)
    }

    /// Project-scoped settings, kept inside the project itself.
    #[must_use]
    pub fn project_settings_file(project_dir: &Path) -> PathBuf {
        project_dir.join(PROJECT_DIR).join(SETTINGS_FILE)
    }

    /// # Errors
    /// Returns an error if a directory cannot be created.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.log_dir)
    }
}

#[cfg(target_os = "macos")]
fn log_base_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join("Library/Logs"))
}

#[cfg(not(target_os = "macos"))]
fn log_base_dir() -> Option<PathBuf> {
    dirs::data_local_dir()
}
