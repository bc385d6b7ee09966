use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use misekit_core::{EventBus, InvalidationSignal, normalize_config_environment};
use misekit_platform::AppPaths;
use misekit_tool::ToolSettings;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub executable_path: Option<String>,

    #[serde(default)]
    pub config_environment: Option<String>,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,

    #[serde(default)]
    pub wsl_shell: Option<String>,
}

fn default_command_timeout() -> u64 {
    5
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            executable_path: None,
            config_environment: None,
            command_timeout_secs: default_command_timeout(),
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
            wsl_shell: None,
        }
    }
}

/// Per-project overrides; set values win over [`AppSettings`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default)]
    pub executable_path: Option<String>,

    #[serde(default)]
    pub config_environment: Option<String>,
}

impl ProjectSettings {
    #[must_use]
    pub fn file_in(project_dir: &Path) -> PathBuf {
        AppPaths::project_settings_file(project_dir)
    }
}

/// Both settings scopes for one session. Every change publishes
/// `SettingsChanged` on the session bus.
#[derive(Debug)]
pub struct SettingsStore {
    app: RwLock<AppSettings>,
    project: RwLock<ProjectSettings>,
    app_file: Option<PathBuf>,
    project_file: Option<PathBuf>,
    bus: EventBus,
}

impl SettingsStore {
    /// In-memory store, nothing is persisted.
    #[must_use]
    pub fn new(app: AppSettings, project: ProjectSettings, bus: EventBus) -> Self {
        Self {
            app: RwLock::new(app),
            project: RwLock::new(project),
            app_file: None,
            project_file: None,
            bus,
        }
    }

    /// Loads both scopes; a missing or unreadable file yields defaults.
    #[must_use]
    pub fn load(app_file: Option<PathBuf>, project_file: Option<PathBuf>, bus: EventBus) -> Self {
        let app = app_file.as_deref().map(load_json).unwrap_or_default();
        let project = project_file.as_deref().map(load_json).unwrap_or_default();
        Self {
            app: RwLock::new(app),
            project: RwLock::new(project),
            app_file,
            project_file,
            bus,
        }
    }

    #[must_use]
    pub fn app(&self) -> AppSettings {
        self.app
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn project(&self) -> ProjectSettings {
        self.project
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies `change` to the global settings and persists them.
    pub fn update_app(&self, change: impl FnOnce(&mut AppSettings)) -> std::io::Result<()> {
        let updated = {
            let mut app = self.app.write().unwrap_or_else(PoisonError::into_inner);
            let before = app.clone();
            change(&mut app);
            (*app != before).then(|| app.clone())
        };
        self.commit(updated, self.app_file.as_deref())
    }

    /// Applies `change` to the project settings and persists them.
    pub fn update_project(&self, change: impl FnOnce(&mut ProjectSettings)) -> std::io::Result<()> {
        let updated = {
            let mut project = self.project.write().unwrap_or_else(PoisonError::into_inner);
            let before = project.clone();
            change(&mut project);
            (*project != before).then(|| project.clone())
        };
        self.commit(updated, self.project_file.as_deref())
    }

    /// Config environment to use when a caller does not name one.
    #[must_use]
    pub fn config_environment(&self) -> Option<String> {
        normalize_config_environment(self.project().config_environment.as_deref())
            .or_else(|| normalize_config_environment(self.app().config_environment.as_deref()))
    }

    fn commit<T: Serialize>(&self, updated: Option<T>, file: Option<&Path>) -> std::io::Result<()> {
        let Some(updated) = updated else {
            return Ok(());
        };
        self.bus.publish(InvalidationSignal::SettingsChanged);
        match file {
            Some(path) => save_json(path, &updated),
            None => Ok(()),
        }
    }
}

impl ToolSettings for SettingsStore {
    fn project_executable_path(&self) -> Option<String> {
        self.project().executable_path
    }

    fn global_executable_path(&self) -> Option<String> {
        self.app().executable_path
    }

    fn wsl_shell(&self) -> Option<String> {
        non_blank(self.app().wsl_shell)
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.app().command_timeout_secs.max(1))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn load_json<T: DeserializeOwned + Default>(path: &Path) -> T {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|error| {
            debug!("Ignoring unreadable settings in {}: {error}", path.display());
            T::default()
        }),
        Err(error) => {
            debug!("No settings at {}: {error}", path.display());
            T::default()
        }
    }
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let content = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &content)?;
    info!("Saved settings to {}", path.display());
    Ok(())
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "settings path has no parent")
    })?;
    std::fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("settings");
    let tmp_path = parent.join(format!(".{file_name}.{}.tmp", std::process::id()));

    let written = std::fs::File::create(&tmp_path).and_then(|mut file| {
        file.write_all(data)?;
        file.sync_all()
    });
    if let Err(error) = written.and_then(|()| std::fs::rename(&tmp_path, path)) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(error);
    }
    Ok(())
}
