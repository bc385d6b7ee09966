use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use misekit_core::{
    CommandError, EventBus, InvalidationSignal, ProcessRunner, TokioProcessRunner, ToolVersion,
    normalize_config_environment,
};
use misekit_platform::AppPaths;
use misekit_tool::{
    CommandCache, CommandExecutor, ConfigFile, Detector, EnvVars, ExecutableLocation,
    ExecutableResolver, ExtendedEnvVar, InstalledTools, Operation, Task, parse_config_value,
    parse_json,
};

use crate::error::{ErrorPolicy, Notifier, SessionError};
use crate::orchestrator::{Orchestrator, ProgressHost, TokioProgressHost};
use crate::settings::{AppSettings, ProjectSettings, SettingsStore};

const EXECUTABLE_SIGNALS: &[InvalidationSignal] = &[InvalidationSignal::ExecutableChanged];
const CONFIG_SIGNALS: &[InvalidationSignal] = &[InvalidationSignal::ConfigFilesChanged];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
}

/// Keeps a listener registered; dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    token: CancellationToken,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[derive(Default)]
pub struct SessionBuilder {
    project_dir: Option<PathBuf>,
    app_settings_file: Option<PathBuf>,
    settings: Option<(AppSettings, ProjectSettings)>,
    runner: Option<Arc<dyn ProcessRunner>>,
    host: Option<Arc<dyn ProgressHost>>,
    notifier: Option<Arc<dyn Notifier>>,
    search_paths: Option<Vec<String>>,
}

impl SessionBuilder {
    #[must_use]
    pub fn project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    /// Persist global settings in `path`; project settings then live in the
    /// project directory.
    #[must_use]
    pub fn app_settings_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.app_settings_file = Some(path.into());
        self
    }

    /// Use in-memory settings instead of settings files.
    #[must_use]
    pub fn settings(mut self, app: AppSettings, project: ProjectSettings) -> Self {
        self.settings = Some((app, project));
        self
    }

    #[must_use]
    pub fn runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    #[must_use]
    pub fn progress_host(mut self, host: Arc<dyn ProgressHost>) -> Self {
        self.host = Some(host);
        self
    }

    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Replaces the well-known install locations checked during detection.
    #[must_use]
    pub fn search_paths(mut self, paths: Vec<String>) -> Self {
        self.search_paths = Some(paths);
        self
    }

    /// Wires the session and starts its listeners. Must be called inside a
    /// tokio runtime.
    #[must_use]
    pub fn build(self) -> Session {
        let project_dir = self
            .project_dir
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let bus = EventBus::new();

        let settings = Arc::new(match self.settings {
            Some((app, project)) => SettingsStore::new(app, project, bus.clone()),
            None => SettingsStore::load(
                self.app_settings_file,
                Some(ProjectSettings::file_in(&project_dir)),
                bus.clone(),
            ),
        });

        let runner = self
            .runner
            .unwrap_or_else(|| Arc::new(TokioProcessRunner));
        let detector = match self.search_paths {
            Some(paths) => Detector::new(runner.clone()).with_search_paths(paths),
            None => Detector::new(runner.clone()),
        };
        let resolver = Arc::new(ExecutableResolver::new(settings.clone(), detector, bus.clone()));
        let executor = Arc::new(CommandExecutor::new(resolver.clone(), runner, settings.clone()));
        let commands = CommandCache::new(executor, bus.clone());

        let shutdown = CancellationToken::new();
        let listeners = vec![
            resolver.spawn_listener(shutdown.clone()),
            commands.spawn_listener(shutdown.clone()),
        ];

        info!("mise session started for {}", project_dir.display());
        Session {
            project_dir,
            bus,
            settings,
            resolver,
            commands,
            orchestrator: Orchestrator::new(
                self.host
                    .unwrap_or_else(|| Arc::new(TokioProgressHost::default())),
            ),
            errors: self.notifier.map(ErrorPolicy::new).unwrap_or_default(),
            shutdown,
            listeners: Mutex::new(listeners),
        }
    }
}

/// Everything one workspace needs to talk to `mise`: settings, resolver,
/// executor, command cache and their listeners. Torn down by
/// [`Session::shutdown`] or on drop.
pub struct Session {
    project_dir: PathBuf,
    bus: EventBus,
    settings: Arc<SettingsStore>,
    resolver: Arc<ExecutableResolver>,
    commands: CommandCache,
    orchestrator: Orchestrator,
    errors: ErrorPolicy,
    shutdown: CancellationToken,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Session for `project_dir` with global settings in the per-user
    /// config directory.
    pub fn for_project(project_dir: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let paths = AppPaths::new()?;
        paths.ensure_dirs()?;
        Ok(Self::builder()
            .project_dir(project_dir)
            .app_settings_file(paths.settings_file())
            .build())
    }

    #[must_use]
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    #[must_use]
    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    #[must_use]
    pub fn commands(&self) -> &CommandCache {
        &self.commands
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Path or command used to launch `mise` for the project directory.
    pub async fn resolve_executable_path(&self) -> String {
        self.resolve_executable(&self.project_dir_string()).await.command
    }

    pub async fn resolve_executable(&self, working_dir: &str) -> ExecutableLocation {
        self.resolver.resolve(working_dir).await
    }

    /// Runs `operation`, answering from the cache when possible. Without an
    /// explicit (non-blank) config environment the configured one is used.
    pub async fn run_and_cache(
        &self,
        operation: Operation,
        working_dir: &str,
        config_environment: Option<&str>,
    ) -> Result<String, CommandError> {
        let config_environment = normalize_config_environment(config_environment)
            .or_else(|| self.settings.config_environment());

        if !operation.is_cacheable() {
            return self
                .commands
                .run(&operation, working_dir, config_environment.as_deref())
                .await;
        }

        let label = format!("Running mise {}", operation.name());
        let commands = self.commands.clone();
        let (pending, pending_dir, pending_environment) = (
            operation.clone(),
            working_dir.to_string(),
            config_environment.clone(),
        );
        self.orchestrator
            .run(
                &label,
                || {
                    self.commands
                        .cached(&operation, working_dir, config_environment.as_deref())
                },
                move || async move {
                    commands
                        .run(&pending, &pending_dir, pending_environment.as_deref())
                        .await
                },
            )
            .await
    }

    pub async fn run_typed<T: DeserializeOwned>(
        &self,
        operation: Operation,
        working_dir: &str,
    ) -> Result<T, CommandError> {
        let stdout = self
            .run_and_cache(operation.clone(), working_dir, None)
            .await?;
        parse_json(&operation, &stdout)
    }

    pub async fn version(&self, working_dir: &str) -> Result<ToolVersion, CommandError> {
        let stdout = self
            .run_and_cache(Operation::Version, working_dir, None)
            .await?;
        Ok(ToolVersion::parse_lenient(&stdout))
    }

    pub async fn env(&self, working_dir: &str) -> Result<EnvVars, CommandError> {
        self.run_typed(Operation::Env, working_dir).await
    }

    pub async fn env_extended(
        &self,
        working_dir: &str,
    ) -> Result<BTreeMap<String, ExtendedEnvVar>, CommandError> {
        self.run_typed(Operation::EnvExtended, working_dir).await
    }

    pub async fn installed_tools(&self, working_dir: &str) -> Result<InstalledTools, CommandError> {
        self.run_typed(Operation::InstalledTools, working_dir).await
    }

    pub async fn tasks(&self, working_dir: &str) -> Result<Vec<Task>, CommandError> {
        self.run_typed(Operation::Tasks, working_dir).await
    }

    pub async fn config_files(&self, working_dir: &str) -> Result<Vec<ConfigFile>, CommandError> {
        self.run_typed(Operation::ConfigFiles, working_dir).await
    }

    pub async fn config_get(&self, working_dir: &str, key: &str) -> Result<Option<String>, CommandError> {
        let operation = Operation::ConfigGet {
            key: key.to_string(),
        };
        let stdout = self.run_and_cache(operation, working_dir, None).await?;
        Ok(parse_config_value(&stdout))
    }

    pub async fn exec(&self, working_dir: &str, argv: Vec<String>) -> Result<String, CommandError> {
        self.run_and_cache(Operation::Exec { argv }, working_dir, None)
            .await
    }

    pub async fn trust(&self, working_dir: &str, path: &str) -> Result<(), CommandError> {
        self.commands.trust(working_dir, path).await
    }

    /// Drops every cached result and detection, then re-warms in the
    /// background.
    pub fn invalidate(&self) {
        self.resolver.invalidate();
        self.commands.executor().invalidate_versions();
        self.commands.invalidate_all();

        let commands = self.commands.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {}
                () = commands.warm() => {}
            }
        });
    }

    /// Calls `listener` after the resolved executable changed.
    pub fn on_executable_changed(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.subscribe(EXECUTABLE_SIGNALS, listener)
    }

    /// Calls `listener` after a tool config file changed.
    pub fn on_config_changed(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.subscribe(CONFIG_SIGNALS, listener)
    }

    /// Feeds a file-system event from the host. Returns true when it
    /// invalidated anything.
    pub fn on_file_event(&self, path: &str, kind: FileEventKind) -> bool {
        if kind != FileEventKind::Created && self.resolver.handle_file_change(path) {
            self.commands.executor().invalidate_versions();
            self.commands.invalidate_all();
            return true;
        }

        if is_config_file(path) {
            debug!("Config file {kind:?}: {path}");
            self.commands.invalidate_all();
            self.bus.publish(InvalidationSignal::ConfigFilesChanged);
            return true;
        }
        false
    }

    /// Routes `error` to the user unless it is an expected state.
    pub fn report(&self, action: &str, error: &CommandError) -> bool {
        self.errors.report(action, error)
    }

    /// Stops every listener and waits for them to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let listeners = std::mem::take(
            &mut *self
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for listener in listeners {
            if let Err(error) = listener.await {
                debug!("Session listener ended abnormally: {error}");
            }
        }
        info!("mise session for {} shut down", self.project_dir.display());
    }

    fn subscribe(
        &self,
        signals: &'static [InvalidationSignal],
        listener: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        let token = self.shutdown.child_token();
        let cancelled = token.clone();
        let mut subscriber = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    delivery = subscriber.recv() => match delivery {
                        Some(delivery) if delivery.affects(signals) => listener(),
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        });
        Subscription { token }
    }

    fn project_dir_string(&self) -> String {
        self.project_dir.to_string_lossy().to_string()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Whether `path` names a file `mise` reads configuration from.
#[must_use]
pub fn is_config_file(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    let mut components = normalized.rsplit('/');
    let name = components.next().unwrap_or_default();
    let parent = components.next().unwrap_or_default();

    match name {
        "mise.toml" | ".mise.toml" | "mise.local.toml" | ".mise.local.toml" | ".tool-versions" => {
            true
        }
        "config.toml" | "config.local.toml" => matches!(parent, "mise" | ".mise"),
        _ => name
            .strip_prefix('.')
            .unwrap_or(name)
            .strip_prefix("mise.")
            .and_then(|rest| rest.strip_suffix(".toml"))
            .is_some_and(|environment| !environment.is_empty()),
    }
}
