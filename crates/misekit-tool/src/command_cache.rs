use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use misekit_core::{
    CacheKey, CommandError, EventBus, InvalidationSignal, InvocationRequest, SingleFlightCache,
    ToolVersion, normalize_config_environment,
};

use crate::executor::CommandExecutor;
use crate::operations::{
    ConfigFile, EnvVars, ExtendedEnvVar, InstalledTools, Operation, Task, parse_config_value,
    parse_json,
};

pub type CommandResult = Result<String, CommandError>;

/// A working directory plus the config environment requested for it.
pub type InvocationContext = (String, Option<String>);

/// Contexts re-warmed after an invalidation; older ones are forgotten.
pub const MAX_WARM_CONTEXTS: usize = 8;

const INVALIDATING: [InvalidationSignal; 2] = [
    InvalidationSignal::ConfigFilesChanged,
    InvalidationSignal::ExecutableChanged,
];

/// Caches raw `mise` output per operation and context.
///
/// Failures are cached as well, except timeouts and cancellations, which are
/// retried on the next request.
#[derive(Clone)]
pub struct CommandCache {
    executor: Arc<CommandExecutor>,
    cache: SingleFlightCache<CacheKey, CommandResult>,
    contexts: Arc<Mutex<VecDeque<InvocationContext>>>,
    bus: EventBus,
}

impl CommandCache {
    #[must_use]
    pub fn new(executor: Arc<CommandExecutor>, bus: EventBus) -> Self {
        Self {
            executor,
            cache: SingleFlightCache::new(),
            contexts: Arc::new(Mutex::new(VecDeque::new())),
            bus,
        }
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<CommandExecutor> {
        &self.executor
    }

    #[must_use]
    pub fn entries(&self) -> &SingleFlightCache<CacheKey, CommandResult> {
        &self.cache
    }

    /// Cached result for the operation, if one is present and still usable.
    #[must_use]
    pub fn cached(
        &self,
        operation: &Operation,
        working_dir: &str,
        config_environment: Option<&str>,
    ) -> Option<CommandResult> {
        if !operation.is_cacheable() {
            return None;
        }
        let config_environment = normalize_config_environment(config_environment);
        self.cache
            .peek(&operation.cache_key(working_dir, config_environment.as_deref()))
            .filter(is_reusable)
    }

    /// Runs the operation, answering from the cache when possible.
    pub async fn run(
        &self,
        operation: &Operation,
        working_dir: &str,
        config_environment: Option<&str>,
    ) -> CommandResult {
        let request = InvocationRequest::new(working_dir, operation.args())
            .with_config_environment(config_environment);

        if !operation.is_cacheable() {
            let result = self.executor.run(&request).await;
            if matches!(operation, Operation::Trust { .. }) && result.is_ok() {
                info!("Trusted config in {working_dir}");
                self.bus.publish(InvalidationSignal::ConfigFilesChanged);
            }
            return result;
        }

        let config_environment = request.config_environment.clone();
        self.remember_context(working_dir, config_environment.clone());
        let key = operation.cache_key(working_dir, config_environment.as_deref());
        self.cache
            .get_validated(key, || async { self.executor.run(&request).await }, is_reusable)
            .await
    }

    pub async fn version(&self, working_dir: &str) -> Result<ToolVersion, CommandError> {
        let stdout = self.run(&Operation::Version, working_dir, None).await?;
        Ok(ToolVersion::parse_lenient(&stdout))
    }

    pub async fn env(
        &self,
        working_dir: &str,
        config_environment: Option<&str>,
    ) -> Result<EnvVars, CommandError> {
        self.run_json(&Operation::Env, working_dir, config_environment)
            .await
    }

    pub async fn env_extended(
        &self,
        working_dir: &str,
        config_environment: Option<&str>,
    ) -> Result<BTreeMap<String, ExtendedEnvVar>, CommandError> {
        self.run_json(&Operation::EnvExtended, working_dir, config_environment)
            .await
    }

    pub async fn installed_tools(
        &self,
        working_dir: &str,
        config_environment: Option<&str>,
    ) -> Result<InstalledTools, CommandError> {
        self.run_json(&Operation::InstalledTools, working_dir, config_environment)
            .await
    }

    pub async fn tasks(
        &self,
        working_dir: &str,
        config_environment: Option<&str>,
    ) -> Result<Vec<Task>, CommandError> {
        self.run_json(&Operation::Tasks, working_dir, config_environment)
            .await
    }

    pub async fn config_files(
        &self,
        working_dir: &str,
        config_environment: Option<&str>,
    ) -> Result<Vec<ConfigFile>, CommandError> {
        self.run_json(&Operation::ConfigFiles, working_dir, config_environment)
            .await
    }

    pub async fn config_get(
        &self,
        working_dir: &str,
        config_environment: Option<&str>,
        key: &str,
    ) -> Result<Option<String>, CommandError> {
        let operation = Operation::ConfigGet {
            key: key.to_string(),
        };
        let stdout = self
            .run(&operation, working_dir, config_environment)
            .await?;
        Ok(parse_config_value(&stdout))
    }

    /// `mise exec -- <argv>`; never cached.
    pub async fn exec(
        &self,
        working_dir: &str,
        config_environment: Option<&str>,
        argv: Vec<String>,
    ) -> CommandResult {
        self.run(&Operation::Exec { argv }, working_dir, config_environment)
            .await
    }

    /// `mise trust <path>`; publishes `ConfigFilesChanged` on success.
    pub async fn trust(&self, working_dir: &str, path: &str) -> Result<(), CommandError> {
        let operation = Operation::Trust {
            path: path.to_string(),
        };
        self.run(&operation, working_dir, None).await.map(|_| ())
    }

    pub fn invalidate_all(&self) {
        debug!("Invalidating {} cached mise result(s)", self.cache.len());
        self.cache.invalidate_all();
    }

    /// The most recently requested contexts, newest first.
    #[must_use]
    pub fn contexts(&self) -> Vec<InvocationContext> {
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .cloned()
            .collect()
    }

    /// Re-runs the hot operations for every known context. Failures are
    /// logged and otherwise ignored.
    pub async fn warm(&self) {
        for (working_dir, config_environment) in self.contexts() {
            for operation in Operation::HOT {
                match self
                    .run(&operation, &working_dir, config_environment.as_deref())
                    .await
                {
                    Ok(_) => debug!("Warmed {} for {working_dir}", operation.name()),
                    Err(error @ CommandError::ExecutableNotFound { .. }) => {
                        debug!("Skipping warm-up of {}: {error}", operation.name());
                    }
                    Err(error) => {
                        warn!("Warm-up of {} for {working_dir} failed: {error}", operation.name());
                    }
                }
            }
        }
    }

    /// Drops everything on config or executable changes, then warms the hot
    /// operations in the background.
    pub fn spawn_listener(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut subscriber = self.bus.subscribe();
        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    delivery = subscriber.recv() => match delivery {
                        Some(delivery) if delivery.affects(&INVALIDATING) => {
                            debug!("Command cache received {delivery:?}");
                            if delivery.affects(&[InvalidationSignal::ExecutableChanged]) {
                                cache.executor.invalidate_versions();
                            }
                            cache.invalidate_all();
                            let warmer = cache.clone();
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                tokio::select! {
                                    () = shutdown.cancelled() => {}
                                    () = warmer.warm() => {}
                                }
                            });
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
            debug!("Command cache listener stopped");
        })
    }

    async fn run_json<T: serde::de::DeserializeOwned>(
        &self,
        operation: &Operation,
        working_dir: &str,
        config_environment: Option<&str>,
    ) -> Result<T, CommandError> {
        let stdout = self
            .run(operation, working_dir, config_environment)
            .await?;
        parse_json(operation, &stdout)
    }

    fn remember_context(&self, working_dir: &str, config_environment: Option<String>) {
        let context = (working_dir.to_string(), config_environment);
        let mut contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
        if contexts.back() == Some(&context) {
            return;
        }
        contexts.retain(|known| *known != context);
        contexts.push_back(context);
        if contexts.len() > MAX_WARM_CONTEXTS {
            contexts.pop_front();
        }
    }
}

fn is_reusable(result: &CommandResult) -> bool {
    !matches!(
        result,
        Err(CommandError::TimedOut { .. } | CommandError::Cancelled)
    )
}
