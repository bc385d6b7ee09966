use std::fmt;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use misekit_core::{Delivery, EventBus, InvalidationSignal, SingleFlightCache};
use misekit_platform::{ExecutionContext, PathTranslator};

use crate::detection::{Detector, FALLBACK_COMMAND};
use crate::settings::ToolSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutableSource {
    ProjectOverride,
    GlobalOverride,
    AutoDetected,
    /// Nothing configured or detected; the bare command name is used and the
    /// search path decides at launch time.
    Fallback,
}

impl fmt::Display for ExecutableSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutableSource::ProjectOverride => "project setting",
            ExecutableSource::GlobalOverride => "global setting",
            ExecutableSource::AutoDetected => "auto-detected",
            ExecutableSource::Fallback => "search path",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutableLocation {
    pub command: String,
    pub source: ExecutableSource,
    pub context: ExecutionContext,
}

/// Decides which `mise` to run: project override, then global override, then
/// the auto-detected binary, then the bare command name.
///
/// Overrides are read on every call. Detection results are cached per
/// execution context until settings change or the binary itself changes.
pub struct ExecutableResolver {
    settings: Arc<dyn ToolSettings>,
    detector: Detector,
    detected: SingleFlightCache<ExecutionContext, Option<String>>,
    bus: EventBus,
}

impl ExecutableResolver {
    #[must_use]
    pub fn new(settings: Arc<dyn ToolSettings>, detector: Detector, bus: EventBus) -> Self {
        Self {
            settings,
            detector,
            detected: SingleFlightCache::new(),
            bus,
        }
    }

    #[must_use]
    pub fn context_for(&self, working_dir: &str) -> ExecutionContext {
        ExecutionContext::detect(working_dir, self.settings.wsl_shell().as_deref())
    }

    pub async fn resolve(&self, working_dir: &str) -> ExecutableLocation {
        let context = self.context_for(working_dir);

        if let Some(command) = non_blank(self.settings.project_executable_path()) {
            return ExecutableLocation {
                command,
                source: ExecutableSource::ProjectOverride,
                context,
            };
        }

        if let Some(command) = non_blank(self.settings.global_executable_path()) {
            return ExecutableLocation {
                command,
                source: ExecutableSource::GlobalOverride,
                context,
            };
        }

        let timeout = self.settings.command_timeout();
        let detected = self
            .detected
            .get(context.clone(), || async {
                self.detector.detect(&context, timeout).await
            })
            .await;

        match detected {
            Some(command) => ExecutableLocation {
                command,
                source: ExecutableSource::AutoDetected,
                context,
            },
            None => ExecutableLocation {
                command: FALLBACK_COMMAND.to_string(),
                source: ExecutableSource::Fallback,
                context,
            },
        }
    }

    pub async fn resolve_executable_path(&self, working_dir: &str) -> String {
        self.resolve(working_dir).await.command
    }

    /// Forgets every detection result.
    pub fn invalidate(&self) {
        self.detected.invalidate_all();
    }

    /// Reacts to a modification or deletion of `path`. Returns true when it
    /// was a configured or detected executable, in which case resolution is
    /// reset and `ExecutableChanged` published.
    pub fn handle_file_change(&self, path: &str) -> bool {
        let affected = self
            .watched_paths()
            .iter()
            .any(|watched| Path::new(watched) == Path::new(path));
        if affected {
            info!("mise executable changed on disk: {path}");
            self.reset();
        }
        affected
    }

    /// Host paths of every executable the resolver currently depends on.
    #[must_use]
    pub fn watched_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = [
            self.settings.project_executable_path(),
            self.settings.global_executable_path(),
        ]
        .into_iter()
        .filter_map(non_blank)
        .collect();

        for context in self.detected.keys() {
            let Some(Some(detected)) = self.detected.peek(&context) else {
                continue;
            };
            if let ExecutionContext::Wsl { distro, .. } = &context {
                paths.push(PathTranslator::new(distro.as_str()).to_native_from_subsystem(&detected));
            }
            paths.push(detected);
        }
        paths
    }

    /// Resets resolution whenever settings change.
    pub fn spawn_listener(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut subscriber = self.bus.subscribe();
        let resolver = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    delivery = subscriber.recv() => match delivery {
                        Some(delivery) if delivery.affects(&[InvalidationSignal::SettingsChanged]) => {
                            if let Delivery::Signal(signal) = delivery {
                                debug!("Resolver received {signal:?}");
                            }
                            resolver.reset();
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
            debug!("Resolver listener stopped");
        })
    }

    fn reset(&self) {
        self.invalidate();
        self.bus.publish(InvalidationSignal::ExecutableChanged);
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
