//! Session-scoped access to `mise` for editor integrations.
//!
//! A [`Session`] owns the settings, executable resolver, command cache and
//! invalidation listeners for one workspace. Integrations ask it for the
//! executable path or for typed command results; lookups run in the scope
//! the caller's thread allows (see [`orchestrator`]).

pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod session;
pub mod settings;

pub use error::{ErrorPolicy, LogNotifier, Notifier, SessionError};
pub use orchestrator::{CallerContext, Dispatch, Orchestrator, ProgressHost, TokioProgressHost};
pub use session::{FileEventKind, Session, SessionBuilder, Subscription, is_config_file};
pub use settings::{AppSettings, ProjectSettings, SettingsStore};

pub use misekit_core::{CommandError, InvalidationSignal, ToolErrorKind, ToolVersion};
pub use misekit_tool::{
    ConfigFile, EnvVars, ExecutableLocation, ExecutableSource, ExtendedEnvVar, InstalledTool,
    InstalledTools, Operation, Task,
};
