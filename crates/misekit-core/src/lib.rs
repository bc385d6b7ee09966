//! Shared building blocks for invoking `mise`: the version model, the error
//! taxonomy, the single-flight cache, the invalidation bus and the process
//! runner seam.

mod cache;
mod error;
mod events;
mod runner;
mod types;
mod version;

pub use cache::{CacheEntry, SingleFlightCache};
pub use error::{CommandError, ToolErrorKind};
pub use events::{Delivery, EventBus, InvalidationSignal, Subscriber};
pub use runner::{ProcessOutput, ProcessRunner, ProcessSpec, RunError, TokioProcessRunner};
pub use types::{CacheKey, InvocationRequest, normalize_config_environment};
pub use version::{ToolVersion, VersionComponent, VersionParseError};
