//! Host platform helpers: execution contexts, WSL path translation and
//! per-user application directories.

mod commands;
mod environment;
mod paths;
mod translate;
mod wsl;

pub use commands::Unattended;
pub use environment::ExecutionContext;
pub use paths::{AppPaths, AppPathsError};
pub use translate::{
    NativePathMapper, PathTranslator, is_subsystem_path, looks_like_path, subsystem_distro,
};
pub use wsl::{WSLPATH_BATCH_SCRIPT, WslDistro, WslPathMap, detect_wsl_distros};
