//! Running `mise` on behalf of editor integrations: locating the binary,
//! building version-appropriate command lines, decoding typed output and
//! caching results per operation and context.

mod command_cache;
mod detection;
mod diagnostics;
mod dialect;
mod executor;
mod launch;
mod operations;
mod resolver;
mod settings;

#[cfg(test)]
mod testing;

pub use command_cache::{CommandCache, CommandResult, InvocationContext, MAX_WARM_CONTEXTS};
pub use detection::{Detector, FALLBACK_COMMAND, find_binary_path};
pub use diagnostics::{classify_failure, clean_output, parse_tool_error};
pub use dialect::{ENV_FLAG_SINCE, build_args, config_environment_args};
pub use executor::CommandExecutor;
pub use launch::split_command;
pub use operations::{
    ConfigFile, EnvVars, ExtendedEnvVar, InstalledTool, InstalledTools, Operation, Task,
    ToolSource, parse_config_value, parse_json,
};
pub use resolver::{ExecutableLocation, ExecutableResolver, ExecutableSource};
pub use settings::{DEFAULT_COMMAND_TIMEOUT, StaticToolSettings, ToolSettings};
