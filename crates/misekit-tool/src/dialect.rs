use misekit_core::ToolVersion;

/// First release that accepts `--env`; older releases only know `--profile`.
pub const ENV_FLAG_SINCE: ToolVersion = ToolVersion::new(2024, 12, 2);

/// Flag pair that activates the named config environment for `version`.
#[must_use]
pub fn config_environment_args(version: ToolVersion, name: &str) -> [String; 2] {
    let flag = if version >= ENV_FLAG_SINCE {
        "--env"
    } else {
        "--profile"
    };
    [flag.to_string(), name.to_string()]
}

/// Full argument list: optional environment flags followed by the
/// subcommand arguments.
#[must_use]
pub fn build_args(version: ToolVersion, config_environment: Option<&str>, args: &[String]) -> Vec<String> {
    let mut built = Vec::with_capacity(args.len() + 2);
    if let Some(name) = config_environment {
        built.extend(config_environment_args(version, name));
    }
    built.extend(args.iter().cloned());
    built
}
