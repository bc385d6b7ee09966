use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};

use misekit_core::{
    CommandError, InvocationRequest, ProcessRunner, RunError, SingleFlightCache, ToolVersion,
};
use misekit_platform::{
    ExecutionContext, PathTranslator, WSLPATH_BATCH_SCRIPT, WslPathMap, is_subsystem_path,
    looks_like_path,
};

use crate::diagnostics::classify_failure;
use crate::dialect::build_args;
use crate::launch::{direct_spec, split_command};
use crate::resolver::{ExecutableLocation, ExecutableResolver};
use crate::settings::ToolSettings;

type VersionKey = (ExecutionContext, String);

/// Runs `mise` for a request: resolves the binary, picks the flag dialect for
/// its version, translates paths for WSL and classifies failures.
pub struct CommandExecutor {
    resolver: Arc<ExecutableResolver>,
    runner: Arc<dyn ProcessRunner>,
    settings: Arc<dyn ToolSettings>,
    versions: SingleFlightCache<VersionKey, ToolVersion>,
}

impl CommandExecutor {
    #[must_use]
    pub fn new(
        resolver: Arc<ExecutableResolver>,
        runner: Arc<dyn ProcessRunner>,
        settings: Arc<dyn ToolSettings>,
    ) -> Self {
        Self {
            resolver,
            runner,
            settings,
            versions: SingleFlightCache::new(),
        }
    }

    #[must_use]
    pub fn resolver(&self) -> &Arc<ExecutableResolver> {
        &self.resolver
    }

    /// Runs the request and returns raw stdout.
    pub async fn run(&self, request: &InvocationRequest) -> Result<String, CommandError> {
        let location = self.resolver.resolve(&request.working_dir).await;
        let command = split_command(&location.command);
        if command.is_empty() {
            return Err(CommandError::ExecutableNotFound {
                executable: location.command,
            });
        }

        let version = self.tool_version(&location, &command).await;
        let args = build_args(version, request.config_environment.as_deref(), &request.args);
        info!(
            "Running mise {} in {} ({})",
            args.join(" "),
            request.working_dir,
            location.context.display_name()
        );

        let spec = match &location.context {
            ExecutionContext::Wsl { distro, .. } => {
                let (working_dir, args) = self
                    .translate_for_subsystem(&location.context, distro, &request.working_dir, args)
                    .await;
                direct_spec(
                    &location.context,
                    &command,
                    args,
                    Some(&working_dir),
                    self.settings.command_timeout(),
                )
            }
            ExecutionContext::Native | ExecutionContext::Unix { .. } => {
                if !Path::new(&request.working_dir).is_dir() {
                    return Err(CommandError::PathResolution {
                        details: format!("{} is not a directory", request.working_dir),
                    });
                }
                direct_spec(
                    &location.context,
                    &command,
                    args,
                    Some(&request.working_dir),
                    self.settings.command_timeout(),
                )
            }
        }
        .with_env("NO_COLOR", "1");

        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|error| launch_error(&location, error))?;

        match output.exit_code {
            Some(0) => {
                debug!("mise succeeded, output: {} bytes", output.stdout.len());
                Ok(output.stdout)
            }
            Some(code) => {
                let error = classify_failure(Some(code), &output.stderr);
                warn!("mise {} failed: {error}", request.args.join(" "));
                Err(error)
            }
            None => Err(CommandError::Cancelled),
        }
    }

    /// Version of the resolved binary, `0.0.0` when it cannot be determined.
    pub async fn version_of(&self, location: &ExecutableLocation) -> ToolVersion {
        self.tool_version(location, &split_command(&location.command))
            .await
    }

    /// Drops cached versions so the next run asks the binary again.
    pub fn invalidate_versions(&self) {
        self.versions.invalidate_all();
    }

    /// Rewrites the working directory and path-like arguments for a WSL
    /// distribution. Drive paths are converted by one `wslpath` batch under
    /// the command timeout; anything it does not map uses the string rules.
    async fn translate_for_subsystem(
        &self,
        context: &ExecutionContext,
        distro: &str,
        working_dir: &str,
        args: Vec<String>,
    ) -> (String, Vec<String>) {
        let translator = self.subsystem_translator(context, distro, working_dir, &args).await;
        let working_dir = translator.to_subsystem_from_native(working_dir);
        let args = args
            .iter()
            .map(|arg| translator.translate_argument(arg))
            .collect();
        (working_dir, args)
    }

    async fn subsystem_translator(
        &self,
        context: &ExecutionContext,
        distro: &str,
        working_dir: &str,
        args: &[String],
    ) -> PathTranslator {
        let translator = PathTranslator::new(distro);
        let paths: Vec<&str> = std::iter::once(working_dir)
            .chain(args.iter().map(String::as_str).filter(|arg| looks_like_path(arg)))
            .filter(|path| !path.starts_with('/') && !is_subsystem_path(path))
            .collect();
        if paths.is_empty() {
            return translator;
        }

        let mut batch_args = vec![
            "-c".to_string(),
            WSLPATH_BATCH_SCRIPT.to_string(),
            "sh".to_string(),
        ];
        batch_args.extend(paths.iter().map(|path| (*path).to_string()));
        let spec = direct_spec(
            context,
            &["sh".to_string()],
            batch_args,
            None,
            self.settings.command_timeout(),
        );

        match self.runner.run(&spec).await {
            Ok(output) if output.is_success() => {
                let map = WslPathMap::from_batch(paths, &output.stdout);
                debug!("wslpath mapped {} path(s) in {distro}", map.len());
                translator.with_native_mapper(Arc::new(map))
            }
            Ok(output) => {
                debug!("wslpath batch exited with {:?} in {distro}", output.exit_code);
                translator
            }
            Err(error) => {
                debug!("wslpath batch failed in {distro}: {error}");
                translator
            }
        }
    }

    async fn tool_version(&self, location: &ExecutableLocation, command: &[String]) -> ToolVersion {
        let key = (location.context.clone(), location.command.clone());
        let result = self
            .versions
            .try_get(key, || async {
                let spec = direct_spec(
                    &location.context,
                    command,
                    vec!["version".to_string()],
                    None,
                    self.settings.command_timeout(),
                );
                let output = self
                    .runner
                    .run(&spec)
                    .await
                    .map_err(|error| error.to_string())?;
                if !output.is_success() {
                    return Err(format!("exit code {:?}", output.exit_code));
                }
                let version = ToolVersion::parse_lenient(&output.stdout);
                debug!("mise at {} reports version {version}", location.command);
                Ok::<_, String>(version)
            })
            .await;

        result.unwrap_or_else(|error: String| {
            debug!("Could not determine mise version, assuming {}: {error}", ToolVersion::ZERO);
            ToolVersion::ZERO
        })
    }
}

fn launch_error(location: &ExecutableLocation, error: RunError) -> CommandError {
    match error {
        RunError::Launch { source, .. }
            if matches!(source.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) =>
        {
            debug!("mise executable not found: {}", location.command);
            CommandError::ExecutableNotFound {
                executable: location.command.clone(),
            }
        }
        RunError::Launch { source, .. } => CommandError::from(source),
        RunError::TimedOut { timeout } => {
            warn!("mise timed out after {}s", timeout.as_secs());
            CommandError::TimedOut {
                seconds: timeout.as_secs(),
            }
        }
    }
}
