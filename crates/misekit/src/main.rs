use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use misekit::{CommandError, Session, logging};
use misekit_platform::detect_wsl_distros;

/// Query a project's mise setup and print the result as JSON.
#[derive(Parser, Debug)]
#[command(name = "misekit", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default, PartialEq, Eq)]
struct Target {
    /// Project directory; defaults to the current directory.
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Show which mise executable would run and how it was found.
    Resolve(Target),
    /// Print the mise version.
    Version(Target),
    /// Print the environment mise exports for the project.
    Env(Target),
    /// List the tools active for the project.
    Tools(Target),
    /// List the project's tasks.
    Tasks(Target),
    /// List the config files mise loads for the project.
    ConfigFiles(Target),
    /// List running WSL distributions.
    Wsl,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Resolve(_) => "resolve",
            Command::Version(_) => "version",
            Command::Env(_) => "env",
            Command::Tools(_) => "tools",
            Command::Tasks(_) => "tasks",
            Command::ConfigFiles(_) => "config-files",
            Command::Wsl => "wsl",
        }
    }

    fn dir(&self) -> Option<&Path> {
        match self {
            Command::Resolve(target)
            | Command::Version(target)
            | Command::Env(target)
            | Command::Tools(target)
            | Command::Tasks(target)
            | Command::ConfigFiles(target) => target.dir.as_deref(),
            Command::Wsl => None,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = cli.command;

    let session = match command.dir() {
        Some(dir) => Session::for_project(dir),
        None => std::env::current_dir()
            .map_err(Into::into)
            .and_then(Session::for_project),
    };
    let session = match session {
        Ok(session) => session,
        Err(error) => {
            eprintln!("misekit: {error}");
            return ExitCode::FAILURE;
        }
    };

    let app = session.settings().app();
    if let Err(error) = logging::init_logging(app.debug_logging, app.max_log_size_bytes) {
        eprintln!("misekit: logging disabled: {error}");
    }

    let working_dir = session.project_dir().to_string_lossy().to_string();
    let result = match &command {
        Command::Resolve(_) => to_json(&session.resolve_executable(&working_dir).await),
        Command::Version(_) => session
            .version(&working_dir)
            .await
            .and_then(|version| to_json(&version.to_string())),
        Command::Env(_) => session.env(&working_dir).await.and_then(|env| to_json(&env)),
        Command::Tools(_) => session
            .installed_tools(&working_dir)
            .await
            .and_then(|tools| to_json(&tools)),
        Command::Tasks(_) => session.tasks(&working_dir).await.and_then(|tasks| to_json(&tasks)),
        Command::ConfigFiles(_) => session
            .config_files(&working_dir)
            .await
            .and_then(|files| to_json(&files)),
        Command::Wsl => to_json(&detect_wsl_distros()),
    };
    session.shutdown().await;

    match result {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            session.report(command.name(), &error);
            eprintln!("misekit: {error}");
            ExitCode::FAILURE
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, CommandError> {
    serde_json::to_string_pretty(value).map_err(|error| CommandError::output_parse("json", error))
}
