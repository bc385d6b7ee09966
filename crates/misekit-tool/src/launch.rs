use std::path::Path;
use std::time::Duration;

use misekit_core::ProcessSpec;
use misekit_platform::ExecutionContext;

/// Splits a configured launcher such as `mise-wrapper --quiet` into tokens.
/// A string naming an existing file is kept whole even if it contains spaces.
#[must_use]
pub fn split_command(command: &str) -> Vec<String> {
    let command = command.trim();
    if command.is_empty() {
        return Vec::new();
    }
    if !command.contains(char::is_whitespace) || Path::new(command).is_file() {
        return vec![command.to_string()];
    }

    if command.contains('\\') {
        return split_windows_command(command);
    }
    shlex::split(command)
        .filter(|tokens| !tokens.is_empty())
        .unwrap_or_else(|| command.split_whitespace().map(str::to_string).collect())
}

/// Splits on whitespace outside double quotes; backslashes stay literal.
fn split_windows_command(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut started = false;
    for ch in command.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                started = true;
            }
            ch if ch.is_whitespace() && !quoted => {
                if started {
                    tokens.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            ch => {
                current.push(ch);
                started = true;
            }
        }
    }
    if started {
        tokens.push(current);
    }
    tokens
}

/// Runs `command` with `args` directly (no shell) in `context`.
///
/// `working_dir` is a host path for native contexts and a POSIX path for
/// WSL, where it is passed with `--cd`.
#[must_use]
pub fn direct_spec(
    context: &ExecutionContext,
    command: &[String],
    args: Vec<String>,
    working_dir: Option<&str>,
    timeout: Duration,
) -> ProcessSpec {
    match context {
        ExecutionContext::Wsl { distro, .. } => {
            let mut wsl_args = vec!["-d".to_string(), distro.clone()];
            if let Some(dir) = working_dir {
                wsl_args.push("--cd".to_string());
                wsl_args.push(dir.to_string());
            }
            wsl_args.push("--exec".to_string());
            wsl_args.extend(command.iter().cloned());
            wsl_args.extend(args);
            ProcessSpec::new("wsl.exe", wsl_args, timeout)
        }
        ExecutionContext::Native | ExecutionContext::Unix { .. } => {
            let (program, launcher_args) = command
                .split_first()
                .map_or(("", &[][..]), |(program, rest)| (program.as_str(), rest));
            let spec = ProcessSpec::new(
                program,
                launcher_args.iter().cloned().chain(args),
                timeout,
            );
            match working_dir {
                Some(dir) => spec.with_working_dir(dir),
                None => spec,
            }
        }
    }
}
