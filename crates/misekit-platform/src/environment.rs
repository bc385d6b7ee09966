use serde::{Deserialize, Serialize};

use crate::translate::subsystem_distro;

const DEFAULT_UNIX_SHELL: &str = "/bin/sh";
const DEFAULT_WSL_SHELL: &str = "bash";

/// Where the tool runs for a given working directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionContext {
    /// Windows host, commands are launched directly.
    Native,
    /// macOS or Linux host with the user's login shell.
    Unix { shell: String },
    /// A WSL distribution reached through `wsl.exe`.
    Wsl { distro: String, shell: String },
}

impl ExecutionContext {
    /// Picks the context for `working_dir` on the current host.
    #[must_use]
    pub fn detect(working_dir: &str, wsl_shell: Option<&str>) -> Self {
        Self::detect_for(
            working_dir,
            cfg!(windows),
            std::env::var("SHELL").ok().as_deref(),
            wsl_shell,
        )
    }

    /// Host-independent form of [`ExecutionContext::detect`].
    #[must_use]
    pub fn detect_for(
        working_dir: &str,
        windows_host: bool,
        login_shell: Option<&str>,
        wsl_shell: Option<&str>,
    ) -> Self {
        if windows_host {
            return match subsystem_distro(working_dir) {
                Some(distro) => ExecutionContext::Wsl {
                    distro,
                    shell: non_blank(wsl_shell).unwrap_or(DEFAULT_WSL_SHELL).to_string(),
                },
                None => ExecutionContext::Native,
            };
        }

        ExecutionContext::Unix {
            shell: non_blank(login_shell)
                .unwrap_or(DEFAULT_UNIX_SHELL)
                .to_string(),
        }
    }

    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ExecutionContext::Native => "Windows".to_string(),
            ExecutionContext::Unix { .. } => {
                if cfg!(target_os = "macos") {
                    "macOS".to_string()
                } else {
                    "Linux".to_string()
                }
            }
            ExecutionContext::Wsl { distro, .. } => format!("WSL: {distro}"),
        }
    }

    /// Program and arguments that evaluate `command_line` through the
    /// context's shell, so aliases and shell functions resolve the way they
    /// would in a terminal.
    #[must_use]
    pub fn shell_invocation(&self, command_line: &str) -> (String, Vec<String>) {
        match self {
            ExecutionContext::Native => (
                "cmd".to_string(),
                vec!["/C".to_string(), command_line.to_string()],
            ),
            ExecutionContext::Unix { shell } => {
                let mut args = login_shell_flags(shell);
                args.push(command_line.to_string());
                (shell.clone(), args)
            }
            ExecutionContext::Wsl { distro, shell } => {
                let mut args = vec!["-d".to_string(), distro.clone(), "--".to_string(), shell.clone()];
                args.extend(login_shell_flags(shell));
                args.push(command_line.to_string());
                ("wsl.exe".to_string(), args)
            }
        }
    }
}

fn login_shell_flags(shell: &str) -> Vec<String> {
    let name = shell.rsplit('/').next().unwrap_or(shell);
    let flags: &[&str] = match name {
        "bash" | "zsh" => &["-l", "-i", "-c"],
        "fish" => &["-l", "-c"],
        _ => &["-c"],
    };
    flags.iter().map(|flag| (*flag).to_string()).collect()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::ExecutionContext;

    #[test]
    fn unix_host_uses_login_shell() {
        let context = ExecutionContext::detect_for("/home/me/app", false, Some("/bin/zsh"), None);

        assert_eq!(
            context,
            ExecutionContext::Unix {
                shell: "/bin/zsh".to_string()
            }
        );
    }

    #[test]
    fn unix_host_without_shell_falls_back_to_sh() {
        let context = ExecutionContext::detect_for("/srv", false, Some("  "), None);

        assert_eq!(
            context,
            ExecutionContext::Unix {
                shell: "/bin/sh".to_string()
            }
        );
    }

    #[test]
    fn windows_host_with_unc_dir_selects_wsl_distro() {
        let context = ExecutionContext::detect_for(
            r"\\wsl.localhost\Ubuntu\home\me\app",
            true,
            None,
            Some("zsh"),
        );

        assert_eq!(
            context,
            ExecutionContext::Wsl {
                distro: "Ubuntu".to_string(),
                shell: "zsh".to_string()
            }
        );
        assert_eq!(context.display_name(), "WSL: Ubuntu");
    }

    #[test]
    fn windows_host_with_drive_dir_is_native() {
        let context = ExecutionContext::detect_for(r"C:\work", true, None, None);

        assert_eq!(context, ExecutionContext::Native);
        assert_eq!(context.display_name(), "Windows");
    }

    #[test]
    fn shell_invocation_is_interactive_for_bash() {
        let context = ExecutionContext::Unix {
            shell: "/usr/bin/bash".to_string(),
        };

        let (program, args) = context.shell_invocation("mise version -v");

        assert_eq!(program, "/usr/bin/bash");
        assert_eq!(args, ["-l", "-i", "-c", "mise version -v"]);
    }

    #[test]
    fn wsl_shell_invocation_goes_through_wsl_exe() {
        let context = ExecutionContext::Wsl {
            distro: "Debian".to_string(),
            shell: "sh".to_string(),
        };

        let (program, args) = context.shell_invocation("mise version -v");

        assert_eq!(program, "wsl.exe");
        assert_eq!(args, ["-d", "Debian", "--", "sh", "-c", "mise version -v"]);
    }
}
