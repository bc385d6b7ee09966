use std::collections::HashMap;
use std::process::Command;

use log::debug;
use serde::Serialize;

use crate::commands::Unattended;
use crate::translate::NativePathMapper;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WslDistro {
    pub name: String,
    pub is_default: bool,
    pub version: u8,
}

/// Lists distributions that are already running.
///
/// `--running` keeps discovery from booting a stopped distribution.
#[must_use]
pub fn detect_wsl_distros() -> Vec<WslDistro> {
    if !cfg!(windows) {
        return Vec::new();
    }

    let output = Command::new("wsl.exe")
        .args(["--list", "--running", "--verbose"])
        .unattended()
        .output();

    match output {
        Ok(output) if output.status.success() => parse_wsl_list(&decode_wsl_output(&output.stdout)),
        Ok(output) => {
            debug!("wsl.exe --list exited with {:?}", output.status.code());
            Vec::new()
        }
        Err(error) => {
            debug!("wsl.exe unavailable: {error}");
            Vec::new()
        }
    }
}

/// Shell loop run inside the distribution: converts each argument with
/// `wslpath -u` and prints one line per argument, blank when it fails.
pub const WSLPATH_BATCH_SCRIPT: &str =
    r#"for p in "$@"; do wslpath -u "$p" 2>/dev/null || echo; done"#;

/// Host-to-distribution path mappings produced by one batched `wslpath` run.
#[derive(Debug, Clone, Default)]
pub struct WslPathMap {
    to_subsystem: HashMap<String, String>,
}

impl WslPathMap {
    /// Pairs `paths` with the lines [`WSLPATH_BATCH_SCRIPT`] printed for them.
    #[must_use]
    pub fn from_batch<'a>(paths: impl IntoIterator<Item = &'a str>, stdout: &str) -> Self {
        let to_subsystem = paths
            .into_iter()
            .zip(stdout.lines())
            .filter_map(|(native, mapped)| {
                let mapped = mapped.trim();
                (!mapped.is_empty()).then(|| (native.to_string(), mapped.to_string()))
            })
            .collect();
        Self { to_subsystem }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.to_subsystem.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_subsystem.is_empty()
    }
}

impl NativePathMapper for WslPathMap {
    fn to_native(&self, _posix_path: &str, _distro: &str) -> Option<String> {
        None
    }

    fn to_subsystem(&self, native_path: &str, _distro: &str) -> Option<String> {
        self.to_subsystem.get(native_path).cloned()
    }
}

fn decode_wsl_output(bytes: &[u8]) -> String {
    // wsl.exe writes UTF-16LE; distro listings are ASCII so every high byte is zero
    if bytes.len() >= 2 && bytes.iter().skip(1).step_by(2).all(|byte| *byte == 0) {
        let units = bytes
            .chunks_exact(2)
            .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]));
        return char::decode_utf16(units).filter_map(Result::ok).collect();
    }
    String::from_utf8_lossy(bytes).to_string()
}

fn parse_wsl_list(output: &str) -> Vec<WslDistro> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let line = line.trim().replace('\0', "");
            let is_default = line.starts_with('*');
            let line = line.trim_start_matches('*').trim();

            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let version = parts.nth(1).and_then(|v| v.parse().ok()).unwrap_or(2);
            Some(WslDistro {
                name: name.to_string(),
                is_default,
                version,
            })
        })
        .collect()
}
