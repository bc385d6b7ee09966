#[cfg(debug_assertions)]
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use simplelog::{CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, WriteLogger};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use misekit_platform::{AppPaths, AppPathsError};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error(transparent)]
    Paths(#[from] AppPathsError),

    #[error("Could not open log file: {0}")]
    Io(#[from] io::Error),

    #[error("A logger is already installed")]
    AlreadyInitialized,
}

/// Appends to the log file, reopening it if something deleted it while the
/// session was running.
struct ReopeningLogFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl ReopeningLogFile {
    fn open(path: PathBuf) -> io::Result<Self> {
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

impl Write for ReopeningLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.path.exists() {
            *file = open_append(&self.path)?;
        }
        file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Keeps the newer half of an oversized log, cut at a line boundary.
fn trim_oversized(log_path: &Path, max_log_size: u64) -> io::Result<()> {
    let Ok(metadata) = std::fs::metadata(log_path) else {
        return Ok(());
    };
    if metadata.len() <= max_log_size {
        return Ok(());
    }

    let contents = std::fs::read(log_path)?;
    let half = contents.len() / 2;
    let keep_from = contents[half..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(half, |pos| half + pos + 1);
    std::fs::write(log_path, &contents[keep_from..])
}

/// Installs the global logger: the per-user log file, plus the terminal in
/// debug builds. Returns the log file path.
pub fn init_logging(debug_enabled: bool, max_log_size: u64) -> Result<PathBuf, LoggingError> {
    let paths = AppPaths::new()?;
    paths.ensure_dirs()?;
    let log_path = paths.log_file();
    init_logging_at(&log_path, debug_enabled, max_log_size)?;
    Ok(log_path)
}

pub fn init_logging_at(
    log_path: &Path,
    debug_enabled: bool,
    max_log_size: u64,
) -> Result<(), LoggingError> {
    trim_oversized(log_path, max_log_size)?;

    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_allow_str("misekit")
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    loggers.push(WriteLogger::new(
        LevelFilter::Debug,
        config.clone(),
        ReopeningLogFile::open(log_path.to_path_buf())?,
    ));

    #[cfg(debug_assertions)]
    loggers.push(TermLogger::new(
        LevelFilter::Debug,
        config,
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ));

    CombinedLogger::init(loggers).map_err(|_| LoggingError::AlreadyInitialized)?;
    set_logging_enabled(debug_enabled);

    if debug_enabled {
        log::info!("Debug logging initialized, log file: {}", log_path.display());
    }
    Ok(())
}

pub fn set_logging_enabled(enabled: bool) {
    if enabled {
        log::set_max_level(log::LevelFilter::Debug);
    } else {
        log::set_max_level(log::LevelFilter::Off);
    }
}
