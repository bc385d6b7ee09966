use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;

use misekit_core::CommandError;
use misekit_platform::AppPathsError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Paths(#[from] AppPathsError),

    #[error("Failed to prepare settings directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Where user-facing error messages go, typically an editor notification.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        warn!("{title}: {message}");
    }
}

/// Decides which command errors reach the user.
#[derive(Clone)]
pub struct ErrorPolicy {
    notifier: Arc<dyn Notifier>,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::new(Arc::new(LogNotifier))
    }
}

impl ErrorPolicy {
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Returns true when the user was notified. A missing executable is an
    /// expected state and is only logged.
    pub fn report(&self, action: &str, error: &CommandError) -> bool {
        if error.is_user_visible() {
            self.notifier.notify(&format!("mise {action} failed"), &error.to_string());
            true
        } else {
            debug!("mise {action} skipped: {error}");
            false
        }
    }

    /// Unwraps `result`, reporting the error if there is one.
    pub fn handle<T>(&self, action: &str, result: Result<T, CommandError>) -> Option<T> {
        result
            .map_err(|error| {
                self.report(action, &error);
            })
            .ok()
    }
}
