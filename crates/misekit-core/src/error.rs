use thiserror::Error;

/// Known shapes of `mise` error messages on stderr.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolErrorKind {
    #[error("config file {path} is not trusted")]
    UntrustedConfig { path: String },

    #[error("config file {path} could not be parsed")]
    ConfigParse { path: String },

    #[error("task {task} was not found")]
    TaskNotFound { task: String },

    #[error("key {key} was not found")]
    KeyNotFound { key: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("mise executable not found: {executable}")]
    ExecutableNotFound { executable: String },

    #[error("Timeout waiting for command after {seconds}s")]
    TimedOut { seconds: u64 },

    #[error("Command was cancelled")]
    Cancelled,

    #[error("{detail}")]
    Tool { kind: ToolErrorKind, detail: String },

    #[error("Command failed ({}): {stderr}", describe_exit(.exit_code))]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Path resolution failed: {details}")]
    PathResolution { details: String },

    #[error("Failed to parse output of {operation}: {details}")]
    OutputParse { operation: String, details: String },

    #[error("IO error ({kind}): {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    exit_code.map_or_else(|| "terminated by signal".to_string(), |code| format!("exit code {code}"))
}

impl CommandError {
    pub fn output_parse(operation: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::OutputParse {
            operation: operation.into(),
            details: error.to_string(),
        }
    }

    /// "Tool not installed yet" is an expected state and is never shown to
    /// the user; everything else is.
    #[must_use]
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::ExecutableNotFound { .. })
    }

    #[must_use]
    pub fn tool_kind(&self) -> Option<&ToolErrorKind> {
        match self {
            Self::Tool { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CommandError {
    fn from(err: std::io::Error) -> Self {
        CommandError::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
