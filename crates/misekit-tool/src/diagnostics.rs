use std::sync::LazyLock;

use regex::Regex;

use misekit_core::{CommandError, ToolErrorKind};

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("ANSI escape pattern should compile")
});

static ERROR_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*mise\s+ERROR\s+").expect("error prefix pattern should compile")
});

static UNTRUSTED_CONFIG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)config files? (?:in )?(.+?) (?:is|are) not trusted")
        .expect("untrusted config pattern should compile")
});

static CONFIG_PARSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error parsing config file:?\s+(\S+)")
        .expect("config parse pattern should compile")
});

static TASK_NOT_FOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)no tasks?(?: named)? [`'"]?([^\s`'"]+?)[`'"]? found"#)
        .expect("task not found pattern should compile")
});

static KEY_NOT_FOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:key not found|unknown setting):?\s+[`'"]?([^\s`'"]+)"#)
        .expect("key not found pattern should compile")
});

/// Removes terminal colour codes and the `mise ERROR` line prefix.
#[must_use]
pub fn clean_output(raw: &str) -> String {
    let plain = ANSI_ESCAPE.replace_all(raw, "");
    ERROR_PREFIX.replace_all(&plain, "").trim().to_string()
}

/// Matches stderr against the known message shapes.
#[must_use]
pub fn parse_tool_error(stderr: &str) -> Option<ToolErrorKind> {
    let cleaned = clean_output(stderr);

    if let Some(captures) = UNTRUSTED_CONFIG.captures(&cleaned) {
        return Some(ToolErrorKind::UntrustedConfig {
            path: captures[1].trim_matches(['`', '\'', '"']).to_string(),
        });
    }
    if let Some(captures) = CONFIG_PARSE.captures(&cleaned) {
        return Some(ToolErrorKind::ConfigParse {
            path: captures[1].trim_end_matches([':', ',']).to_string(),
        });
    }
    if let Some(captures) = TASK_NOT_FOUND.captures(&cleaned) {
        return Some(ToolErrorKind::TaskNotFound {
            task: captures[1].to_string(),
        });
    }
    KEY_NOT_FOUND
        .captures(&cleaned)
        .map(|captures| ToolErrorKind::KeyNotFound {
            key: captures[1].to_string(),
        })
}

/// Turns a non-zero exit into a classified error, or a generic failure
/// carrying the raw stderr when no known shape matches.
#[must_use]
pub fn classify_failure(exit_code: Option<i32>, stderr: &str) -> CommandError {
    match parse_tool_error(stderr) {
        Some(kind) => CommandError::Tool {
            kind,
            detail: first_line(&clean_output(stderr)),
        },
        None => CommandError::Failed {
            exit_code,
            stderr: stderr.trim().to_string(),
        },
    }
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string()
}
