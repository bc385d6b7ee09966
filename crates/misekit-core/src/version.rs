use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Calendar version reported by `mise version`, e.g. `2024.12.2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ToolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ToolVersion {
    /// Used whenever the real version cannot be determined, so the oldest
    /// command-line dialect is selected.
    pub const ZERO: ToolVersion = ToolVersion::new(0, 0, 0);

    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses the first token of `mise version` output, e.g.
    /// `2024.12.2 linux-x64 (2024-12-20)`. Anything unparsable yields
    /// [`ToolVersion::ZERO`].
    #[must_use]
    pub fn parse_lenient(output: &str) -> Self {
        output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .and_then(|line| line.split_whitespace().next())
            .and_then(|token| token.parse().ok())
            .unwrap_or(Self::ZERO)
    }
}

impl Ord for ToolVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
    }
}

impl PartialOrd for ToolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionComponent {
    Major,
    Minor,
    Patch,
}

impl fmt::Display for VersionComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Major => write!(f, "major"),
            Self::Minor => write!(f, "minor"),
            Self::Patch => write!(f, "patch"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionParseError {
    #[error("Expected X.Y.Z format, got: {input}")]
    InvalidFormat { input: String },
    #[error("Invalid {component} version: {value}")]
    InvalidComponent {
        component: VersionComponent,
        value: String,
    },
}

impl FromStr for ToolVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        // pre-release and build suffixes do not take part in dialect selection
        let core = trimmed
            .split(['-', '+'])
            .next()
            .unwrap_or(trimmed);

        let invalid = || VersionParseError::InvalidFormat {
            input: s.trim().to_string(),
        };
        let mut parts = core.split('.');
        let major = parts.next().ok_or_else(invalid)?;
        let minor = parts.next().ok_or_else(invalid)?;
        let patch = parts.next().ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(ToolVersion::new(
            parse_component(major, VersionComponent::Major)?,
            parse_component(minor, VersionComponent::Minor)?,
            parse_component(patch, VersionComponent::Patch)?,
        ))
    }
}

fn parse_component(value: &str, component: VersionComponent) -> Result<u32, VersionParseError> {
    value
        .parse()
        .map_err(|_| VersionParseError::InvalidComponent {
            component,
            value: value.to_string(),
        })
}
