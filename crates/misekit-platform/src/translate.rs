//! Conversion between Windows host paths and POSIX paths inside a WSL
//! distribution.
//!
//! Drive paths map onto the distribution's automount root (`C:\src` becomes
//! `/mnt/c/src`) and WSL UNC paths (`\\wsl.localhost\Ubuntu\home\me` or the
//! older `\\wsl$\Ubuntu\home\me`) map onto the distribution root. When a
//! [`NativePathMapper`] is installed it is consulted first; the string rules
//! only apply when it declines or fails.

use std::sync::{Arc, LazyLock};

use regex::Regex;

const DEFAULT_MOUNT_ROOT: &str = "/mnt";
const MIN_PATH_ARGUMENT_LEN: usize = 3;

static UNC_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[\\/]{2}(?:wsl\$|wsl\.localhost)[\\/]([^\\/]+)(.*)$")
        .expect("UNC path pattern should compile")
});

static DRIVE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z]):(?:[\\/](.*))?$")
        .expect("drive path pattern should compile")
});

/// Path conversion provided by the host platform itself (for example
/// `wslpath`). Implementations return `None` to fall back to string rules.
pub trait NativePathMapper: Send + Sync {
    fn to_native(&self, posix_path: &str, distro: &str) -> Option<String>;
    fn to_subsystem(&self, native_path: &str, distro: &str) -> Option<String>;
}

/// Returns true for `\\wsl$\...` and `\\wsl.localhost\...` paths.
#[must_use]
pub fn is_subsystem_path(path: &str) -> bool {
    UNC_PATH.is_match(path)
}

/// Extracts the distribution name from a WSL UNC path.
#[must_use]
pub fn subsystem_distro(path: &str) -> Option<String> {
    UNC_PATH
        .captures(path)
        .and_then(|captures| captures.get(1))
        .map(|distro| distro.as_str().to_string())
}

/// Heuristic for command-line arguments that should be translated.
///
/// Flags and short tokens are left alone even when they contain a separator;
/// missing a real path is cheaper than corrupting a non-path argument.
#[must_use]
pub fn looks_like_path(argument: &str) -> bool {
    argument.len() >= MIN_PATH_ARGUMENT_LEN
        && !argument.starts_with('-')
        && !argument.contains("://")
        && (argument.contains('\\') || argument.contains('/'))
}

#[derive(Clone)]
pub struct PathTranslator {
    distro: String,
    mount_root: String,
    mapper: Option<Arc<dyn NativePathMapper>>,
}

impl std::fmt::Debug for PathTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathTranslator")
            .field("distro", &self.distro)
            .field("mount_root", &self.mount_root)
            .field("native_mapper", &self.mapper.is_some())
            .finish()
    }
}

impl PathTranslator {
    #[must_use]
    pub fn new(distro: impl Into<String>) -> Self {
        Self {
            distro: distro.into(),
            mount_root: DEFAULT_MOUNT_ROOT.to_string(),
            mapper: None,
        }
    }

    #[must_use]
    pub fn with_mount_root(mut self, mount_root: impl Into<String>) -> Self {
        let root = mount_root.into();
        let trimmed = root.trim_end_matches('/');
        self.mount_root = if trimmed.is_empty() {
            String::new()
        } else {
            trimmed.to_string()
        };
        self
    }

    #[must_use]
    pub fn with_native_mapper(mut self, mapper: Arc<dyn NativePathMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    #[must_use]
    pub fn distro(&self) -> &str {
        &self.distro
    }

    /// Converts a POSIX path inside the distribution into a host path.
    /// Host paths and relative paths are returned unchanged.
    #[must_use]
    pub fn to_native_from_subsystem(&self, path: &str) -> String {
        if is_subsystem_path(path) || DRIVE_PATH.is_match(path) || !path.starts_with('/') {
            return path.to_string();
        }

        if let Some(mapped) = self
            .mapper
            .as_ref()
            .and_then(|mapper| mapper.to_native(path, &self.distro))
        {
            return mapped;
        }

        if let Some((drive, rest)) = self.split_mount_path(path) {
            return format!("{}:\\{}", drive.to_ascii_uppercase(), rest.replace('/', "\\"));
        }

        format!(
            "\\\\wsl.localhost\\{}{}",
            self.distro,
            path.replace('/', "\\")
        )
    }

    /// Converts a host path into the POSIX path the distribution sees.
    /// Anything that is not a drive or WSL UNC path is returned unchanged.
    #[must_use]
    pub fn to_subsystem_from_native(&self, path: &str) -> String {
        if let Some(captures) = UNC_PATH.captures(path) {
            let rest = captures.get(2).map_or("", |m| m.as_str()).replace('\\', "/");
            let rest = rest.trim_end_matches('/');
            return if rest.is_empty() {
                "/".to_string()
            } else {
                rest.to_string()
            };
        }

        let Some(captures) = DRIVE_PATH.captures(path) else {
            return path.to_string();
        };

        if let Some(mapped) = self
            .mapper
            .as_ref()
            .and_then(|mapper| mapper.to_subsystem(path, &self.distro))
        {
            return mapped;
        }

        let drive = captures
            .get(1)
            .map_or(String::new(), |m| m.as_str().to_ascii_lowercase());
        let rest = captures.get(2).map_or("", |m| m.as_str()).replace('\\', "/");
        if rest.is_empty() {
            format!("{}/{drive}", self.mount_root)
        } else {
            format!("{}/{drive}/{rest}", self.mount_root)
        }
    }

    /// Translates a command-line argument when it looks like a host path.
    #[must_use]
    pub fn translate_argument(&self, argument: &str) -> String {
        if looks_like_path(argument) {
            self.to_subsystem_from_native(argument)
        } else {
            argument.to_string()
        }
    }

    fn split_mount_path<'a>(&self, path: &'a str) -> Option<(char, &'a str)> {
        let after_root = path.strip_prefix(self.mount_root.as_str())?;
        let after_slash = after_root.strip_prefix('/')?;
        let mut chars = after_slash.chars();
        let drive = chars.next().filter(char::is_ascii_alphabetic)?;
        let rest = chars.as_str();
        if rest.is_empty() {
            Some((drive, ""))
        } else {
            rest.strip_prefix('/').map(|rest| (drive, rest))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{
        NativePathMapper, PathTranslator, is_subsystem_path, looks_like_path, subsystem_distro,
    };

    fn ubuntu() -> PathTranslator {
        PathTranslator::new("Ubuntu")
    }

    #[test]
    fn recognizes_both_unc_spellings() {
        assert!(is_subsystem_path(r"\\wsl$\Ubuntu\home\me"));
        assert!(is_subsystem_path(r"\\wsl.localhost\Debian\srv"));
        assert!(is_subsystem_path("//wsl.localhost/Debian/srv"));
        assert!(!is_subsystem_path(r"C:\Users\me"));
        assert!(!is_subsystem_path("/home/me"));
        assert!(!is_subsystem_path(r"\\server\share\dir"));
    }

    #[test]
    fn extracts_distro_from_unc_path() {
        assert_eq!(
            subsystem_distro(r"\\wsl$\Ubuntu-22.04\home\me").as_deref(),
            Some("Ubuntu-22.04")
        );
        assert_eq!(subsystem_distro(r"D:\work"), None);
    }

    #[test]
    fn drive_path_maps_under_mount_root() {
        let translator = ubuntu();

        assert_eq!(
            translator.to_subsystem_from_native(r"C:\Users\me\project"),
            "/mnt/c/Users/me/project"
        );
        assert_eq!(translator.to_subsystem_from_native(r"D:\"), "/mnt/d");
    }

    #[test]
    fn unc_path_maps_to_distribution_root() {
        let translator = ubuntu();

        assert_eq!(
            translator.to_subsystem_from_native(r"\\wsl.localhost\Ubuntu\home\me\app"),
            "/home/me/app"
        );
        assert_eq!(translator.to_subsystem_from_native(r"\\wsl$\Ubuntu"), "/");
    }

    #[test]
    fn converting_native_path_to_native_is_a_no_op() {
        let translator = ubuntu();

        for path in [r"C:\Users\me", r"\\wsl.localhost\Ubuntu\home\me", "relative\\dir"] {
            assert_eq!(translator.to_native_from_subsystem(path), path);
        }
    }

    #[test]
    fn converting_posix_path_to_posix_is_a_no_op() {
        let translator = ubuntu();

        assert_eq!(translator.to_subsystem_from_native("/home/me"), "/home/me");
        assert_eq!(translator.to_subsystem_from_native("tasks"), "tasks");
    }

    #[test]
    fn round_trip_under_mount_root_restores_original() {
        let translator = ubuntu();

        for original in [
            r"C:\Users\me\project",
            r"D:\",
            r"E:\work\mise.toml",
            r"\\wsl.localhost\Ubuntu\home\me\app",
        ] {
            let posix = translator.to_subsystem_from_native(original);
            assert_eq!(translator.to_native_from_subsystem(&posix), original);
        }
    }

    #[test]
    fn custom_mount_root_is_respected() {
        let translator = ubuntu().with_mount_root("/");

        assert_eq!(translator.to_subsystem_from_native(r"C:\src"), "/c/src");
        assert_eq!(translator.to_native_from_subsystem("/c/src"), r"C:\src");
    }

    #[test]
    fn posix_path_outside_mounts_becomes_unc() {
        assert_eq!(
            ubuntu().to_native_from_subsystem("/home/me/.local/bin/mise"),
            r"\\wsl.localhost\Ubuntu\home\me\.local\bin\mise"
        );
        assert_eq!(
            ubuntu().to_native_from_subsystem("/mnt/cdrom"),
            r"\\wsl.localhost\Ubuntu\mnt\cdrom"
        );
    }

    #[test]
    fn path_heuristic_skips_flags_and_short_tokens() {
        assert!(looks_like_path(r"C:\work"));
        assert!(looks_like_path("./mise.toml"));
        assert!(!looks_like_path("ls"));
        assert!(!looks_like_path("a/"));
        assert!(!looks_like_path("--file=C:\\x"));
        assert!(!looks_like_path("https://mise.jdx.dev"));
        assert!(!looks_like_path("node@20"));
    }

    #[test]
    fn translate_argument_only_rewrites_host_paths() {
        let translator = ubuntu();

        assert_eq!(translator.translate_argument(r"C:\work"), "/mnt/c/work");
        assert_eq!(translator.translate_argument("env"), "env");
        assert_eq!(translator.translate_argument("--json"), "--json");
    }

    struct FixedMapper;

    impl NativePathMapper for FixedMapper {
        fn to_native(&self, posix_path: &str, distro: &str) -> Option<String> {
            (posix_path == "/data").then(|| format!("X:\\{distro}"))
        }

        fn to_subsystem(&self, native_path: &str, _distro: &str) -> Option<String> {
            (native_path == r"X:\Ubuntu").then(|| "/data".to_string())
        }
    }

    #[test]
    fn native_mapper_takes_precedence_and_falls_back() {
        let translator = ubuntu().with_native_mapper(Arc::new(FixedMapper));

        assert_eq!(translator.to_native_from_subsystem("/data"), r"X:\Ubuntu");
        assert_eq!(translator.to_subsystem_from_native(r"X:\Ubuntu"), "/data");
        assert_eq!(translator.to_subsystem_from_native(r"C:\src"), "/mnt/c/src");
    }
}
