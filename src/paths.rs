//! Path handling for the X-Plane root and archive entries
//!
//! This module handles:
//! - Validating that a directory looks like an X-Plane installation
//! - Converting `\` to `/` in archive entry names
//! - Lexical path cleaning and containment checks for extraction

use serde::Serialize;
use std::path::{Component, Path, PathBuf};

/// Synthetic missing-item reported for relative paths
pub const ABSOLUTE_PATH_REQUIRED: &str = "Path must be an absolute directory path.";

/// Entries every X-Plane installation root carries
pub const XPLANE_REQUIRED_ENTRIES: &[&str] = &[
    "Aircraft",
    "Custom Scenery",
    "Global Scenery",
    "Resources",
    "X-Plane.exe",
];

/// Expected kind of a required entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

impl EntryKind {
    /// Derive the kind from a name: anything with an extension is a file
    pub fn from_name(name: &str) -> Self {
        match extension(name) {
            Some(ext) if !ext.is_empty() => EntryKind::File,
            _ => EntryKind::Directory,
        }
    }

    fn matches(self, meta: &std::fs::Metadata) -> bool {
        match self {
            EntryKind::Directory => meta.is_dir(),
            EntryKind::File => meta.is_file(),
        }
    }
}

/// A named entry that must exist under the root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl RequiredEntry {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let kind = EntryKind::from_name(&name);
        Self { name, kind }
    }
}

/// Result of validating a candidate root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub ok: bool,
    pub missing: Vec<String>,
}

/// Error returned when a root fails validation and the caller needs one
#[derive(Debug, thiserror::Error)]
#[error("Invalid X-Plane directory {}: missing {}", path.display(), missing.join(", "))]
pub struct ValidationError {
    pub path: PathBuf,
    pub missing: Vec<String>,
}

/// Checks that a root directory contains a fixed set of entries
#[derive(Debug, Clone)]
pub struct RootValidator {
    required: Vec<RequiredEntry>,
}

impl Default for RootValidator {
    fn default() -> Self {
        Self::new(XPLANE_REQUIRED_ENTRIES.iter().copied())
    }
}

impl RootValidator {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: names.into_iter().map(RequiredEntry::new).collect(),
        }
    }

    pub fn required(&self) -> &[RequiredEntry] {
        &self.required
    }

    /// Validate `path` against the current filesystem.
    ///
    /// Relative paths are rejected without touching the filesystem. An entry
    /// is missing when it is absent or present with the wrong kind.
    pub fn validate(&self, path: &Path) -> Validation {
        if !path.is_absolute() {
            return Validation {
                ok: false,
                missing: vec![ABSOLUTE_PATH_REQUIRED.to_string()],
            };
        }

        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|entry| match std::fs::metadata(path.join(&entry.name)) {
                Ok(meta) => !entry.kind.matches(&meta),
                Err(_) => true,
            })
            .map(|entry| entry.name.clone())
            .collect();

        Validation {
            ok: missing.is_empty(),
            missing,
        }
    }

    /// Like [`validate`](Self::validate) but as a `Result`
    pub fn require(&self, path: &Path) -> Result<(), ValidationError> {
        let validation = self.validate(path);
        if validation.ok {
            Ok(())
        } else {
            Err(ValidationError {
                path: path.to_path_buf(),
                missing: validation.missing,
            })
        }
    }
}

/// Convert Windows path separators to `/`
/// `liveries\Air China\icon11.png` -> `liveries/Air China/icon11.png`
pub fn to_linux_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Get file extension of the last path segment
pub fn extension(path: &str) -> Option<&str> {
    let name = path.rfind(['\\', '/']).map(|idx| &path[idx + 1..]).unwrap_or(path);
    name.rfind('.').filter(|&idx| idx > 0).map(|idx| &name[idx + 1..])
}

/// Lexically clean a path: drop `.`, resolve `..` against prior components.
///
/// `..` never climbs above a root or prefix; on a relative path leading `..`
/// components are kept. No filesystem access.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// True when `path` cleans to `root` or to a location nested under it
pub fn is_within(root: &Path, path: &Path) -> bool {
    clean_path(path).starts_with(clean_path(root))
}

/// True when `name` is exactly one normal path component
pub fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

/// Create parent directories for a path if they don't exist
pub fn ensure_parent_dirs(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_xplane_root(dir: &Path) {
        for name in ["Aircraft", "Custom Scenery", "Global Scenery", "Resources"] {
            std::fs::create_dir_all(dir.join(name)).unwrap();
        }
        std::fs::write(dir.join("X-Plane.exe"), b"MZ").unwrap();
    }

    #[test]
    fn test_relative_path_rejected() {
        let validator = RootValidator::default();
        for path in ["X-Plane 12", "./X-Plane", "", "../games"] {
            let result = validator.validate(Path::new(path));
            assert!(!result.ok);
            assert_eq!(result.missing, vec![ABSOLUTE_PATH_REQUIRED.to_string()]);
        }
    }

    #[test]
    fn test_complete_root_is_valid() {
        let dir = tempdir().unwrap();
        make_xplane_root(dir.path());

        let result = RootValidator::default().validate(dir.path());
        assert!(result.ok);
        assert!(result.missing.is_empty());
        assert!(RootValidator::default().require(dir.path()).is_ok());
    }

    #[test]
    fn test_missing_and_wrong_kind() {
        let dir = tempdir().unwrap();
        make_xplane_root(dir.path());
        std::fs::remove_dir(dir.path().join("Resources")).unwrap();
        // Directory where a file is expected
        std::fs::remove_file(dir.path().join("X-Plane.exe")).unwrap();
        std::fs::create_dir(dir.path().join("X-Plane.exe")).unwrap();

        let result = RootValidator::default().validate(dir.path());
        assert!(!result.ok);
        assert_eq!(result.missing, vec!["Resources", "X-Plane.exe"]);

        let err = RootValidator::default().require(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Resources, X-Plane.exe"));
    }

    #[test]
    fn test_entry_kind_from_name() {
        assert_eq!(EntryKind::from_name("X-Plane.exe"), EntryKind::File);
        assert_eq!(EntryKind::from_name("Custom Scenery"), EntryKind::Directory);
        assert_eq!(EntryKind::from_name(".hidden"), EntryKind::Directory);
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(clean_path(Path::new("/../../etc")), PathBuf::from("/etc"));
        assert_eq!(clean_path(Path::new("a/../../b")), PathBuf::from("../b"));
        assert_eq!(clean_path(Path::new("./")), PathBuf::from("."));
    }

    #[test]
    fn test_is_within() {
        let root = Path::new("/games/xp/liveries");
        assert!(is_within(root, Path::new("/games/xp/liveries")));
        assert!(is_within(root, Path::new("/games/xp/liveries/a/../b.png")));
        assert!(!is_within(root, Path::new("/games/xp/liveries/../../evil.txt")));
        // Prefix match on a sibling name must not count
        assert!(!is_within(root, Path::new("/games/xp/liveries-evil/x")));
    }

    #[test]
    fn test_single_component() {
        assert!(is_single_component("Air China B-5908"));
        assert!(!is_single_component("../etc"));
        assert!(!is_single_component("a/b"));
        assert!(!is_single_component("a\\b"));
        assert!(!is_single_component(".."));
        assert!(!is_single_component(""));
    }

    #[test]
    fn test_to_linux_path() {
        assert_eq!(to_linux_path("liveries\\Air China\\a.png"), "liveries/Air China/a.png");
        assert_eq!(to_linux_path("already/linux"), "already/linux");
    }
}
