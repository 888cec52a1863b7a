//! Path helpers shared by the listener and the backends
//!
//! Watched paths are compared component-wise, so `/a/b` and `/a/b/` are the
//! same watch. Registration strips trailing separators so the stored form is
//! canonical for display as well.

use crate::error::WatchError;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Validate and normalize a path passed to `watch`
///
/// - Rejects empty and relative paths
/// - Drops trailing separators and `.` components
pub fn normalize_watch_path(path: &Path) -> Result<PathBuf, WatchError> {
    if path.as_os_str().is_empty() {
        return Err(WatchError::InvalidPath {
            path: path.to_path_buf(),
            reason: "path is empty",
        });
    }

    if !path.is_absolute() {
        return Err(WatchError::InvalidPath {
            path: path.to_path_buf(),
            reason: "path must be absolute",
        });
    }

    Ok(path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect())
}

/// Whether two paths name the same location, ignoring trailing separators
pub fn paths_equal(a: &Path, b: &Path) -> bool {
    a.components().eq(b.components())
}

/// Directory containing `path` (`/foo/bar/baz.txt` → `/foo/bar`)
pub fn parent_dir(path: &Path) -> &Path {
    path.parent().unwrap_or(path)
}

/// Final component of `path` (`/foo/bar/baz.txt` → `baz.txt`)
pub fn file_name(path: &Path) -> &OsStr {
    path.file_name().unwrap_or_else(|| OsStr::new(""))
}

/// Whether `path` sits directly inside `dir` (one segment deeper, no more)
pub fn is_immediate_child(path: &Path, dir: &Path) -> bool {
    path.parent().is_some_and(|parent| paths_equal(parent, dir))
}

/// Rebuild a full path from a directory and an entry name
pub fn join_entry(dir: &Path, name: &OsStr) -> PathBuf {
    if name.is_empty() {
        dir.to_path_buf()
    } else {
        dir.join(name)
    }
}

/// Whether `path` currently resolves on disk (symlinks followed)
pub fn path_exists(path: &Path) -> bool {
    std::fs::metadata(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_trailing_separator() {
        let normalized = normalize_watch_path(Path::new("/foo/bar/")).unwrap();
        assert_eq!(normalized.as_os_str(), "/foo/bar");

        let dotted = normalize_watch_path(Path::new("/foo/./bar")).unwrap();
        assert_eq!(dotted.as_os_str(), "/foo/bar");
    }

    #[test]
    fn test_normalize_rejects_relative_and_empty() {
        assert!(matches!(
            normalize_watch_path(Path::new("foo/bar")),
            Err(WatchError::InvalidPath { .. })
        ));
        assert!(matches!(
            normalize_watch_path(Path::new("")),
            Err(WatchError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_paths_equal_ignores_trailing_separator() {
        assert!(paths_equal(Path::new("/foo/bar"), Path::new("/foo/bar/")));
        assert!(!paths_equal(Path::new("/foo/bar"), Path::new("/foo/barbaz")));
    }

    #[test]
    fn test_immediate_child_only_one_level() {
        let dir = Path::new("/foo/bar");
        assert!(is_immediate_child(Path::new("/foo/bar/baz.txt"), dir));
        assert!(!is_immediate_child(Path::new("/foo/bar/baz/qux.txt"), dir));
        assert!(!is_immediate_child(Path::new("/foo/barbaz/qux.txt"), dir));
        assert!(!is_immediate_child(dir, dir));
    }

    #[test]
    fn test_split_and_join() {
        let path = Path::new("/foo/bar/baz.txt");
        assert_eq!(parent_dir(path), Path::new("/foo/bar"));
        assert_eq!(file_name(path), "baz.txt");
        assert_eq!(join_entry(parent_dir(path), file_name(path)), path);
        assert_eq!(join_entry(Path::new("/foo"), OsStr::new("")), Path::new("/foo"));
    }
}
