//! Path utility functions for normalization and comparison.

use std::path::{Component, Path, PathBuf};

/// Normalize a path by processing `.` and `..` components lexically.
/// This does not access the filesystem and does not follow symlinks.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !result.pop() {
                    result.push(component);
                }
            }
            _ => result.push(component),
        }
    }
    result
}

/// Check if `path` is `dir` or lies beneath it, comparing normalized components.
///
/// `/opt/pkgs/a-1/../../etc/passwd` is NOT under `/opt/pkgs`.
pub fn is_path_under(path: &Path, dir: &Path) -> bool {
    let path = normalize_path(path);
    let dir = normalize_path(dir);
    path.starts_with(&dir)
}

/// Select the entries of `files` located under `dir`.
pub fn files_under<'a>(files: &'a [PathBuf], dir: &Path) -> Vec<&'a PathBuf> {
    files.iter().filter(|f| is_path_under(f, dir)).collect()
}

/// Resolve a relative path from catalog data beneath `base`.
///
/// Returns `None` for absolute paths or paths escaping `base` via `..`.
pub fn join_contained(base: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    if relative.is_absolute() || relative.has_root() {
        return None;
    }
    let joined = normalize_path(&base.join(relative));
    if joined == normalize_path(base) || !is_path_under(&joined, base) {
        return None;
    }
    Some(joined)
}
