//! Probing which files running processes hold open.

use anyhow::Result;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

use super::RealRuntime;

impl RealRuntime {
    /// Collect open file paths from `/proc/<pid>/fd` and `/proc/<pid>/exe`.
    ///
    /// Processes we may not inspect are skipped. Platforms without procfs
    /// report no open files.
    #[tracing::instrument(skip(self))]
    pub(crate) fn open_files_impl(&self) -> Result<Vec<PathBuf>> {
        let proc_root = Path::new("/proc");
        if !proc_root.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(proc_root)? {
            let Ok(entry) = entry else { continue };
            let is_pid = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.bytes().all(|b| b.is_ascii_digit()));
            if !is_pid {
                continue;
            }

            if let Ok(exe) = fs::read_link(entry.path().join("exe")) {
                files.push(exe);
            }

            let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
                continue;
            };
            for fd in fds.flatten() {
                if let Ok(target) = fs::read_link(fd.path())
                    && target.is_absolute()
                {
                    files.push(target);
                }
            }
        }

        files.sort();
        files.dedup();
        debug!("Found {} open files", files.len());
        Ok(files)
    }

    /// Try to move the directory aside and back. Failing to move it means
    /// some process holds a handle inside it.
    #[tracing::instrument(skip(self))]
    pub(crate) fn is_dir_in_use_impl(&self, dir: &Path) -> bool {
        if !dir.is_dir() {
            return false;
        }
        let Some(name) = dir.file_name() else {
            return false;
        };
        let probe = dir.with_file_name(format!(".{}.probe", name.to_string_lossy()));

        if fs::rename(dir, &probe).is_err() {
            return true;
        }
        if let Err(e) = fs::rename(&probe, dir) {
            debug!("Failed to move {:?} back into place: {}", probe, e);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::{RealRuntime, Runtime};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_is_dir_in_use_free_directory() {
        let runtime = RealRuntime;
        let root = tempdir().unwrap();
        let dir = root.path().join("org.example.Tool-1.0");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("tool.txt"), "x").unwrap();

        assert!(!runtime.is_dir_in_use(&dir));
        assert!(dir.join("tool.txt").exists());
    }

    #[test]
    fn test_is_dir_in_use_missing_directory() {
        let runtime = RealRuntime;
        let root = tempdir().unwrap();
        assert!(!runtime.is_dir_in_use(&root.path().join("missing")));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_open_files_sees_own_handle() {
        let runtime = RealRuntime;
        let root = tempdir().unwrap();
        let path = root.path().join("held.txt");
        let _file = fs::File::create(&path).unwrap();

        let canonical = fs::canonicalize(&path).unwrap();
        let open = runtime.open_files().unwrap();
        assert!(open.contains(&canonical));
    }
}
