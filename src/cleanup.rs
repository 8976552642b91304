use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Paths that must not survive an interrupted install: partially
/// unpacked artifact directories and temporary downloads.
#[derive(Default)]
pub struct CleanupContext {
    #[cfg(test)]
    pub paths: Vec<PathBuf>,
    #[cfg(not(test))]
    paths: Vec<PathBuf>,
}

impl CleanupContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    pub fn remove(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
    }

    /// Delete every registered path and forget them.
    pub fn cleanup(&mut self) {
        for path in self.paths.drain(..) {
            remove_path(&path);
        }
    }
}

fn remove_path(path: &Path) {
    debug!("Cleaning up: {:?}", path);
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else if path.exists() {
        std::fs::remove_file(path)
    } else {
        Ok(())
    };
    if let Err(e) = result {
        warn!("Failed to clean up {:?}: {}", path, e);
    }
}

pub type SharedCleanupContext = Arc<Mutex<CleanupContext>>;

pub fn new_shared() -> SharedCleanupContext {
    Arc::new(Mutex::new(CleanupContext::new()))
}

fn lock(ctx: &SharedCleanupContext) -> MutexGuard<'_, CleanupContext> {
    ctx.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registers a path for cleanup and deletes it when dropped, unless the
/// operation was marked successful.
pub struct CleanupGuard {
    ctx: SharedCleanupContext,
    path: PathBuf,
    armed: bool,
}

impl CleanupGuard {
    pub fn new(ctx: SharedCleanupContext, path: PathBuf) -> Self {
        lock(&ctx).add(path.clone());
        Self {
            ctx,
            path,
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the path and drop it from the cleanup list.
    pub fn success(mut self) {
        self.armed = false;
        lock(&self.ctx).remove(&self.path);
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.armed {
            lock(&self.ctx).remove(&self.path);
            remove_path(&self.path);
        }
    }
}
