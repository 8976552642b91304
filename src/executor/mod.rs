//! Running planned operations.
//!
//! A batch is validated as a whole before anything runs: no target may be
//! locked or external, and nothing may hold files or handles inside a
//! directory that is about to be removed. Execution then runs the operations in order and
//! stops at the first failure. Steps that already ran stay applied.

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::catalog::{SharedCatalog, lock_catalog};
use crate::job::Job;
use crate::package::{PackageVersion, PackageVersionId, StateError};
use crate::plan::InstallOperation;
use crate::runtime::{Runtime, files_under};

/// Puts an artifact's files in place or removes them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstallRoutine: Send + Sync {
    /// Create `directory` with the artifact's content.
    async fn install(&self, pv: &PackageVersion, directory: &Path, job: &Job) -> Result<()>;

    /// Remove `directory` and everything below it.
    async fn uninstall(&self, pv: &PackageVersion, directory: &Path, job: &Job) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
    #[error("Unknown package version {0}")]
    UnknownVersion(PackageVersionId),

    #[error("{0} is locked by a currently running installation/removal")]
    Locked(String),

    #[error("{0} is managed outside of this installation and cannot be installed or uninstalled")]
    External(String),

    #[error("Cannot uninstall {package}: the following files are in use: {}", .files.join(", "))]
    FilesInUse { package: String, files: Vec<String> },

    #[error("Cannot uninstall {package}: the directory {directory} is in use")]
    DirectoryInUse { package: String, directory: String },

    #[error("Cannot determine which files are in use: {0}")]
    OpenFilesUnavailable(String),

    #[error("{0}")]
    Failed(String),

    #[error("The operation was cancelled")]
    Cancelled,
}

impl From<StateError> for ProcessError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::AlreadyLocked { package, .. } => ProcessError::Locked(package),
            StateError::External(package) => ProcessError::External(package),
            e @ StateError::NotLockedBy { .. } => ProcessError::Failed(e.to_string()),
        }
    }
}

struct Step {
    op: InstallOperation,
    pv: PackageVersion,
    directory: PathBuf,
}

pub struct Executor<'a, R: Runtime + ?Sized> {
    runtime: &'a R,
    catalog: &'a SharedCatalog,
    routine: &'a dyn InstallRoutine,
    root: &'a Path,
}

/// Move the uninstall of an update pair ahead of the install, so the old
/// version is gone before the new one lands.
pub fn reorder(catalog: &SharedCatalog, ops: &mut [InstallOperation]) {
    if let [first, second] = ops
        && first.install
        && !second.install
    {
        let catalog = lock_catalog(catalog);
        let same_package = match (catalog.get(first.package_version), catalog.get(second.package_version)) {
            (Some(a), Some(b)) => a.package == b.package,
            _ => false,
        };
        if same_package {
            debug!("Running the uninstall of {} first", catalog[second.package_version]);
            ops.swap(0, 1);
        }
    }
}

impl<'a, R: Runtime + ?Sized> Executor<'a, R> {
    pub fn new(
        runtime: &'a R,
        catalog: &'a SharedCatalog,
        routine: &'a dyn InstallRoutine,
        root: &'a Path,
    ) -> Self {
        Self {
            runtime,
            catalog,
            routine,
            root,
        }
    }

    /// Validate and run `ops` under `job`. Every failure except
    /// cancellation is also reported as the job's error message, and the
    /// job is completed either way.
    #[tracing::instrument(skip(self, ops, job))]
    pub async fn process(&self, mut ops: Vec<InstallOperation>, job: &Job) -> Result<(), ProcessError> {
        reorder(self.catalog, &mut ops);

        let result = self.process_ordered(&ops, job).await;
        match &result {
            Ok(()) => job.complete(),
            Err(ProcessError::Cancelled) => {}
            Err(e) => {
                job.set_error_message(&e.to_string());
                job.complete();
            }
        }
        result
    }

    async fn process_ordered(&self, ops: &[InstallOperation], job: &Job) -> Result<(), ProcessError> {
        let steps = self.validate(ops)?;
        let count = steps.len();

        for step in steps {
            if job.is_cancelled() {
                info!("Processing cancelled before {}", step.pv);
                return Err(ProcessError::Cancelled);
            }

            let sub = job.new_sub_job(1.0 / count as f64);
            self.run_step(&step, job, &sub).await?;
            sub.complete();
        }
        Ok(())
    }

    /// Check every operation before any of them runs.
    fn validate(&self, ops: &[InstallOperation]) -> Result<Vec<Step>, ProcessError> {
        let steps = {
            let catalog = lock_catalog(self.catalog);
            let mut steps = Vec::with_capacity(ops.len());
            for op in ops {
                let pv = catalog
                    .get(op.package_version)
                    .ok_or(ProcessError::UnknownVersion(op.package_version))?;
                if pv.is_locked() {
                    return Err(ProcessError::Locked(pv.to_string()));
                }
                if pv.external() {
                    return Err(ProcessError::External(pv.to_string()));
                }
                steps.push(Step {
                    op: *op,
                    directory: self.root.join(pv.directory_name()),
                    pv: pv.clone(),
                });
            }
            steps
        };

        let removals: Vec<&Step> = steps.iter().filter(|s| !s.op.install).collect();
        if removals.is_empty() {
            return Ok(steps);
        }

        let open_files = self
            .runtime
            .open_files()
            .map_err(|e| ProcessError::OpenFilesUnavailable(format!("{:#}", e)))?;
        for step in &removals {
            // Open files are reported with absolute, resolved paths.
            let directory = self
                .runtime
                .canonicalize(&step.directory)
                .unwrap_or_else(|_| step.directory.clone());
            let busy = files_under(&open_files, &directory);
            if !busy.is_empty() {
                return Err(ProcessError::FilesInUse {
                    package: step.pv.to_string(),
                    files: busy.iter().map(|f| f.display().to_string()).collect(),
                });
            }
        }

        for step in &removals {
            if self.runtime.is_dir_in_use(&step.directory) {
                return Err(ProcessError::DirectoryInUse {
                    package: step.pv.to_string(),
                    directory: step.directory.display().to_string(),
                });
            }
        }

        Ok(steps)
    }

    async fn run_step(&self, step: &Step, owner: &Job, job: &Job) -> Result<(), ProcessError> {
        let id = step.op.package_version;
        let verb = if step.op.install { "Installing" } else { "Uninstalling" };
        job.set_hint(&format!("{} {}", verb, step.pv));

        lock_catalog(self.catalog).lock(id, owner.id())?;

        let result = if step.op.install {
            self.routine.install(&step.pv, &step.directory, job).await
        } else {
            self.routine.uninstall(&step.pv, &step.directory, job).await
        };

        let present = self.runtime.is_dir(&step.directory);
        if let Err(e) = lock_catalog(self.catalog).unlock(id, owner.id(), present) {
            warn!("Failed to release {}: {}", step.pv, e);
        }

        match result {
            Ok(()) => {
                info!("{} {} done", verb, step.pv);
                Ok(())
            }
            Err(e) => {
                let action = if step.op.install { "installing" } else { "uninstalling" };
                let message = format!("Error {} {}: {:#}", action, step.pv, e);
                job.set_error_message(&message);
                if owner.is_cancelled() {
                    return Err(ProcessError::Cancelled);
                }
                Err(ProcessError::Failed(message))
            }
        }
    }
}
