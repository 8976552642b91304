use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use log::{debug, info};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::ZipExtractor;
use crate::cleanup::{CleanupGuard, SharedCleanupContext};
use crate::executor::InstallRoutine;
use crate::http::HttpClient;
use crate::job::Job;
use crate::package::{ArchiveType, PackageVersion};
use crate::runtime::{Runtime, join_contained};

const DOWNLOAD_WEIGHT: f64 = 0.7;
const UNPACK_WEIGHT: f64 = 0.2;

/// Downloads the artifact, checks its SHA-256 and lays it out in the
/// artifact directory. Anything created is removed again if a step fails.
pub struct DefaultInstallRoutine<R: Runtime> {
    runtime: Arc<R>,
    http: HttpClient,
    extractor: ZipExtractor,
    cleanup: SharedCleanupContext,
}

impl<R: Runtime> DefaultInstallRoutine<R> {
    pub fn new(runtime: Arc<R>, http: HttpClient, cleanup: SharedCleanupContext) -> Self {
        Self {
            runtime,
            http,
            extractor: ZipExtractor,
            cleanup,
        }
    }

    async fn download(&self, url: &str, to: &Path, job: &Job) -> Result<()> {
        let runtime = &self.runtime;
        self.http
            .download_file(url, || runtime.create_file(to), job)
            .await
            .with_context(|| format!("Failed to download {}", url))?;
        job.complete();
        Ok(())
    }

    fn verify(&self, file: &Path, expected: &str) -> Result<()> {
        let mut reader = self.runtime.open(file)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut reader, &mut hasher)
            .with_context(|| format!("Failed to read {:?}", file))?;
        let actual = hex::encode(hasher.finalize());
        if !actual.eq_ignore_ascii_case(expected) {
            bail!("SHA-256 mismatch: expected {}, got {}", expected, actual);
        }
        debug!("SHA-256 verified for {:?}", file);
        Ok(())
    }

    fn unpack(&self, pv: &PackageVersion, url: &str, download: &Path, dir: &Path, job: &Job) -> Result<()> {
        match pv.archive_type {
            ArchiveType::Zip => self.extractor.extract(&*self.runtime, download, dir, job)?,
            ArchiveType::OneFile => {
                let name = file_name_from_url(url)
                    .ok_or_else(|| anyhow!("Cannot derive a file name from {}", url))?;
                let target = join_contained(dir, &name)
                    .ok_or_else(|| anyhow!("Invalid file name {:?} in {}", name, url))?;
                self.runtime.copy(download, &target)?;
            }
        }
        job.complete();
        Ok(())
    }

    fn write_embedded(&self, pv: &PackageVersion, dir: &Path) -> Result<()> {
        for file in &pv.files {
            let target = join_contained(dir, &file.path)
                .ok_or_else(|| anyhow!("Embedded file {:?} escapes the package directory", file.path))?;
            if let Some(parent) = target.parent() {
                self.runtime.create_dir_all(parent)?;
            }
            self.runtime
                .write(&target, file.content.as_bytes())
                .with_context(|| format!("Failed to write {:?}", target))?;
        }
        Ok(())
    }
}

/// Last path segment of `url` without query or fragment.
fn file_name_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next()?;
    if name.is_empty() || name.contains(':') {
        return None;
    }
    Some(name.to_string())
}

#[async_trait]
impl<R: Runtime> InstallRoutine for DefaultInstallRoutine<R> {
    #[tracing::instrument(skip(self, pv, job))]
    async fn install(&self, pv: &PackageVersion, directory: &Path, job: &Job) -> Result<()> {
        let url = pv
            .download
            .as_deref()
            .ok_or_else(|| anyhow!("{} has no download URL", pv))?;
        if self.runtime.exists(directory) {
            bail!("The directory {:?} already exists", directory);
        }
        let root = directory
            .parent()
            .ok_or_else(|| anyhow!("Invalid package directory {:?}", directory))?;
        self.runtime
            .create_dir_all(root)
            .with_context(|| format!("Failed to create installation root {:?}", root))?;

        let download_path: PathBuf = root.join(format!(".{}.download", pv.directory_name()));
        let download = CleanupGuard::new(self.cleanup.clone(), download_path);

        job.set_hint("Downloading");
        self.download(url, download.path(), &job.new_sub_job(DOWNLOAD_WEIGHT))
            .await?;
        if let Some(expected) = &pv.hash {
            self.verify(download.path(), expected)?;
        }
        if job.is_cancelled() {
            bail!("Installation of {} was cancelled", pv);
        }

        let target = CleanupGuard::new(self.cleanup.clone(), directory.to_path_buf());
        self.runtime
            .create_dir_all(directory)
            .with_context(|| format!("Failed to create {:?}", directory))?;

        job.set_hint("Unpacking");
        self.unpack(pv, url, download.path(), directory, &job.new_sub_job(UNPACK_WEIGHT))?;
        self.write_embedded(pv, directory)?;

        target.success();
        drop(download);
        info!("Installed {} into {:?}", pv, directory);
        job.complete();
        Ok(())
    }

    #[tracing::instrument(skip(self, pv, job))]
    async fn uninstall(&self, pv: &PackageVersion, directory: &Path, job: &Job) -> Result<()> {
        if self.runtime.exists(directory) {
            job.set_hint("Deleting files");
            self.runtime
                .remove_dir_all(directory)
                .with_context(|| format!("Failed to delete {:?}", directory))?;
            info!("Removed {} from {:?}", pv, directory);
        } else {
            debug!("{:?} is already gone", directory);
        }
        job.complete();
        Ok(())
    }
}
