use crate::job::Job;
use crate::runtime::Runtime;
use anyhow::{Context, Result, bail};
use log::{debug, info};
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;

/// Extractor for .zip artifacts. Entries land in the target directory with
/// the archive's own layout, so declared important files keep their paths.
pub struct ZipExtractor;

impl ZipExtractor {
    #[tracing::instrument(skip(self, runtime, job))]
    pub fn extract<R: Runtime + ?Sized>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
        job: &Job,
    ) -> Result<()> {
        debug!("Extracting zip archive to {:?}...", extract_to);
        let mut reader = runtime
            .open(archive_path)
            .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;

        // ZipArchive needs Read + Seek, Runtime::open only gives Read
        let mut buffer = Vec::new();
        reader
            .read_to_end(&mut buffer)
            .with_context(|| format!("Failed to read archive {:?}", archive_path))?;
        let mut archive = ZipArchive::new(std::io::Cursor::new(buffer))
            .with_context(|| format!("Failed to parse ZIP archive {:?}", archive_path))?;

        if archive.len() == 0 {
            bail!("Archive appears to be empty.");
        }

        let total = archive.len();
        for i in 0..total {
            if job.is_cancelled() {
                bail!("Extraction of {:?} was cancelled", archive_path);
            }

            let mut entry = archive
                .by_index(i)
                .with_context(|| format!("Failed to read ZIP entry {}", i))?;

            let Some(entry_path) = entry.enclosed_name() else {
                debug!("Skipping entry with unsafe path {:?}", entry.name());
                continue;
            };
            let full_path = extract_to.join(entry_path);

            if entry.is_dir() {
                runtime.create_dir_all(&full_path)?;
            } else {
                if let Some(parent) = full_path.parent() {
                    runtime.create_dir_all(parent)?;
                }
                let mut dest_file = runtime.create_file(&full_path)?;
                std::io::copy(&mut entry, &mut dest_file)
                    .with_context(|| format!("Failed to extract file {:?}", full_path))?;

                #[cfg(unix)]
                if let Some(mode) = entry.unix_mode()
                    && let Err(e) = runtime.set_permissions(&full_path, mode)
                {
                    debug!("Failed to set permissions on {:?}: {}", full_path, e);
                }
            }

            job.set_progress((i + 1) as f64 / total as f64);
        }

        info!("Extracted {} entries into {:?}", total, extract_to);
        Ok(())
    }
}
