//! Probes for software that is present on the system but not installed
//! by this engine.
//!
//! A detector reports what it finds through
//! [`Catalog::version_detected`], which flags the version external.

use anyhow::Result;
use log::debug;
use std::path::Path;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::package::{Package, Version};
use crate::runtime::Runtime;

#[cfg_attr(test, mockall::automock)]
pub trait Detector: Send + Sync {
    /// Human-readable name used in progress hints and errors.
    fn name(&self) -> String;

    fn detect(&self, catalog: &mut Catalog) -> Result<()>;
}

pub const KERNEL_PACKAGE: &str = "org.kernel.Linux";

const OS_RELEASE: &str = "/proc/sys/kernel/osrelease";

/// Reports the running Linux kernel as an external package.
pub struct OperatingSystemDetector<R: Runtime> {
    runtime: Arc<R>,
}

impl<R: Runtime> OperatingSystemDetector<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self { runtime }
    }
}

/// Numeric prefix of a kernel release string, `6.1.0-13-amd64` -> `6.1.0`.
fn version_from_release(release: &str) -> Option<Version> {
    let end = release
        .trim()
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(release.trim().len());
    let prefix = release.trim()[..end].trim_end_matches('.');
    Version::parse(prefix).ok()
}

impl<R: Runtime> Detector for OperatingSystemDetector<R> {
    fn name(&self) -> String {
        "operating system".to_string()
    }

    #[tracing::instrument(skip(self, catalog))]
    fn detect(&self, catalog: &mut Catalog) -> Result<()> {
        let path = Path::new(OS_RELEASE);
        if !self.runtime.exists(path) {
            debug!("{} not available, skipping kernel detection", OS_RELEASE);
            return Ok(());
        }

        let release = self.runtime.read_to_string(path)?;
        let Some(version) = version_from_release(&release) else {
            debug!("Unrecognized kernel release {:?}", release.trim());
            return Ok(());
        };

        let mut package = Package::new(KERNEL_PACKAGE, "Linux kernel");
        package.url = Some("https://www.kernel.org/".to_string());
        package.description = Some("Operating system kernel".to_string());
        catalog.ensure_package(package);
        catalog.version_detected(KERNEL_PACKAGE, &version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use mockall::predicate::eq;
    use std::path::PathBuf;

    #[test]
    fn test_version_from_release() {
        assert_eq!(
            version_from_release("6.1.0-13-amd64\n").map(|v| v.to_string()),
            Some("6.1.0".to_string())
        );
        assert_eq!(
            version_from_release("5.15.").map(|v| v.to_string()),
            Some("5.15".to_string())
        );
        assert!(version_from_release("custom").is_none());
    }

    #[test]
    fn test_detect_registers_external_kernel() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_exists()
            .with(eq(PathBuf::from(OS_RELEASE)))
            .returning(|_| true);
        runtime
            .expect_read_to_string()
            .with(eq(PathBuf::from(OS_RELEASE)))
            .returning(|_| Ok("6.18.44-fc-v139\n".to_string()));

        let mut catalog = Catalog::new();
        OperatingSystemDetector::new(Arc::new(runtime))
            .detect(&mut catalog)
            .unwrap();

        let id = catalog
            .find_package_version(KERNEL_PACKAGE, &Version::parse("6.18.44").unwrap())
            .unwrap();
        assert!(catalog[id].external());
        assert_eq!(catalog.find_package(KERNEL_PACKAGE).unwrap().title, "Linux kernel");
    }

    #[test]
    fn test_detect_without_procfs() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| false);

        let mut catalog = Catalog::new();
        OperatingSystemDetector::new(Arc::new(runtime))
            .detect(&mut catalog)
            .unwrap();
        assert_eq!(catalog.version_ids().count(), 0);
    }
}
