use anyhow::{Result, anyhow};
use log::{debug, info};

use super::document::CatalogDocument;
use super::{Catalog, CatalogFetcher, InstallationRoot};
use crate::detect::Detector;
use crate::job::Job;
use crate::runtime::Runtime;

/// Share of the load job spent on sources; detection gets the rest.
const SOURCES_WEIGHT: f64 = 0.9;

/// Share of one source spent on downloading it.
const DOWNLOAD_WEIGHT: f64 = 0.9;

/// Builds a fresh catalog from the configured sources, the installation
/// root and the detectors.
pub struct CatalogLoader<'a, R: Runtime + ?Sized> {
    fetcher: &'a dyn CatalogFetcher,
    detectors: &'a [Box<dyn Detector>],
    root: InstallationRoot<'a, R>,
}

impl<'a, R: Runtime + ?Sized> CatalogLoader<'a, R> {
    pub fn new(
        fetcher: &'a dyn CatalogFetcher,
        detectors: &'a [Box<dyn Detector>],
        root: InstallationRoot<'a, R>,
    ) -> Self {
        Self {
            fetcher,
            detectors,
            root,
        }
    }

    /// Load every source in order. The first failing source aborts the
    /// load, its error lands on `job` naming the source. A cancelled load
    /// returns an error but leaves `job` without one.
    #[tracing::instrument(skip(self, job))]
    pub async fn load(&self, sources: &[String], job: &Job) -> Result<Catalog> {
        if sources.is_empty() {
            return Err(fail(job, "No catalog sources defined".to_string()));
        }

        let mut catalog = Catalog::new();
        let count = sources.len();

        for (i, url) in sources.iter().enumerate() {
            job.set_hint(&format!("Catalog source {} of {}", i + 1, count));
            let sub = job.new_sub_job(SOURCES_WEIGHT / count as f64);
            if let Err(e) = self.load_one(url, &sub, &mut catalog).await {
                return Err(fail(
                    job,
                    format!("Error loading the catalog source {}: {:#}", url, e),
                ));
            }

            if job.is_cancelled() {
                return Err(cancelled());
            }
        }

        job.set_hint("Detecting installed software");
        let detection = job.new_sub_job(1.0 - SOURCES_WEIGHT);
        if let Err(e) = self.root.refresh(&mut catalog) {
            return Err(fail(
                job,
                format!(
                    "Error scanning the installation root {:?}: {:#}",
                    self.root.path(),
                    e
                ),
            ));
        }

        let detectors = self.detectors.len().max(1);
        for (i, detector) in self.detectors.iter().enumerate() {
            if job.is_cancelled() {
                return Err(cancelled());
            }
            detection.set_hint(&format!("Detecting {}", detector.name()));
            if let Err(e) = detector.detect(&mut catalog) {
                return Err(fail(
                    job,
                    format!("Error detecting {}: {:#}", detector.name(), e),
                ));
            }
            detection.set_progress((i + 1) as f64 / detectors as f64);
        }
        detection.complete();

        info!(
            "Loaded {} packages and {} package versions from {} sources",
            catalog.packages().count(),
            catalog.version_ids().count(),
            count
        );
        job.complete();
        Ok(catalog)
    }

    async fn load_one(&self, url: &str, job: &Job, catalog: &mut Catalog) -> Result<()> {
        debug!("Loading catalog source {}", url);
        job.set_hint("Downloading");
        let download = job.new_sub_job(DOWNLOAD_WEIGHT);
        let text = self.fetcher.fetch(url, &download).await?;
        download.complete();

        job.set_hint("Parsing");
        let document = CatalogDocument::parse(&text)?;
        document.merge_into(catalog);
        job.complete();
        Ok(())
    }
}

fn fail(job: &Job, message: String) -> anyhow::Error {
    job.set_error_message(&message);
    anyhow!(message)
}

fn cancelled() -> anyhow::Error {
    anyhow!("Loading the catalog was cancelled")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fetch::MockCatalogFetcher;
    use crate::detect::MockDetector;
    use crate::package::{Package, Version};
    use crate::runtime::RealRuntime;
    use mockall::predicate::eq;
    use std::fs;
    use tempfile::tempdir;

    const SOURCE_A: &str = r#"{
        "packages": [{"name": "org.example.Tool", "title": "Tool from A"}],
        "versions": [{"package": "org.example.Tool", "name": "1.0", "url": "https://a.example.org/tool.zip"}]
    }"#;

    const SOURCE_B: &str = r#"{
        "packages": [{"name": "org.example.Tool", "title": "Tool from B"},
                     {"name": "org.example.Lib", "title": "Lib"}],
        "versions": [{"package": "org.example.Tool", "name": "1.0", "url": "https://b.example.org/tool.zip"},
                     {"package": "org.example.Lib", "name": "2.0"}]
    }"#;

    fn sources() -> Vec<String> {
        vec!["https://a.example.org".to_string(), "https://b.example.org".to_string()]
    }

    fn fetcher_serving(docs: &'static [(&'static str, &'static str)]) -> MockCatalogFetcher {
        let mut fetcher = MockCatalogFetcher::new();
        for (url, body) in docs {
            fetcher
                .expect_fetch()
                .with(eq(*url), mockall::predicate::always())
                .returning(move |_, _| Ok(body.to_string()));
        }
        fetcher
    }

    #[tokio::test]
    async fn test_first_source_wins() {
        let root = tempdir().unwrap();
        let fetcher = fetcher_serving(&[
            ("https://a.example.org", SOURCE_A),
            ("https://b.example.org", SOURCE_B),
        ]);
        let loader = CatalogLoader::new(&fetcher, &[], InstallationRoot::new(&RealRuntime, root.path()));

        let job = Job::new();
        let catalog = loader.load(&sources(), &job).await.unwrap();

        assert_eq!(catalog.find_package("org.example.Tool").unwrap().title, "Tool from A");
        assert!(catalog.find_package("org.example.Lib").is_some());
        let tool = catalog
            .find_package_version("org.example.Tool", &Version::parse("1").unwrap())
            .unwrap();
        assert_eq!(
            catalog[tool].download.as_deref(),
            Some("https://a.example.org/tool.zip")
        );
        assert!(job.is_completed());
        assert!((job.progress() - 1.0).abs() < 1e-9);
        assert!(job.error_message().is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_failing_source_stops_the_load() {
        let root = tempdir().unwrap();
        let mut fetcher = MockCatalogFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_, _| Err(anyhow!("connection refused")));

        let loader = CatalogLoader::new(&fetcher, &[], InstallationRoot::new(&RealRuntime, root.path()));
        let job = Job::new();
        let result = loader.load(&sources(), &job).await;

        assert!(result.is_err());
        assert_eq!(
            job.error_message().as_deref(),
            Some("Error loading the catalog source https://a.example.org: connection refused")
        );
    }

    #[tokio::test]
    async fn test_parse_error_names_source() {
        let root = tempdir().unwrap();
        let fetcher = fetcher_serving(&[
            ("https://a.example.org", SOURCE_A),
            ("https://b.example.org", "not json"),
        ]);
        let loader = CatalogLoader::new(&fetcher, &[], InstallationRoot::new(&RealRuntime, root.path()));
        let job = Job::new();

        assert!(loader.load(&sources(), &job).await.is_err());
        let message = job.error_message().unwrap();
        assert!(message.starts_with("Error loading the catalog source https://b.example.org:"));
    }

    #[tokio::test]
    async fn test_no_sources() {
        let fetcher = MockCatalogFetcher::new();
        let loader = CatalogLoader::new(&fetcher, &[], InstallationRoot::new(&RealRuntime, "/nonexistent"));
        let job = Job::new();

        assert!(loader.load(&[], &job).await.is_err());
        assert_eq!(job.error_message().as_deref(), Some("No catalog sources defined"));
    }

    #[tokio::test]
    async fn test_scan_and_detectors_run_after_sources() {
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join("org.example.Tool-1")).unwrap();
        fs::create_dir(root.path().join("org.example.Extra-0.5")).unwrap();

        let fetcher = fetcher_serving(&[("https://a.example.org", SOURCE_A)]);
        let mut detector = MockDetector::new();
        detector.expect_name().return_const("runtime".to_string());
        detector.expect_detect().times(1).returning(|catalog| {
            catalog.ensure_package(Package::new("org.example.Runtime", "Runtime"));
            catalog.version_detected("org.example.Runtime", &Version::parse("8").unwrap());
            Ok(())
        });
        let detectors: Vec<Box<dyn Detector>> = vec![Box::new(detector)];

        let loader = CatalogLoader::new(&fetcher, &detectors, InstallationRoot::new(&RealRuntime, root.path()));
        let catalog = loader
            .load(&["https://a.example.org".to_string()], &Job::new())
            .await
            .unwrap();

        let installed: Vec<String> = catalog
            .installed()
            .into_iter()
            .map(|id| catalog[id].to_string())
            .collect();
        assert_eq!(
            installed,
            vec!["org.example.Tool 1", "org.example.Extra 0.5", "org.example.Runtime 8"]
        );
    }

    #[tokio::test]
    async fn test_detector_failure_names_detector() {
        let root = tempdir().unwrap();
        let fetcher = fetcher_serving(&[("https://a.example.org", SOURCE_A)]);
        let mut detector = MockDetector::new();
        detector.expect_name().return_const("runtime".to_string());
        detector
            .expect_detect()
            .returning(|_| Err(anyhow!("probe crashed")));
        let detectors: Vec<Box<dyn Detector>> = vec![Box::new(detector)];

        let loader = CatalogLoader::new(&fetcher, &detectors, InstallationRoot::new(&RealRuntime, root.path()));
        let job = Job::new();
        assert!(
            loader
                .load(&["https://a.example.org".to_string()], &job)
                .await
                .is_err()
        );
        assert_eq!(
            job.error_message().as_deref(),
            Some("Error detecting runtime: probe crashed")
        );
    }

    #[tokio::test]
    async fn test_cancelled_load_has_no_error() {
        let root = tempdir().unwrap();
        let fetcher = fetcher_serving(&[("https://a.example.org", SOURCE_A)]);
        let loader = CatalogLoader::new(&fetcher, &[], InstallationRoot::new(&RealRuntime, root.path()));
        let job = Job::new();
        job.cancel();

        assert!(loader.load(&sources(), &job).await.is_err());
        assert!(job.error_message().is_none());
    }
}
