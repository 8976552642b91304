//! The top-level context handed to front ends.

use anyhow::Result;
use log::info;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::catalog::{
    Catalog, CatalogFetcher, CatalogLoader, InstallationRoot, SharedCatalog, SourceFetcher,
    lock_catalog,
};
use crate::cleanup::{self, SharedCleanupContext};
use crate::detect::{Detector, OperatingSystemDetector};
use crate::executor::{Executor, InstallRoutine, ProcessError};
use crate::http::HttpClient;
use crate::install::DefaultInstallRoutine;
use crate::job::Job;
use crate::package::{PackageVersion, PackageVersionId, Version};
use crate::plan::{InstallOperation, PlanError, Planner, Selection};
use crate::runtime::Runtime;

/// Owns the catalog and everything needed to load it, plan against it and
/// carry out plans. Callers run one load/plan/process sequence at a time.
pub struct PackageManager<R: Runtime> {
    runtime: Arc<R>,
    catalog: SharedCatalog,
    root: PathBuf,
    sources: Vec<String>,
    fetcher: Box<dyn CatalogFetcher>,
    detectors: Vec<Box<dyn Detector>>,
    routine: Box<dyn InstallRoutine>,
    cleanup: SharedCleanupContext,
}

impl<R: Runtime + 'static> PackageManager<R> {
    /// A manager wired with the network fetcher, the operating-system
    /// detector and the default install routine.
    pub fn new(runtime: Arc<R>, root: PathBuf, sources: Vec<String>, http: HttpClient) -> Self {
        let cleanup = cleanup::new_shared();
        let fetcher = Box::new(SourceFetcher::new(Arc::clone(&runtime), http.clone()));
        let detectors: Vec<Box<dyn Detector>> =
            vec![Box::new(OperatingSystemDetector::new(Arc::clone(&runtime)))];
        let routine = Box::new(DefaultInstallRoutine::new(
            Arc::clone(&runtime),
            http,
            cleanup.clone(),
        ));
        Self::with_parts(runtime, root, sources, fetcher, detectors, routine, cleanup)
    }

    pub fn with_parts(
        runtime: Arc<R>,
        root: PathBuf,
        sources: Vec<String>,
        fetcher: Box<dyn CatalogFetcher>,
        detectors: Vec<Box<dyn Detector>>,
        routine: Box<dyn InstallRoutine>,
        cleanup: SharedCleanupContext,
    ) -> Self {
        Self {
            runtime,
            catalog: Arc::new(Mutex::new(Catalog::new())),
            root,
            sources,
            fetcher,
            detectors,
            routine,
            cleanup,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    /// Paths to remove if the process is interrupted mid-install.
    pub fn cleanup_context(&self) -> SharedCleanupContext {
        self.cleanup.clone()
    }

    /// Run `f` with the catalog locked.
    pub fn with_catalog<T>(&self, f: impl FnOnce(&Catalog) -> T) -> T {
        f(&lock_catalog(&self.catalog))
    }

    /// Reload the catalog from the sources. On failure the previous
    /// catalog stays in place.
    #[tracing::instrument(skip(self, job))]
    pub async fn load(&self, job: &Job) -> Result<()> {
        let loader = CatalogLoader::new(
            &*self.fetcher,
            &self.detectors,
            InstallationRoot::new(&*self.runtime, &self.root),
        );
        let catalog = loader.load(&self.sources, job).await?;
        *lock_catalog(&self.catalog) = catalog;
        info!("Catalog reloaded from {} sources", self.sources.len());
        Ok(())
    }

    /// Rescan the installation root and list everything installed,
    /// including external versions.
    #[tracing::instrument(skip(self))]
    pub fn get_installed(&self) -> Result<Vec<PackageVersionId>> {
        let mut catalog = lock_catalog(&self.catalog);
        InstallationRoot::new(&*self.runtime, &self.root).refresh(&mut catalog)?;
        Ok(catalog.installed())
    }

    pub fn plan_install(&self, selections: &[Selection]) -> Result<Vec<InstallOperation>, PlanError> {
        let catalog = lock_catalog(&self.catalog);
        Planner::new(&catalog).plan_install_selection(selections)
    }

    pub fn plan_uninstall(&self, selections: &[Selection]) -> Result<Vec<InstallOperation>, PlanError> {
        let catalog = lock_catalog(&self.catalog);
        Planner::new(&catalog).plan_uninstall_selection(selections)
    }

    pub fn plan_update(&self, selections: &[Selection]) -> Result<Vec<InstallOperation>, PlanError> {
        let catalog = lock_catalog(&self.catalog);
        Planner::new(&catalog).plan_update_selection(selections)
    }

    /// Validate and run `ops`, see [`Executor::process`].
    pub async fn process(&self, ops: Vec<InstallOperation>, job: &Job) -> Result<(), ProcessError> {
        Executor::new(&*self.runtime, &self.catalog, &*self.routine, &self.root)
            .process(ops, job)
            .await
    }

    pub fn package_version(&self, id: PackageVersionId) -> Option<PackageVersion> {
        lock_catalog(&self.catalog).get(id).cloned()
    }

    pub fn find_package_version(&self, package: &str, version: &Version) -> Option<PackageVersionId> {
        lock_catalog(&self.catalog).find_package_version(package, version)
    }

    pub fn find_newest_installed_package_version(&self, package: &str) -> Option<PackageVersionId> {
        lock_catalog(&self.catalog).find_newest_installed_package_version(package)
    }

    pub fn find_newest_installable_package_version(&self, package: &str) -> Option<PackageVersionId> {
        lock_catalog(&self.catalog).find_newest_installable_package_version(package)
    }
}
