//! The in-memory registry of packages, licenses and package versions.
//!
//! A [`Catalog`] is plain data: loading it from sources lives in
//! [`CatalogLoader`], matching it against the installation root in
//! [`InstallationRoot`]. Every change to what is installed bumps the
//! catalog's generation, which invalidates the cached [`InstallGraph`].

pub mod document;
mod fetch;
mod graph;
mod loader;
mod scan;

use std::collections::{BTreeMap, HashMap};
use std::ops::Index;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::job::JobId;
use crate::package::{License, Package, PackageVersion, PackageVersionId, StateError, Version};

pub use fetch::{CatalogFetcher, SourceFetcher};
#[cfg(test)]
pub use fetch::MockCatalogFetcher;
pub use graph::{GraphNode, InstallGraph, NodeIndex};
pub use loader::CatalogLoader;
pub use scan::InstallationRoot;

/// The catalog shared between the manager, planner and executor.
pub type SharedCatalog = Arc<Mutex<Catalog>>;

/// Lock a shared catalog, recovering from a poisoned mutex.
pub fn lock_catalog(catalog: &SharedCatalog) -> MutexGuard<'_, Catalog> {
    catalog.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct Catalog {
    packages: BTreeMap<String, Package>,
    licenses: BTreeMap<String, License>,
    versions: Vec<PackageVersion>,
    index: HashMap<(String, Version), PackageVersionId>,
    by_package: HashMap<String, Vec<PackageVersionId>>,
    generation: u64,
    graph: Mutex<Option<Arc<InstallGraph>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every package, license and version.
    pub fn clear(&mut self) {
        self.packages.clear();
        self.licenses.clear();
        self.versions.clear();
        self.index.clear();
        self.by_package.clear();
        self.mark_changed();
    }

    /// Counter bumped by every mutation of the installed set.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn mark_changed(&mut self) {
        self.generation += 1;
    }

    // --- Packages and licenses ---

    /// Add a package unless one with the same name exists. Returns whether
    /// it was added.
    pub fn add_package(&mut self, package: Package) -> bool {
        if self.packages.contains_key(&package.name) {
            debug!("Discarding duplicate package {}", package.name);
            return false;
        }
        self.packages.insert(package.name.clone(), package);
        true
    }

    pub fn find_package(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    /// Packages ordered by name.
    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    /// Register a package if the catalog does not know it yet.
    pub fn ensure_package(&mut self, package: Package) {
        if !self.packages.contains_key(&package.name) {
            self.packages.insert(package.name.clone(), package);
        }
    }

    pub fn add_license(&mut self, license: License) -> bool {
        if self.licenses.contains_key(&license.name) {
            debug!("Discarding duplicate license {}", license.name);
            return false;
        }
        self.licenses.insert(license.name.clone(), license);
        true
    }

    pub fn find_license(&self, name: &str) -> Option<&License> {
        self.licenses.get(name)
    }

    pub fn licenses(&self) -> impl Iterator<Item = &License> {
        self.licenses.values()
    }

    // --- Package versions ---

    /// Add a version unless the same (package, version) pair exists.
    /// Returns the new id, or `None` for a discarded duplicate.
    pub fn add_version(&mut self, pv: PackageVersion) -> Option<PackageVersionId> {
        let key = (pv.package.clone(), pv.version.clone());
        if self.index.contains_key(&key) {
            debug!("Discarding duplicate package version {}", pv);
            return None;
        }

        let id = PackageVersionId(self.versions.len());
        self.by_package
            .entry(pv.package.clone())
            .or_default()
            .push(id);
        self.index.insert(key, id);
        self.versions.push(pv);
        self.mark_changed();
        Some(id)
    }

    /// Find the version, creating a bare entry if it does not exist.
    pub fn find_or_insert_version(&mut self, package: &str, version: &Version) -> PackageVersionId {
        if let Some(id) = self.find_package_version(package, version) {
            return id;
        }
        let pv = PackageVersion::new(package, version.normalized());
        let id = PackageVersionId(self.versions.len());
        self.by_package
            .entry(package.to_string())
            .or_default()
            .push(id);
        self.index.insert((package.to_string(), pv.version.clone()), id);
        self.versions.push(pv);
        self.mark_changed();
        id
    }

    pub fn get(&self, id: PackageVersionId) -> Option<&PackageVersion> {
        self.versions.get(id.0)
    }

    /// All version ids in insertion order.
    pub fn version_ids(&self) -> impl Iterator<Item = PackageVersionId> + '_ {
        (0..self.versions.len()).map(PackageVersionId)
    }

    /// Ids of all versions of `package`, in insertion order.
    pub fn versions_of(&self, package: &str) -> &[PackageVersionId] {
        self.by_package
            .get(package)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn find_package_version(&self, package: &str, version: &Version) -> Option<PackageVersionId> {
        self.index
            .get(&(package.to_string(), version.clone()))
            .copied()
    }

    fn newest_where<F>(&self, package: &str, filter: F) -> Option<PackageVersionId>
    where
        F: Fn(&PackageVersion) -> bool,
    {
        self.versions_of(package)
            .iter()
            .copied()
            .filter(|id| filter(&self[*id]))
            .max_by(|a, b| self[*a].version.cmp(&self[*b].version))
    }

    pub fn find_newest_package_version(&self, package: &str) -> Option<PackageVersionId> {
        self.newest_where(package, |_| true)
    }

    pub fn find_newest_installed_package_version(&self, package: &str) -> Option<PackageVersionId> {
        self.newest_where(package, PackageVersion::installed)
    }

    /// Newest version that has a download location.
    pub fn find_newest_installable_package_version(
        &self,
        package: &str,
    ) -> Option<PackageVersionId> {
        self.newest_where(package, PackageVersion::installable)
    }

    /// Versions present on this machine, owned or external.
    pub fn installed(&self) -> Vec<PackageVersionId> {
        self.version_ids()
            .filter(|id| self[*id].installed())
            .collect()
    }

    /// Number of installed versions whose package has a newer version
    /// that is not installed.
    pub fn count_updates(&self) -> usize {
        self.installed()
            .into_iter()
            .filter(|id| {
                let pv = &self[*id];
                self.find_newest_package_version(&pv.package)
                    .map(|newest| &self[newest])
                    .is_some_and(|newest| newest.version > pv.version && !newest.installed())
            })
            .count()
    }

    // --- State changes ---

    /// Register a fact reported by a detector: `package` is present at
    /// `version`. Creates the version if needed and flags it external
    /// unless this engine already owns it. Repeated calls are harmless.
    pub fn version_detected(&mut self, package: &str, version: &Version) -> PackageVersionId {
        let id = self.find_or_insert_version(package, version);
        let before = self.versions[id.0].state();
        self.versions[id.0].mark_external();
        if self.versions[id.0].state() != before {
            debug!("Detected {} externally", self.versions[id.0]);
            self.mark_changed();
        }
        id
    }

    /// Record whether the artifact directory of `id` exists.
    pub(crate) fn set_present(&mut self, id: PackageVersionId, present: bool) {
        let before = self.versions[id.0].state();
        self.versions[id.0].set_present(present);
        if self.versions[id.0].state() != before {
            self.mark_changed();
        }
    }

    pub(crate) fn force_external(&mut self, id: PackageVersionId) {
        let before = self.versions[id.0].state();
        self.versions[id.0].force_external();
        if self.versions[id.0].state() != before {
            self.mark_changed();
        }
    }

    pub(crate) fn lock(&mut self, id: PackageVersionId, job: JobId) -> Result<(), StateError> {
        self.versions[id.0].lock(job)?;
        self.mark_changed();
        Ok(())
    }

    pub(crate) fn unlock(
        &mut self,
        id: PackageVersionId,
        job: JobId,
        present: bool,
    ) -> Result<(), StateError> {
        self.versions[id.0].unlock(job, present)?;
        self.mark_changed();
        Ok(())
    }

    // --- Graph ---

    /// The dependency graph of the installed versions for the current
    /// generation, rebuilt when the catalog changed since the last call.
    pub fn install_graph(&self) -> Arc<InstallGraph> {
        let mut cached = self.graph.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(graph) = cached.as_ref()
            && graph.generation() == self.generation
        {
            return Arc::clone(graph);
        }

        debug!("Rebuilding install graph for generation {}", self.generation);
        let graph = Arc::new(InstallGraph::build(self));
        *cached = Some(Arc::clone(&graph));
        graph
    }
}

impl Index<PackageVersionId> for Catalog {
    type Output = PackageVersion;

    fn index(&self, id: PackageVersionId) -> &PackageVersion {
        &self.versions[id.0]
    }
}
