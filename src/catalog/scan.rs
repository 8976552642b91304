//! Matching the catalog against the installation root.
//!
//! Every installed artifact owns one directory named `<package>-<version>`
//! directly under the root. Its presence is what "installed" means for
//! versions this engine manages.

use anyhow::{Context, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};

use super::Catalog;
use crate::package::{Package, PackageVersion, Version, is_valid_package_name};
use crate::runtime::Runtime;

pub struct InstallationRoot<'a, R: Runtime + ?Sized> {
    runtime: &'a R,
    path: PathBuf,
}

impl<'a, R: Runtime + ?Sized> InstallationRoot<'a, R> {
    pub fn new(runtime: &'a R, path: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory owned by `pv` under this root.
    pub fn directory_of(&self, pv: &PackageVersion) -> PathBuf {
        self.path.join(pv.directory_name())
    }

    /// Bring the installed flags of `catalog` in line with the directories
    /// on disk and register directories the catalog does not know.
    #[tracing::instrument(skip(self, catalog))]
    pub fn refresh(&self, catalog: &mut Catalog) -> Result<()> {
        let ids: Vec<_> = catalog.version_ids().collect();
        for id in ids {
            let pv = &catalog[id];
            if pv.external() || pv.is_locked() {
                continue;
            }
            let present = self.runtime.is_dir(&self.directory_of(pv));
            catalog.set_present(id, present);
        }

        self.add_unknown_existing(catalog)?;
        Ok(())
    }

    /// Register `<package>-<version>` directories missing from the catalog.
    /// Directories whose version is not written canonically are kept as
    /// external, since their name does not match the one this engine would
    /// create, unless the canonical directory exists as well. Returns the
    /// number of newly registered versions.
    #[tracing::instrument(skip(self, catalog))]
    pub fn add_unknown_existing(&self, catalog: &mut Catalog) -> Result<usize> {
        if !self.runtime.is_dir(&self.path) {
            debug!("Installation root {:?} does not exist yet", self.path);
            return Ok(0);
        }

        let entries = self
            .runtime
            .read_dir(&self.path)
            .with_context(|| format!("Failed to read installation root {:?}", self.path))?;

        let mut added = 0;
        for entry in entries {
            let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') || !self.runtime.is_dir(&entry) {
                continue;
            }
            let Some((package, version_text)) = name.split_once('-') else {
                continue;
            };
            if !is_valid_package_name(package) {
                continue;
            }
            let Ok(version) = Version::parse(version_text) else {
                debug!("Ignoring directory {:?} with unparsable version", entry);
                continue;
            };

            if catalog.find_package(package).is_none() {
                catalog.ensure_package(Package::new(
                    package,
                    &format!("{} (unknown in current catalogs)", package),
                ));
            }

            let known = catalog.find_package_version(package, &version).is_some();
            let id = catalog.find_or_insert_version(package, &version);
            if !known {
                info!("Found unknown installed package {} {}", package, version_text);
                added += 1;
            }

            if version.normalized().to_string() == version_text {
                catalog.set_present(id, true);
            } else if !self.runtime.is_dir(&self.directory_of(&catalog[id])) {
                catalog.force_external(id);
            }
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::package::ArtifactState;
    use crate::runtime::RealRuntime;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_refresh_marks_present_directories() {
        let root = tempdir().unwrap();
        let mut catalog = Catalog::new();
        let present = add(&mut catalog, "org.example.Tool", "1.2", &[]);
        let absent = add(&mut catalog, "org.example.Tool", "2.0", &[]);
        fs::create_dir(root.path().join("org.example.Tool-1.2")).unwrap();

        InstallationRoot::new(&RealRuntime, root.path())
            .refresh(&mut catalog)
            .unwrap();

        assert_eq!(catalog[present].state(), ArtifactState::Installed);
        assert_eq!(catalog[absent].state(), ArtifactState::Idle);
    }

    #[test]
    fn test_refresh_notices_removed_directory() {
        let root = tempdir().unwrap();
        let mut catalog = Catalog::new();
        let id = add_installed(&mut catalog, "org.example.Tool", "1", &[]);

        InstallationRoot::new(&RealRuntime, root.path())
            .refresh(&mut catalog)
            .unwrap();

        assert!(!catalog[id].installed());
    }

    #[test]
    fn test_unknown_directories_are_registered() {
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join("org.example.Extra-3.1")).unwrap();
        fs::create_dir(root.path().join("org.example.Legacy-2.0")).unwrap();
        fs::create_dir(root.path().join("not a package")).unwrap();
        fs::create_dir(root.path().join(".org.example.Extra-3.1.probe")).unwrap();
        fs::write(root.path().join("org.example.File-1"), "").unwrap();

        let mut catalog = Catalog::new();
        let added = InstallationRoot::new(&RealRuntime, root.path())
            .add_unknown_existing(&mut catalog)
            .unwrap();
        assert_eq!(added, 2);

        let extra = catalog
            .find_package_version("org.example.Extra", &v("3.1"))
            .unwrap();
        assert_eq!(catalog[extra].state(), ArtifactState::Installed);
        assert_eq!(
            catalog.find_package("org.example.Extra").unwrap().title,
            "org.example.Extra (unknown in current catalogs)"
        );

        let legacy = catalog
            .find_package_version("org.example.Legacy", &v("2"))
            .unwrap();
        assert!(catalog[legacy].external());
        assert!(catalog.find_package("org.example.File").is_none());
    }

    #[test]
    fn test_canonical_directory_wins_over_spelling_variant() {
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join("org.example.Tool-1")).unwrap();
        fs::create_dir(root.path().join("org.example.Tool-1.0")).unwrap();

        let mut catalog = Catalog::new();
        InstallationRoot::new(&RealRuntime, root.path())
            .add_unknown_existing(&mut catalog)
            .unwrap();

        let id = catalog.find_package_version("org.example.Tool", &v("1")).unwrap();
        assert_eq!(catalog[id].state(), ArtifactState::Installed);

        // A second scan visits the same directories again.
        InstallationRoot::new(&RealRuntime, root.path())
            .refresh(&mut catalog)
            .unwrap();
        assert_eq!(catalog[id].state(), ArtifactState::Installed);
    }

    #[test]
    fn test_known_package_keeps_its_title() {
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join("org.example.Tool-1.5")).unwrap();
        let mut catalog = Catalog::new();
        add(&mut catalog, "org.example.Tool", "1.0", &[]);

        InstallationRoot::new(&RealRuntime, root.path())
            .refresh(&mut catalog)
            .unwrap();

        assert_eq!(catalog.find_package("org.example.Tool").unwrap().title, "org.example.Tool");
        let id = catalog.find_package_version("org.example.Tool", &v("1.5")).unwrap();
        assert!(catalog[id].installed());
        assert!(!catalog[id].installable());
    }

    #[test]
    fn test_missing_root_is_empty() {
        let root = tempdir().unwrap();
        let mut catalog = Catalog::new();
        let added = InstallationRoot::new(&RealRuntime, root.path().join("missing"))
            .add_unknown_existing(&mut catalog)
            .unwrap();
        assert_eq!(added, 0);
    }
}
