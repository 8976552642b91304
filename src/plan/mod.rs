//! Turning selections into ordered install and uninstall operations.
//!
//! Planning works on a simulated installed set so that one batch can
//! combine several requests: every planned install is added to the set and
//! every planned uninstall removed from it, and later requests see the
//! result. Dependencies are always planned ahead of the versions that need
//! them.

use std::collections::BTreeSet;
use std::fmt;

use log::debug;
use thiserror::Error;

use crate::catalog::Catalog;
use crate::package::PackageVersionId;

/// Versions considered installed while a batch is being planned.
pub type InstalledSet = BTreeSet<PackageVersionId>;

/// One planned action on one package version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallOperation {
    pub package_version: PackageVersionId,
    /// `true` installs, `false` uninstalls.
    pub install: bool,
}

impl InstallOperation {
    pub fn install(package_version: PackageVersionId) -> Self {
        Self {
            package_version,
            install: true,
        }
    }

    pub fn uninstall(package_version: PackageVersionId) -> Self {
        Self {
            package_version,
            install: false,
        }
    }
}

/// What the user picked: a whole package or one concrete version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Package(String),
    PackageVersion(PackageVersionId),
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Package(name) => write!(f, "{}", name),
            Selection::PackageVersion(id) => write!(f, "package version {}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Unsatisfied dependency: {dependency} (required by {required_by})")]
    UnsatisfiedDependency {
        dependency: String,
        required_by: String,
    },

    #[error("Cannot uninstall {target}: {dependent} depends on it")]
    RequiredBy { target: String, dependent: String },

    #[error("{0} was not installed by this package manager and cannot be uninstalled")]
    External(String),

    #[error("{0} is not installed")]
    NotInstalled(String),

    #[error("{0} is locked by a currently running installation/removal")]
    Locked(String),

    #[error("No installable version found for the package {0}")]
    NoInstallableVersion(String),

    #[error("No installed version found for the package {0}")]
    NoInstalledVersion(String),

    #[error("The newest version of the package {package} ({version}) is already installed")]
    NewestInstalled { package: String, version: String },

    #[error("Unknown object selected")]
    UnknownSelection,
}

pub struct Planner<'a> {
    catalog: &'a Catalog,
}

impl<'a> Planner<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// The catalog's installed versions as a starting point for planning.
    pub fn installed_set(&self) -> InstalledSet {
        self.catalog.installed().into_iter().collect()
    }

    // --- Selections ---

    /// A package selection installs its newest installable version.
    pub fn resolve_for_install(&self, selection: &Selection) -> Result<PackageVersionId, PlanError> {
        match selection {
            Selection::Package(name) => self
                .catalog
                .find_newest_installable_package_version(name)
                .ok_or(PlanError::UnknownSelection),
            Selection::PackageVersion(id) => self.known(*id),
        }
    }

    /// A package selection uninstalls its newest installed version.
    pub fn resolve_for_uninstall(
        &self,
        selection: &Selection,
    ) -> Result<PackageVersionId, PlanError> {
        match selection {
            Selection::Package(name) => self
                .catalog
                .find_newest_installed_package_version(name)
                .ok_or(PlanError::UnknownSelection),
            Selection::PackageVersion(id) => self.known(*id),
        }
    }

    /// The package a selection refers to.
    pub fn resolve_package(&self, selection: &Selection) -> Result<String, PlanError> {
        match selection {
            Selection::Package(name) if self.catalog.find_package(name).is_some() => {
                Ok(name.clone())
            }
            Selection::Package(_) => Err(PlanError::UnknownSelection),
            Selection::PackageVersion(id) => Ok(self.catalog[self.known(*id)?].package.clone()),
        }
    }

    fn known(&self, id: PackageVersionId) -> Result<PackageVersionId, PlanError> {
        self.catalog
            .get(id)
            .map(|_| id)
            .ok_or(PlanError::UnknownSelection)
    }

    // --- Batches ---

    /// Plan the installation of every selection.
    pub fn plan_install_selection(
        &self,
        selections: &[Selection],
    ) -> Result<Vec<InstallOperation>, PlanError> {
        let mut installed = self.installed_set();
        let mut ops = Vec::new();
        for selection in selections {
            let target = self.resolve_for_install(selection)?;
            let mut avoid = Vec::new();
            self.plan_install(target, &mut installed, &mut ops, &mut avoid)?;
        }
        Ok(ops)
    }

    /// Plan the removal of every selection.
    pub fn plan_uninstall_selection(
        &self,
        selections: &[Selection],
    ) -> Result<Vec<InstallOperation>, PlanError> {
        let mut installed = self.installed_set();
        let mut ops = Vec::new();
        for selection in selections {
            let target = self.resolve_for_uninstall(selection)?;
            self.plan_uninstall(target, &mut installed, &mut ops)?;
        }
        Ok(ops)
    }

    /// Plan updates for the packages behind the selections. Several
    /// versions of one package count once.
    pub fn plan_update_selection(
        &self,
        selections: &[Selection],
    ) -> Result<Vec<InstallOperation>, PlanError> {
        let mut packages: Vec<String> = Vec::new();
        for selection in selections {
            let package = self.resolve_package(selection)?;
            if !packages.contains(&package) {
                packages.push(package);
            }
        }
        self.plan_update(&packages)
    }

    // --- Core planning ---

    /// Plan `target` and whatever it needs. Each dependency is satisfied by
    /// an installed version when possible, otherwise by the highest
    /// installable match not already being planned (`avoid`), which is
    /// planned first.
    pub fn plan_install(
        &self,
        target: PackageVersionId,
        installed: &mut InstalledSet,
        ops: &mut Vec<InstallOperation>,
        avoid: &mut Vec<PackageVersionId>,
    ) -> Result<(), PlanError> {
        let pv = &self.catalog[target];
        if pv.is_locked() {
            return Err(PlanError::Locked(pv.to_string()));
        }
        if installed.contains(&target) {
            debug!("{} is already installed", pv);
            return Ok(());
        }

        avoid.push(target);

        for dep in &pv.dependencies {
            let satisfied = installed.iter().any(|id| {
                *id != target && dep.matches_package(&self.catalog[*id].package, &self.catalog[*id].version)
            });
            if satisfied {
                continue;
            }

            let candidate = self
                .catalog
                .versions_of(dep.package())
                .iter()
                .copied()
                .filter(|id| {
                    let c = &self.catalog[*id];
                    c.installable() && !avoid.contains(id) && dep.matches(&c.version)
                })
                .max_by(|a, b| self.catalog[*a].version.cmp(&self.catalog[*b].version));

            match candidate {
                Some(candidate) => self.plan_install(candidate, installed, ops, avoid)?,
                None => {
                    return Err(PlanError::UnsatisfiedDependency {
                        dependency: dep.to_string(),
                        required_by: pv.to_string(),
                    });
                }
            }
        }

        debug!("Planned installation of {}", pv);
        ops.push(InstallOperation::install(target));
        installed.insert(target);
        Ok(())
    }

    /// Plan the removal of `target`. Fails when an installed version that
    /// stays would lose its only match for a dependency.
    pub fn plan_uninstall(
        &self,
        target: PackageVersionId,
        installed: &mut InstalledSet,
        ops: &mut Vec<InstallOperation>,
    ) -> Result<(), PlanError> {
        let pv = &self.catalog[target];
        if pv.is_locked() {
            return Err(PlanError::Locked(pv.to_string()));
        }
        if pv.external() {
            return Err(PlanError::External(pv.to_string()));
        }
        if !installed.contains(&target) {
            if ops.contains(&InstallOperation::uninstall(target)) {
                return Ok(());
            }
            return Err(PlanError::NotInstalled(pv.to_string()));
        }

        let removing: BTreeSet<PackageVersionId> = ops
            .iter()
            .filter(|op| !op.install)
            .map(|op| op.package_version)
            .chain(std::iter::once(target))
            .collect();

        for dependent in self.dependents_to_check(target, installed, &removing) {
            let dependent_pv = &self.catalog[dependent];
            for dep in dependent_pv.dependencies.iter().filter(|d| d.package() == pv.package) {
                if !dep.matches(&pv.version) {
                    continue;
                }
                let alternative = installed.iter().any(|id| {
                    !removing.contains(id)
                        && dep.matches_package(&self.catalog[*id].package, &self.catalog[*id].version)
                });
                if !alternative {
                    return Err(PlanError::RequiredBy {
                        target: pv.to_string(),
                        dependent: dependent_pv.to_string(),
                    });
                }
            }
        }

        debug!("Planned removal of {}", pv);
        ops.push(InstallOperation::uninstall(target));
        installed.remove(&target);
        Ok(())
    }

    /// Versions that may depend on `target`: graph dependents of every
    /// version of its package being removed, plus versions only planned
    /// for installation in this batch.
    fn dependents_to_check(
        &self,
        target: PackageVersionId,
        installed: &InstalledSet,
        removing: &BTreeSet<PackageVersionId>,
    ) -> BTreeSet<PackageVersionId> {
        let graph = self.catalog.install_graph();
        let package = &self.catalog[target].package;

        removing
            .iter()
            .filter(|id| self.catalog[**id].package == *package)
            .flat_map(|id| graph.dependents_of(*id))
            .chain(
                installed
                    .iter()
                    .copied()
                    .filter(|id| graph.node_of(*id).is_none()),
            )
            .filter(|id| installed.contains(id) && !removing.contains(id))
            .collect()
    }

    /// Plan updating each package from its newest installed version to its
    /// newest installable one. A package is first tried on its own as
    /// "uninstall old, install new"; packages where that does not work out
    /// cleanly get all new versions installed before old ones are removed.
    pub fn plan_update(&self, packages: &[String]) -> Result<Vec<InstallOperation>, PlanError> {
        let mut pairs = Vec::with_capacity(packages.len());
        for package in packages {
            let newest = self
                .catalog
                .find_newest_installable_package_version(package)
                .ok_or_else(|| PlanError::NoInstallableVersion(package.clone()))?;
            let current = self
                .catalog
                .find_newest_installed_package_version(package)
                .ok_or_else(|| PlanError::NoInstalledVersion(package.clone()))?;
            if self.catalog[newest].version <= self.catalog[current].version {
                return Err(PlanError::NewestInstalled {
                    package: package.clone(),
                    version: self.catalog[current].version.to_string(),
                });
            }
            pairs.push((current, newest));
        }

        let mut installed = self.installed_set();
        let mut ops = Vec::new();
        let mut remaining = Vec::new();

        for (current, newest) in pairs {
            let mut trial_installed = installed.clone();
            let mut trial_ops = Vec::new();
            let mut avoid = Vec::new();
            let simple = self
                .plan_uninstall(current, &mut trial_installed, &mut trial_ops)
                .and_then(|_| {
                    self.plan_install(newest, &mut trial_installed, &mut trial_ops, &mut avoid)
                });

            if simple.is_ok() && trial_ops.len() == 2 {
                ops.extend(trial_ops);
                installed = trial_installed;
            } else {
                remaining.push((current, newest));
            }
        }

        for (_, newest) in &remaining {
            let mut avoid = Vec::new();
            self.plan_install(*newest, &mut installed, &mut ops, &mut avoid)?;
        }
        for (current, _) in &remaining {
            self.plan_uninstall(*current, &mut installed, &mut ops)?;
        }

        Ok(ops)
    }
}
