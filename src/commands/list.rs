use anyhow::Result;
use log::debug;

use super::load;
use crate::catalog::Catalog;
use crate::manager::PackageManager;
use crate::package::{ArtifactState, PackageVersion, PackageVersionId};
use crate::runtime::Runtime;

fn marker(pv: &PackageVersion) -> &'static str {
    match pv.state() {
        ArtifactState::Installed => " [installed]",
        ArtifactState::External => " [external]",
        ArtifactState::Locked(_) => " [busy]",
        ArtifactState::Idle => "",
    }
}

/// Lines describing the whole catalog, one per package version.
pub(crate) fn catalog_lines(catalog: &Catalog) -> Vec<String> {
    let mut lines = Vec::new();
    for package in catalog.packages() {
        for id in catalog.versions_of(&package.name) {
            let pv = &catalog[*id];
            lines.push(format!("{} {}{}  {}", pv.package, pv.version, marker(pv), package.title));
        }
    }
    lines
}

/// Lines for installed versions, flagging dependencies that nothing
/// installed satisfies.
pub(crate) fn installed_lines(catalog: &Catalog, installed: &[PackageVersionId]) -> Vec<String> {
    let graph = catalog.install_graph();
    installed
        .iter()
        .filter_map(|id| catalog.get(*id).map(|pv| (*id, pv)))
        .map(|(id, pv)| {
            let mut line = format!("{} {}{}", pv.package, pv.version, marker(pv));
            let missing = graph.missing_dependencies(id);
            if !missing.is_empty() {
                let names: Vec<String> = missing.iter().map(|d| d.to_string()).collect();
                line.push_str(&format!(" (missing: {})", names.join(", ")));
            }
            line
        })
        .collect()
}

/// List the catalog, or only what is installed.
#[tracing::instrument(skip(manager))]
pub async fn list<R: Runtime + 'static>(manager: &PackageManager<R>, installed_only: bool) -> Result<()> {
    load(manager).await?;

    if installed_only {
        let installed = manager.get_installed()?;
        debug!("Found {} installed package version(s)", installed.len());
        if installed.is_empty() {
            println!("No packages installed.");
            return Ok(());
        }
        for line in manager.with_catalog(|catalog| installed_lines(catalog, &installed)) {
            println!("{}", line);
        }
        return Ok(());
    }

    let (lines, updates) = manager.with_catalog(|catalog| (catalog_lines(catalog), catalog.count_updates()));
    for line in lines {
        println!("{}", line);
    }
    if updates > 0 {
        println!("{} update(s) available", updates);
    }
    Ok(())
}
