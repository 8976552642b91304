use anyhow::Result;
use log::debug;

use super::{load, run_job, selection};
use crate::catalog::Catalog;
use crate::job::Job;
use crate::manager::PackageManager;
use crate::plan::{InstallOperation, Selection};
use crate::runtime::Runtime;

/// Human-readable plan, one line per operation.
pub(crate) fn describe(catalog: &Catalog, ops: &[InstallOperation]) -> Vec<String> {
    ops.iter()
        .map(|op| {
            let verb = if op.install { "install" } else { "uninstall" };
            format!("{:>9} {}", verb, catalog[op.package_version])
        })
        .collect()
}

async fn execute<R: Runtime + 'static>(manager: &PackageManager<R>, ops: Vec<InstallOperation>) -> Result<()> {
    if ops.is_empty() {
        println!("Nothing to do.");
        return Ok(());
    }
    for line in manager.with_catalog(|catalog| describe(catalog, &ops)) {
        println!("{}", line);
    }

    let job = Job::new();
    run_job(&job, manager.cleanup_context(), manager.process(ops, &job)).await?;
    println!("Done.");
    Ok(())
}

async fn selections<R: Runtime + 'static>(manager: &PackageManager<R>, targets: &[String]) -> Result<Vec<Selection>> {
    load(manager).await?;
    let selections = targets
        .iter()
        .map(|t| selection(manager, t))
        .collect::<Result<Vec<_>>>()?;
    debug!("Selected {:?}", selections);
    Ok(selections)
}

/// Install `package[@version]` targets and their dependencies.
#[tracing::instrument(skip(manager))]
pub async fn install<R: Runtime + 'static>(manager: &PackageManager<R>, targets: &[String]) -> Result<()> {
    let selections = selections(manager, targets).await?;
    let ops = manager.plan_install(&selections)?;
    execute(manager, ops).await
}

#[tracing::instrument(skip(manager))]
pub async fn uninstall<R: Runtime + 'static>(manager: &PackageManager<R>, targets: &[String]) -> Result<()> {
    let selections = selections(manager, targets).await?;
    let ops = manager.plan_uninstall(&selections)?;
    execute(manager, ops).await
}

/// Replace the installed version of each package with the newest one.
#[tracing::instrument(skip(manager))]
pub async fn update<R: Runtime + 'static>(manager: &PackageManager<R>, packages: &[String]) -> Result<()> {
    let selections = selections(manager, packages).await?;
    let ops = manager.plan_update(&selections)?;
    execute(manager, ops).await
}
