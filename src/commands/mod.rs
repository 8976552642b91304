use anyhow::{Result, bail};
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError};
use tokio::task::JoinHandle;

use crate::cleanup::SharedCleanupContext;
use crate::config::{self, Settings};
use crate::http::HttpClient;
use crate::job::Job;
use crate::manager::PackageManager;
use crate::package::Version;
use crate::plan::Selection;
use crate::runtime::Runtime;

mod list;
mod operations;
mod sources;

pub use list::list;
pub use operations::{install, uninstall, update};
pub use sources::{sources_add, sources_list, sources_remove};

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub install_root: Option<PathBuf>,
    /// Replaces the configured sources when not empty.
    pub sources: Vec<String>,
}

/// Build a manager from the saved settings and the command line.
#[tracing::instrument(skip(runtime))]
pub fn manager<R: Runtime + 'static>(runtime: Arc<R>, options: &Options) -> Result<PackageManager<R>> {
    let settings = Settings::load(&*runtime)?;
    let root = config::install_root(&*runtime, options.install_root.clone(), &settings)?;
    let sources = if options.sources.is_empty() {
        settings.sources
    } else {
        options.sources.clone()
    };
    let http = HttpClient::new(config::http_client(&*runtime)?);
    Ok(PackageManager::new(runtime, root, sources, http))
}

/// Load the catalog, showing progress.
pub async fn load<R: Runtime + 'static>(manager: &PackageManager<R>) -> Result<()> {
    let job = Job::new();
    run_job(&job, manager.cleanup_context(), manager.load(&job)).await
}

/// Drive `work` while printing the progress of `job`. Ctrl-C cancels the
/// job, removes half-written files and exits.
pub(crate) async fn run_job<T>(job: &Job, cleanup: SharedCleanupContext, work: impl Future<Output = T>) -> T {
    let progress = spawn_progress(job);
    let interrupt = spawn_interrupt_handler(job.clone(), cleanup);
    let result = work.await;
    interrupt.abort();
    progress.abort();
    result
}

fn spawn_progress(job: &Job) -> JoinHandle<()> {
    let mut updates = job.subscribe();
    tokio::spawn(async move {
        let mut printed = false;
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            eprint!("\r{:>3.0}% {:<70.70}", state.progress * 100.0, state.hint);
            printed = true;
            if state.completed || state.error.is_some() {
                break;
            }
        }
        if printed {
            eprintln!();
        }
    })
}

fn spawn_interrupt_handler(job: Job, cleanup: SharedCleanupContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, cleaning up...");
            job.cancel();
            cleanup
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .cleanup();
            std::process::exit(130);
        }
    })
}

/// Split `package[@version]`.
pub(crate) fn parse_target(text: &str) -> Result<(&str, Option<Version>)> {
    match text.split_once('@') {
        Some((package, version)) => {
            if package.is_empty() {
                bail!("Missing package name in {:?}", text);
            }
            Ok((package, Some(Version::parse(version)?)))
        }
        None => Ok((text, None)),
    }
}

/// Turn `package[@version]` into a selection against the loaded catalog.
pub(crate) fn selection<R: Runtime + 'static>(manager: &PackageManager<R>, text: &str) -> Result<Selection> {
    let (package, version) = parse_target(text)?;
    match version {
        None => Ok(Selection::Package(package.to_string())),
        Some(version) => match manager.find_package_version(package, &version) {
            Some(id) => Ok(Selection::PackageVersion(id)),
            None => bail!("Unknown package version {} {}", package, version),
        },
    }
}
