use anyhow::Result;

use crate::config::Settings;
use crate::runtime::Runtime;

#[tracing::instrument(skip(runtime))]
pub fn sources_add<R: Runtime + ?Sized>(runtime: &R, url: &str) -> Result<()> {
    let mut settings = Settings::load(runtime)?;
    if settings.add_source(url) {
        settings.save(runtime)?;
        println!("Added catalog source {}", url);
    } else {
        println!("Catalog source {} is already configured", url);
    }
    Ok(())
}

#[tracing::instrument(skip(runtime))]
pub fn sources_remove<R: Runtime + ?Sized>(runtime: &R, url: &str) -> Result<()> {
    let mut settings = Settings::load(runtime)?;
    if settings.remove_source(url) {
        settings.save(runtime)?;
        println!("Removed catalog source {}", url);
    } else {
        anyhow::bail!("Catalog source {} is not configured", url);
    }
    Ok(())
}

pub fn sources_list<R: Runtime + ?Sized>(runtime: &R) -> Result<()> {
    let settings = Settings::load(runtime)?;
    if settings.sources.is_empty() {
        println!("No catalog sources configured.");
    }
    for (i, url) in settings.sources.iter().enumerate() {
        println!("{:>3}. {}", i + 1, url);
    }
    Ok(())
}
