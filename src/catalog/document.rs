//! Catalog source documents.
//!
//! A source is a JSON document listing licenses, packages and package
//! versions. Parsing validates names, versions and dependency ranges up
//! front, so a malformed source never reaches the catalog half-merged.

use anyhow::{Context, Result, bail};
use log::debug;
use serde::{Deserialize, Serialize};

use super::Catalog;
use crate::package::{
    ArchiveType, DependencyRange, EmbeddedFile, FileHandler, ImportantFile, License, Package,
    PackageVersion, Version, is_valid_package_name,
};

/// Documents with a specification version at or above this are rejected.
const MAX_SPEC_VERSION: [u32; 2] = [3, 0];

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawDocument {
    #[serde(default)]
    spec_version: Option<String>,
    #[serde(default)]
    licenses: Vec<RawLicense>,
    #[serde(default)]
    packages: Vec<RawPackage>,
    #[serde(default)]
    versions: Vec<RawVersion>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawLicense {
    name: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawPackage {
    name: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    license: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawVersion {
    package: String,
    #[serde(default = "default_version_name")]
    name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default, rename = "type")]
    archive_type: ArchiveType,
    #[serde(default)]
    dependencies: Vec<RawDependency>,
    #[serde(default)]
    important_files: Vec<RawImportantFile>,
    #[serde(default)]
    file_handlers: Vec<RawFileHandler>,
    #[serde(default)]
    files: Vec<RawFile>,
}

fn default_version_name() -> String {
    "1.0".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct RawDependency {
    package: String,
    versions: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawImportantFile {
    path: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawFileHandler {
    title: String,
    executable: String,
    #[serde(default)]
    extensions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawFile {
    path: String,
    content: String,
}

/// A parsed and validated catalog source.
#[derive(Debug, Default)]
pub struct CatalogDocument {
    pub licenses: Vec<License>,
    pub packages: Vec<Package>,
    pub versions: Vec<PackageVersion>,
}

/// How many entries a merge kept and discarded.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    pub added: usize,
    pub discarded: usize,
}

impl CatalogDocument {
    /// Parse and validate a JSON catalog document.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawDocument =
            serde_json::from_str(text).context("Failed to parse catalog document")?;

        if let Some(spec) = &raw.spec_version {
            let spec = Version::parse(spec)?;
            if spec >= Version::from_parts(&MAX_SPEC_VERSION) {
                bail!(
                    "Incompatible catalog specification version: {}. Only versions below {} are supported.",
                    spec,
                    Version::from_parts(&MAX_SPEC_VERSION)
                );
            }
        }

        let licenses = raw
            .licenses
            .into_iter()
            .map(|l| License {
                title: l.title.unwrap_or_else(|| l.name.clone()),
                name: l.name,
                description: l.description,
                url: l.url,
            })
            .collect();

        let packages = raw
            .packages
            .into_iter()
            .map(|p| -> Result<Package> {
                check_package_name(&p.name)?;
                Ok(Package {
                    title: p.title.unwrap_or_else(|| p.name.clone()),
                    name: p.name,
                    description: p.description,
                    url: p.url,
                    icon: p.icon,
                    license: p.license,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let versions = raw
            .versions
            .into_iter()
            .map(convert_version)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            licenses,
            packages,
            versions,
        })
    }

    /// Merge into `catalog`. Entries whose identity already exists are
    /// discarded, so the earlier source wins.
    pub fn merge_into(self, catalog: &mut Catalog) -> MergeSummary {
        let mut summary = MergeSummary::default();
        let mut count = |added: bool| {
            if added {
                summary.added += 1;
            } else {
                summary.discarded += 1;
            }
        };

        for license in self.licenses {
            count(catalog.add_license(license));
        }
        for package in self.packages {
            count(catalog.add_package(package));
        }
        for version in self.versions {
            count(catalog.add_version(version).is_some());
        }

        debug!(
            "Merged catalog document: {} added, {} discarded",
            summary.added, summary.discarded
        );
        summary
    }
}

fn check_package_name(name: &str) -> Result<()> {
    if !is_valid_package_name(name) {
        bail!("Invalid package name: \"{}\"", name);
    }
    Ok(())
}

fn convert_version(raw: RawVersion) -> Result<PackageVersion> {
    check_package_name(&raw.package)?;
    let version = Version::parse(&raw.name)
        .with_context(|| format!("Invalid version of package {}", raw.package))?
        .normalized();

    let mut pv = PackageVersion::new(&raw.package, version);
    pv.download = raw.url.filter(|u| !u.trim().is_empty());
    pv.hash = raw.hash.map(|h| h.trim().to_lowercase()).filter(|h| !h.is_empty());
    pv.archive_type = raw.archive_type;

    pv.dependencies = raw
        .dependencies
        .into_iter()
        .map(|d| -> Result<DependencyRange> {
            check_package_name(&d.package)?;
            Ok(DependencyRange::parse(&d.package, &d.versions)?)
        })
        .collect::<Result<Vec<_>>>()?;

    pv.important_files = raw
        .important_files
        .into_iter()
        .map(|f| ImportantFile {
            title: f.title.unwrap_or_else(|| f.path.clone()),
            path: f.path,
        })
        .collect();

    pv.file_handlers = raw
        .file_handlers
        .into_iter()
        .map(|h| FileHandler {
            title: h.title,
            executable: h.executable,
            extensions: h.extensions,
        })
        .collect();

    pv.files = raw
        .files
        .into_iter()
        .map(|f| EmbeddedFile {
            path: f.path,
            content: f.content,
        })
        .collect();

    Ok(pv)
}
