//! Package model.
//!
//! This module provides the entities tracked by the catalog: versions,
//! dependency ranges, packages, licenses and package versions.

mod model;
mod range;
mod version;

pub use model::{
    ArchiveType, ArtifactState, EmbeddedFile, FileHandler, ImportantFile, License, Package,
    PackageVersion, PackageVersionId, StateError, is_valid_package_name,
};
pub use range::{Bound, DependencyRange, RangeParseError};
pub use version::{Version, VersionParseError};
