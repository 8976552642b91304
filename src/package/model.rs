//! Catalog entities: packages, licenses and package versions.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::range::DependencyRange;
use super::version::Version;
use crate::job::JobId;

/// Index of a [`PackageVersion`] inside its catalog.
///
/// Ids are stable for the lifetime of one catalog value; a reload produces a
/// new catalog with new ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageVersionId(pub(crate) usize);

impl fmt::Display for PackageVersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Check a dotted, reverse-domain package name such as `org.example.Tool`.
pub fn is_valid_package_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        })
}

/// A named piece of software.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub name: String,
    pub title: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub icon: Option<String>,
    pub license: Option<String>,
}

impl Package {
    pub fn new(name: &str, title: &str) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            description: None,
            url: None,
            icon: None,
            license: None,
        }
    }
}

/// A software license referenced by packages.
#[derive(Debug, Clone, PartialEq)]
pub struct License {
    pub name: String,
    pub title: String,
    pub description: Option<String>,
    pub url: Option<String>,
}

/// How the downloaded artifact is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ArchiveType {
    /// A zip archive unpacked into the artifact directory.
    #[default]
    #[serde(rename = "zip")]
    Zip,
    /// A single file copied into the artifact directory.
    #[serde(rename = "one-file")]
    OneFile,
}

/// A file worth pointing the user at (for display only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportantFile {
    pub path: String,
    pub title: String,
}

/// A program declared as handler for file extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandler {
    pub title: String,
    pub executable: String,
    pub extensions: Vec<String>,
}

/// A file whose content ships inside the catalog and is written at install time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedFile {
    pub path: String,
    pub content: String,
}

/// Lifecycle of one artifact on this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArtifactState {
    /// Known but not present.
    #[default]
    Idle,
    /// Present in the installation root under its canonical directory.
    Installed,
    /// Present on the system but not owned by this engine.
    External,
    /// An install or uninstall routine owned by the given job is running.
    Locked(JobId),
}

/// Rejected state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("The package {package} is locked by a currently running installation/removal (job {owner}).")]
    AlreadyLocked { package: String, owner: JobId },

    #[error("The package {0} is managed outside of this installation and cannot be locked.")]
    External(String),

    #[error("The package {package} is not locked by job {job}.")]
    NotLockedBy { package: String, job: JobId },
}

/// One concrete, versioned build of a package.
#[derive(Debug, Clone)]
pub struct PackageVersion {
    pub package: String,
    pub version: Version,
    pub download: Option<String>,
    pub hash: Option<String>,
    pub archive_type: ArchiveType,
    pub dependencies: Vec<DependencyRange>,
    pub important_files: Vec<ImportantFile>,
    pub file_handlers: Vec<FileHandler>,
    pub files: Vec<EmbeddedFile>,
    state: ArtifactState,
}

impl PackageVersion {
    pub fn new(package: &str, version: Version) -> Self {
        Self {
            package: package.to_string(),
            version,
            download: None,
            hash: None,
            archive_type: ArchiveType::default(),
            dependencies: Vec::new(),
            important_files: Vec::new(),
            file_handlers: Vec::new(),
            files: Vec::new(),
            state: ArtifactState::Idle,
        }
    }

    pub fn state(&self) -> ArtifactState {
        self.state
    }

    /// Present on this machine, either owned or external.
    pub fn installed(&self) -> bool {
        matches!(self.state, ArtifactState::Installed | ArtifactState::External)
    }

    pub fn external(&self) -> bool {
        self.state == ArtifactState::External
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.state, ArtifactState::Locked(_))
    }

    /// Has a download location, so the engine can install it.
    pub fn installable(&self) -> bool {
        self.download.is_some()
    }

    /// Directory name under the installation root: `<package>-<version>`.
    pub fn directory_name(&self) -> String {
        format!("{}-{}", self.package, self.version)
    }

    /// Set from a directory scan or a finished routine.
    pub(crate) fn set_present(&mut self, present: bool) {
        if self.is_locked() || self.external() {
            return;
        }
        self.state = if present {
            ArtifactState::Installed
        } else {
            ArtifactState::Idle
        };
    }

    /// Flag as detected on the system unless this engine already owns it.
    pub(crate) fn mark_external(&mut self) {
        if self.state == ArtifactState::Idle {
            self.state = ArtifactState::External;
        }
    }

    /// Force the external flag, e.g. for a non-canonical directory name.
    pub(crate) fn force_external(&mut self) {
        if !self.is_locked() {
            self.state = ArtifactState::External;
        }
    }

    pub(crate) fn lock(&mut self, job: JobId) -> Result<(), StateError> {
        match self.state {
            ArtifactState::Idle | ArtifactState::Installed => {
                self.state = ArtifactState::Locked(job);
                Ok(())
            }
            ArtifactState::Locked(owner) => Err(StateError::AlreadyLocked {
                package: self.to_string(),
                owner,
            }),
            ArtifactState::External => Err(StateError::External(self.to_string())),
        }
    }

    /// Release the lock held by `job`; the caller reports whether the
    /// artifact directory now exists.
    pub(crate) fn unlock(&mut self, job: JobId, present: bool) -> Result<(), StateError> {
        match self.state {
            ArtifactState::Locked(owner) if owner == job => {
                self.state = if present {
                    ArtifactState::Installed
                } else {
                    ArtifactState::Idle
                };
                Ok(())
            }
            _ => Err(StateError::NotLockedBy {
                package: self.to_string(),
                job,
            }),
        }
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.package, self.version)
    }
}
