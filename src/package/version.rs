//! Multi-part numeric versions.
//!
//! A version is a sequence of non-negative integer parts such as `1.2.3`
//! or `9.0.30729.4148`. Parts may be separated by `.` or `-`. Ordering is
//! lexicographic over the parts with missing trailing parts treated as zero,
//! so `1.0` and `1` are the same version.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use thiserror::Error;

/// Error returned when a version string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid version \"{input}\": {reason}")]
pub struct VersionParseError {
    pub input: String,
    pub reason: &'static str,
}

/// A dot/dash separated numeric version.
#[derive(Debug, Clone)]
pub struct Version {
    parts: Vec<u32>,
}

impl Version {
    /// Parse a version string such as `1.2.3` or `1-2`.
    pub fn parse(text: &str) -> Result<Self, VersionParseError> {
        let err = |reason| VersionParseError {
            input: text.to_string(),
            reason,
        };

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(err("empty version"));
        }

        let mut parts = Vec::new();
        for part in trimmed.split(['.', '-']) {
            if part.is_empty() {
                return Err(err("empty version part"));
            }
            if !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(err("version parts must be non-negative integers"));
            }
            let value = part
                .parse::<u32>()
                .map_err(|_| err("version part is too large"))?;
            parts.push(value);
        }

        Ok(Self { parts })
    }

    /// Build a version directly from its parts. An empty slice yields `0`.
    pub fn from_parts(parts: &[u32]) -> Self {
        if parts.is_empty() {
            Self { parts: vec![0] }
        } else {
            Self {
                parts: parts.to_vec(),
            }
        }
    }

    pub fn parts(&self) -> &[u32] {
        &self.parts
    }

    /// Strip trailing zero parts, keeping at least one part.
    pub fn normalize(&mut self) {
        while self.parts.len() > 1 && self.parts.last() == Some(&0) {
            self.parts.pop();
        }
    }

    /// Return the canonical form of this version.
    pub fn normalized(&self) -> Self {
        let mut v = self.clone();
        v.normalize();
        v
    }

    /// Whether the version is already in canonical form.
    pub fn is_normalized(&self) -> bool {
        self.parts.len() <= 1 || self.parts.last() != Some(&0)
    }

    fn significant_parts(&self) -> &[u32] {
        let mut end = self.parts.len();
        while end > 1 && self.parts[end - 1] == 0 {
            end -= 1;
        }
        &self.parts[..end]
    }
}

impl Default for Version {
    fn default() -> Self {
        Self { parts: vec![0] }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Must agree with Eq: trailing zeros are not significant.
        self.significant_parts().hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in &self.parts {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{}", part)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
