//! Dependency ranges.
//!
//! A dependency names a package and constrains its version with an interval:
//!
//! ```text
//! [1.0, 2.0)   1.0 <= v < 2.0
//! (1.0, ]      v > 1.0
//! [, 3)        v < 3
//! 1.4.2        exactly 1.4.2
//! ```
//!
//! `[`/`]` are inclusive, `(`/`)` exclusive, an omitted bound is unbounded.

use std::fmt;

use thiserror::Error;

use super::version::Version;

/// Error returned when a range expression cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid version range \"{input}\" for package {package}: {reason}")]
pub struct RangeParseError {
    pub package: String,
    pub input: String,
    pub reason: String,
}

/// One end of a version interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bound {
    Unbounded,
    Inclusive(Version),
    Exclusive(Version),
}

/// A named package plus a version interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRange {
    package: String,
    min: Bound,
    max: Bound,
}

impl DependencyRange {
    /// Parse a range expression for `package`.
    pub fn parse(package: &str, text: &str) -> Result<Self, RangeParseError> {
        let err = |reason: &str| RangeParseError {
            package: package.to_string(),
            input: text.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(err("empty range"));
        }

        let first = trimmed.chars().next().unwrap_or_default();
        if first != '[' && first != '(' {
            let exact = Version::parse(trimmed).map_err(|e| err(e.reason))?;
            return Ok(Self::exact(package, exact));
        }

        let last = trimmed.chars().last().unwrap_or_default();
        if last != ']' && last != ')' {
            return Err(err("missing closing ']' or ')'"));
        }

        let inner = &trimmed[1..trimmed.len() - 1];
        let (low, high) = inner
            .split_once(',')
            .ok_or_else(|| err("expected two bounds separated by ','"))?;

        let parse_bound = |s: &str, inclusive: bool| -> Result<Bound, RangeParseError> {
            let s = s.trim();
            if s.is_empty() {
                return Ok(Bound::Unbounded);
            }
            let version = Version::parse(s).map_err(|e| err(e.reason))?;
            Ok(if inclusive {
                Bound::Inclusive(version)
            } else {
                Bound::Exclusive(version)
            })
        };

        let min = parse_bound(low, first == '[')?;
        let max = parse_bound(high, last == ']')?;

        if let (Some(lo), Some(hi)) = (bound_version(&min), bound_version(&max)) {
            if lo > hi {
                return Err(err("lower bound is greater than upper bound"));
            }
            if lo == hi
                && (matches!(min, Bound::Exclusive(_)) || matches!(max, Bound::Exclusive(_)))
            {
                return Err(err("range is empty"));
            }
        }

        Ok(Self {
            package: package.to_string(),
            min,
            max,
        })
    }

    /// A range matching exactly one version.
    pub fn exact(package: &str, version: Version) -> Self {
        Self {
            package: package.to_string(),
            min: Bound::Inclusive(version.clone()),
            max: Bound::Inclusive(version),
        }
    }

    /// A range matching every version of `package`.
    pub fn any(package: &str) -> Self {
        Self {
            package: package.to_string(),
            min: Bound::Unbounded,
            max: Bound::Unbounded,
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn min(&self) -> &Bound {
        &self.min
    }

    pub fn max(&self) -> &Bound {
        &self.max
    }

    /// Whether `version` lies inside the interval.
    pub fn matches(&self, version: &Version) -> bool {
        let above_min = match &self.min {
            Bound::Unbounded => true,
            Bound::Inclusive(lo) => version >= lo,
            Bound::Exclusive(lo) => version > lo,
        };
        let below_max = match &self.max {
            Bound::Unbounded => true,
            Bound::Inclusive(hi) => version <= hi,
            Bound::Exclusive(hi) => version < hi,
        };
        above_min && below_max
    }

    /// Whether `package`/`version` satisfies this dependency.
    pub fn matches_package(&self, package: &str, version: &Version) -> bool {
        self.package == package && self.matches(version)
    }

    /// The greatest candidate inside the interval, if any.
    pub fn highest_match<'a, I>(&self, candidates: I) -> Option<&'a Version>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        candidates
            .into_iter()
            .filter(|v| self.matches(v))
            .max_by(|a, b| a.cmp(b))
    }

    fn range_text(&self) -> String {
        if let (Bound::Inclusive(lo), Bound::Inclusive(hi)) = (&self.min, &self.max)
            && lo == hi
        {
            return lo.to_string();
        }

        let mut s = String::new();
        match &self.min {
            Bound::Unbounded => s.push('('),
            Bound::Inclusive(v) => s.push_str(&format!("[{}", v)),
            Bound::Exclusive(v) => s.push_str(&format!("({}", v)),
        }
        s.push_str(", ");
        match &self.max {
            Bound::Unbounded => s.push(')'),
            Bound::Inclusive(v) => s.push_str(&format!("{}]", v)),
            Bound::Exclusive(v) => s.push_str(&format!("{})", v)),
        }
        s
    }
}

fn bound_version(bound: &Bound) -> Option<&Version> {
    match bound {
        Bound::Unbounded => None,
        Bound::Inclusive(v) | Bound::Exclusive(v) => Some(v),
    }
}

impl fmt::Display for DependencyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.package, self.range_text())
    }
}
