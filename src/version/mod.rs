// src/version/mod.rs

//! Version handling for native build artifacts
//!
//! Packages are versioned with dotted non-negative integers (conventionally
//! `major.minor.build`, but any depth is accepted). Comparison is
//! component-wise with missing trailing components treated as zero, so
//! `1.2` and `1.2.0` are the same version.
//!
//! The empty string parses to the *null version*, which stands for an
//! absent bound: it orders below every concrete version and is equal only
//! to another null version.

pub mod range;

pub use range::{Bound, RangeKind, Split, VersionRange};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Multiplier for the major component in the integer encoding
const MAJOR_FACTOR: u64 = 1_000_000;

/// Multiplier for the minor component in the integer encoding
const MINOR_FACTOR: u64 = 1_000;

/// Largest value minor and build may take in the integer encoding
const COMPONENT_LIMIT: u32 = 999;

/// A dotted-integer version with a total order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ComparableVersion {
    components: Vec<u32>,
}

impl ComparableVersion {
    /// Build a version from explicit components
    pub fn new(components: Vec<u32>) -> Self {
        Self { components }
    }

    /// The null version (absent bound)
    pub fn null() -> Self {
        Self::default()
    }

    /// Parse a version string
    ///
    /// Examples:
    /// - `"1.2.3"` -> [1, 2, 3]
    /// - `"4"` -> [4]
    /// - `""` -> null version
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::null());
        }

        let components = s
            .split('.')
            .map(|segment| {
                segment.parse::<u32>().map_err(|e| {
                    Error::FormatError(format!(
                        "Invalid version component '{}' in '{}': {}",
                        segment, s, e
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { components })
    }

    /// Decode the `major*10^6 + minor*10^3 + build` integer encoding
    pub fn from_int(value: u64) -> Result<Self> {
        let major = u32::try_from(value / MAJOR_FACTOR).map_err(|_| {
            Error::FormatError(format!(
                "Encoded version {} has a major component above {}",
                value,
                u32::MAX
            ))
        })?;
        let minor = (value % MAJOR_FACTOR) / MINOR_FACTOR;
        let build = value % MINOR_FACTOR;
        Ok(Self {
            components: vec![major, minor as u32, build as u32],
        })
    }

    /// Encode as `major*10^6 + minor*10^3 + build`
    ///
    /// The encoding only round-trips for versions with at most three
    /// components whose minor and build parts fit in 0..=999. Anything
    /// else is rejected rather than truncated.
    pub fn to_int(&self) -> Result<u64> {
        if self.is_null() {
            return Err(Error::FormatError(
                "Null version has no integer encoding".to_string(),
            ));
        }
        if self.components.len() > 3 {
            return Err(Error::FormatError(format!(
                "Version '{}' has more than three components",
                self
            )));
        }

        let minor = self.component(1);
        let build = self.component(2);
        if minor > COMPONENT_LIMIT || build > COMPONENT_LIMIT {
            return Err(Error::FormatError(format!(
                "Version '{}' does not fit the integer encoding (minor and build must be <= {})",
                self, COMPONENT_LIMIT
            )));
        }

        Ok(u64::from(self.component(0)) * MAJOR_FACTOR
            + u64::from(minor) * MINOR_FACTOR
            + u64::from(build))
    }

    /// True for the null version
    pub fn is_null(&self) -> bool {
        self.components.is_empty()
    }

    /// Component at `index`, zero when absent
    pub fn component(&self, index: usize) -> u32 {
        self.components.get(index).copied().unwrap_or(0)
    }

    pub fn components(&self) -> &[u32] {
        &self.components
    }

    /// Components without trailing zeros
    fn significant(&self) -> &[u32] {
        let len = self
            .components
            .iter()
            .rposition(|&c| c != 0)
            .map_or(0, |pos| pos + 1);
        &self.components[..len]
    }

    /// Compare two versions
    pub fn compare(&self, other: &ComparableVersion) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }

        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            match self.component(i).cmp(&other.component(i)) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl Ord for ComparableVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for ComparableVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ComparableVersion {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for ComparableVersion {}

impl Hash for ComparableVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.is_null().hash(state);
        self.significant().hash(state);
    }
}

impl fmt::Display for ComparableVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, component) in self.components.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", component)?;
        }
        Ok(())
    }
}

impl FromStr for ComparableVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ComparableVersion {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ComparableVersion> for String {
    fn from(v: ComparableVersion) -> Self {
        v.to_string()
    }
}
