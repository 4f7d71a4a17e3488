// src/package/mod.rs

//! Package identity and per-tier state
//!
//! A [`PackageState`] follows one package (name, group, branch, platform)
//! through a negotiation pass. Every repository tier that knows the package
//! fills in its own [`TierState`]: where the artifact lives, which version
//! it is, and a freshness [`Signature`] used to detect that a tier's
//! content changed without re-hashing it.

pub mod descriptor;

pub use descriptor::{
    DependencyEdge, DescriptorSource, PackageDescriptor, PlatformFilter, PomDescriptorSource,
    VersionEntry, DESCRIPTOR_FILE,
};

use crate::version::ComparableVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Storage location in the propagation chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Networked package database
    Remote,
    /// Machine-local archive cache
    Cache,
    /// Shared extraction area
    Share,
    /// Per-project extraction directory
    Target,
    /// Project build output (packages produced locally)
    Local,
}

impl Tier {
    pub const ALL: [Tier; 5] = [Tier::Remote, Tier::Cache, Tier::Share, Tier::Target, Tier::Local];

    fn index(self) -> usize {
        match self {
            Tier::Remote => 0,
            Tier::Cache => 1,
            Tier::Share => 2,
            Tier::Target => 3,
            Tier::Local => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Remote => "remote",
            Tier::Cache => "cache",
            Tier::Share => "share",
            Tier::Target => "target",
            Tier::Local => "local",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Logical identity of a package build
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub name: String,
    pub group: String,
    pub branch: String,
    pub platform: String,
}

impl PackageIdentity {
    pub fn new(
        name: impl Into<String>,
        group: impl Into<String>,
        branch: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            branch: branch.into(),
            platform: platform.into(),
        }
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{} [{}]",
            self.group, self.name, self.branch, self.platform
        )
    }
}

/// Tier-local "last modified" token, second resolution
///
/// Signatures are copied, not regenerated, when content propagates from
/// one tier to the next, so equal signatures mean "same upstream content".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Signature(DateTime<Utc>);

impl Signature {
    pub fn from_unix(seconds: i64) -> Self {
        Self(DateTime::from_timestamp(seconds, 0).unwrap_or_default())
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        let dt: DateTime<Utc> = time.into();
        Self::from_unix(dt.timestamp())
    }

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn unix_seconds(&self) -> i64 {
        self.0.timestamp()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// What one tier knows about a package
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierState {
    /// Location of the tier's store; empty when the tier has nothing
    pub url: String,
    /// Artifact name within the tier
    pub filename: String,
    pub version: ComparableVersion,
    pub signature: Option<Signature>,
    /// MD5 of the artifact, when the tier records one
    pub checksum: Option<String>,
}

impl TierState {
    /// Version, filename and signature are only meaningful when this is true
    pub fn exists(&self) -> bool {
        !self.url.is_empty()
    }

    pub fn clear(&mut self) {
        *self = TierState::default();
    }
}

/// A package followed across all repository tiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageState {
    pub identity: PackageIdentity,
    tiers: [TierState; 5],
}

impl PackageState {
    pub fn new(identity: PackageIdentity) -> Self {
        Self {
            identity,
            tiers: Default::default(),
        }
    }

    pub fn tier(&self, tier: Tier) -> &TierState {
        &self.tiers[tier.index()]
    }

    pub fn tier_mut(&mut self, tier: Tier) -> &mut TierState {
        &mut self.tiers[tier.index()]
    }

    /// Existing tier states in propagation order
    pub fn present(&self) -> impl Iterator<Item = (Tier, &TierState)> {
        Tier::ALL
            .into_iter()
            .map(|tier| (tier, self.tier(tier)))
            .filter(|(_, state)| state.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> PackageIdentity {
        PackageIdentity::new("zlib", "thirdparty", "default", "x64")
    }

    #[test]
    fn test_new_state_is_empty() {
        let state = PackageState::new(identity());
        for tier in Tier::ALL {
            assert!(!state.tier(tier).exists());
        }
        assert_eq!(state.present().count(), 0);
    }

    #[test]
    fn test_tier_state_is_independent() {
        let mut state = PackageState::new(identity());
        let cache = state.tier_mut(Tier::Cache);
        cache.url = "/var/cache/strata".to_string();
        cache.version = ComparableVersion::parse("1.5.0").unwrap();
        cache.signature = Some(Signature::from_unix(1_700_000_000));

        assert!(state.tier(Tier::Cache).exists());
        assert!(!state.tier(Tier::Remote).exists());
        assert!(!state.tier(Tier::Target).exists());
        let present: Vec<_> = state.present().map(|(tier, _)| tier).collect();
        assert_eq!(present, vec![Tier::Cache]);

        state.tier_mut(Tier::Cache).clear();
        assert!(!state.tier(Tier::Cache).exists());
    }

    #[test]
    fn test_signature_truncates_to_seconds() {
        let time = SystemTime::UNIX_EPOCH + std::time::Duration::from_millis(1_700_000_000_750);
        let signature = Signature::from_system_time(time);
        assert_eq!(signature.unix_seconds(), 1_700_000_000);
        assert_eq!(signature, Signature::from_unix(1_700_000_000));
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(identity().to_string(), "thirdparty/zlib@default [x64]");
    }
}
