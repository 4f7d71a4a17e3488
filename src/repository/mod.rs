// src/repository/mod.rs

//! Repository tiers
//!
//! A package moves through up to five tiers on its way into a project:
//!
//! - Remote: networked package database ([`RemoteRepository`])
//! - Cache: machine-local archive store ([`FileRepository::cache`])
//! - Share: shared extraction area ([`ExtractedRepository::share`])
//! - Target: per-project extraction ([`ExtractedRepository::target`])
//! - Local: project build output ([`FileRepository::local`])
//!
//! Every tier speaks the same [`Repository`] interface. Tiers differ in
//! storage (archive files, extracted trees, HTTP) and in the [`Layout`]
//! mapping identities to paths; negotiation never looks past the trait.

mod extracted;
mod filesystem;
mod index;
mod layout;
mod lock;
mod remote;

pub use extracted::{ExtractedRepository, ExtractionStamp};
pub use filesystem::FileRepository;
pub use index::VersionIndex;
pub use layout::Layout;
pub use lock::{DEFAULT_LOCK_TIMEOUT, WriteLock};
pub use remote::{HttpPackageDatabase, PackageDatabase, RemoteRecord, RemoteRepository};

use crate::archive;
use crate::error::{Error, Result};
use crate::package::{PackageState, Tier};
use crate::version::{ComparableVersion, Split, VersionRange};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempPath};

/// Uniform interface over one storage tier
pub trait Repository {
    /// Which slot of [`PackageState`] this tier fills
    fn tier(&self) -> Tier;

    /// Find the tier's best version with the default query range
    fn query(&self, state: &mut PackageState) -> Result<bool> {
        self.query_in_range(state, &VersionRange::default_query())
    }

    /// Find the tier's highest version satisfying `range`
    ///
    /// On success the tier's slot in `state` is filled in; otherwise it
    /// is cleared and `false` is returned.
    fn query_in_range(&self, state: &mut PackageState, range: &VersionRange) -> Result<bool>;

    /// Direct path to the stored artifact, if the tier has one on disk
    fn link(&self, state: &PackageState) -> Result<Option<PathBuf>>;

    /// Materialize the artifact at `destination`
    fn download(&self, state: &PackageState, destination: &Path) -> Result<()>;

    /// Pull the artifact `from` another tier into this one
    ///
    /// `from`'s slot in `state` must have been filled by a query. This
    /// tier's slot takes the source's version and signature.
    fn submit(&self, state: &mut PackageState, from: &dyn Repository) -> Result<()>;
}

/// Highest version in `versions` (sorted ascending) that satisfies `range`
///
/// The highest version is probed first. Otherwise the range is narrowed to
/// the span the tier actually holds and the search starts at the narrowed
/// upper bound.
pub fn select_best(
    versions: &[ComparableVersion],
    range: &VersionRange,
) -> Option<ComparableVersion> {
    let (lowest, highest) = (versions.first()?, versions.last()?);
    if range.is_in_range(highest) {
        return Some(highest.clone());
    }

    match range.split(lowest, highest) {
        Split::Disjoint => None,
        Split::Pinned(version) => versions
            .binary_search(&version)
            .ok()
            .map(|i| versions[i].clone()),
        Split::Range(narrowed) => {
            let end = match narrowed.upper_limit() {
                Some(bound) if bound.inclusive => versions.partition_point(|v| *v <= bound.version),
                Some(bound) => versions.partition_point(|v| *v < bound.version),
                None => versions.len(),
            };
            versions[..end]
                .iter()
                .rev()
                .find(|v| range.is_in_range(v))
                .cloned()
        }
    }
}

/// Fail unless `tier`'s slot in `state` is filled
pub(crate) fn require_present(state: &PackageState, tier: Tier) -> Result<()> {
    if state.tier(tier).exists() {
        Ok(())
    } else {
        Err(Error::NotFoundError(format!(
            "{} has no copy of {}",
            tier, state.identity
        )))
    }
}

/// Artifact obtained from a source tier
#[derive(Debug)]
pub enum Artifact {
    /// The source tier's own copy
    Linked(PathBuf),
    /// A scratch copy, removed on drop
    Temporary(TempPath),
}

impl Artifact {
    pub fn path(&self) -> &Path {
        match self {
            Artifact::Linked(path) => path,
            Artifact::Temporary(path) => path,
        }
    }
}

/// Link to the source tier's artifact, or download it into `scratch`
pub fn fetch(from: &dyn Repository, state: &PackageState, scratch: &Path) -> Result<Artifact> {
    if let Some(path) = from.link(state)? {
        return Ok(Artifact::Linked(path));
    }

    fs::create_dir_all(scratch)?;
    let temp = NamedTempFile::new_in(scratch)?.into_temp_path();
    from.download(state, &temp)?;
    Ok(Artifact::Temporary(temp))
}

/// Like [`fetch`], but an extracted tree is packed into an archive first
pub fn fetch_archive(
    from: &dyn Repository,
    state: &PackageState,
    scratch: &Path,
) -> Result<Artifact> {
    let artifact = fetch(from, state, scratch)?;
    if !artifact.path().is_dir() {
        return Ok(artifact);
    }

    let temp = NamedTempFile::new_in(scratch)?.into_temp_path();
    archive::pack_dir(artifact.path(), &temp)?;
    Ok(Artifact::Temporary(temp))
}
