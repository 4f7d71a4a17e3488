// src/repository/extracted.rs

//! Extracted-tree tiers (Share and Target)
//!
//! These tiers hold unpacked package contents. Every entry directory has a
//! sibling `<entry>.stamp` file recording what was extracted there; the
//! stamp's mtime is the signature of the tier the content came from, not
//! the extraction time. Comparing stamps against upstream signatures is
//! how stale extractions are detected without hashing trees.
//!
//! Share keeps one directory per version. Target is single-slot: each
//! package and platform has exactly one extracted version, replaced in
//! place on upgrade or downgrade.

use super::index::VersionIndex;
use super::layout::Layout;
use super::lock::DEFAULT_LOCK_TIMEOUT;
use super::{Repository, fetch, require_present, select_best};
use crate::archive;
use crate::error::{Error, Result};
use crate::package::{PackageIdentity, PackageState, Signature, Tier, TierState};
use crate::version::{ComparableVersion, VersionRange};
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use walkdir::WalkDir;

const STAMP_SUFFIX: &str = ".stamp";
const STAGING_PREFIX: &str = ".staging";

/// Freshness marker written next to an extracted tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStamp {
    pub name: String,
    pub version: ComparableVersion,
    /// Artifact the tree was extracted from
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl ExtractionStamp {
    fn path_for(entry: &Path) -> PathBuf {
        let mut name = entry.as_os_str().to_os_string();
        name.push(STAMP_SUFFIX);
        PathBuf::from(name)
    }

    /// Read the stamp for `entry`, if one exists
    pub fn read(entry: &Path) -> Result<Option<(Self, Signature)>> {
        let path = Self::path_for(entry);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stamp: Self = serde_json::from_str(&content).map_err(|e| {
            Error::ParseError(format!("Invalid stamp {}: {}", path.display(), e))
        })?;
        let signature = Signature::from_system_time(fs::metadata(&path)?.modified()?);
        Ok(Some((stamp, signature)))
    }

    fn write(&self, entry: &Path, signature: Signature) -> Result<()> {
        let path = Self::path_for(entry);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::ParseError(format!("Failed to encode stamp: {e}")))?;
        fs::write(&path, json)?;
        filetime::set_file_mtime(&path, FileTime::from_unix_time(signature.unix_seconds(), 0))?;
        Ok(())
    }
}

/// Tier backed by extracted package trees
#[derive(Debug, Clone)]
pub struct ExtractedRepository {
    tier: Tier,
    base: PathBuf,
    layout: Layout,
    lock_timeout: Duration,
}

impl ExtractedRepository {
    pub fn new(tier: Tier, base: impl Into<PathBuf>, layout: Layout) -> Self {
        Self {
            tier,
            base: base.into(),
            layout,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Machine-wide extraction area, one directory per version
    pub fn share(base: impl Into<PathBuf>) -> Self {
        Self::new(Tier::Share, base, Layout::share())
    }

    /// Project dependency directory, one version per package and platform
    pub fn target(base: impl Into<PathBuf>) -> Self {
        Self::new(Tier::Target, base, Layout::target())
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Directory an extraction of `version` lives in
    pub fn entry_dir(&self, identity: &PackageIdentity, version: &ComparableVersion) -> PathBuf {
        self.layout.entry_path(&self.base, identity, version)
    }

    fn available(&self, identity: &PackageIdentity) -> Result<Vec<ComparableVersion>> {
        let root = self.layout.root_dir(&self.base, identity);

        if self.layout.is_single_slot() {
            return Ok(ExtractionStamp::read(&root)?
                .filter(|_| root.is_dir())
                .map(|(stamp, _)| vec![stamp.version])
                .unwrap_or_default());
        }

        VersionIndex::new(&root)
            .with_lock_timeout(self.lock_timeout)
            .versions(|root| {
                let mut versions = Vec::new();
                for entry in fs::read_dir(root)? {
                    let entry = entry?;
                    if !entry.file_type()?.is_dir() {
                        continue;
                    }
                    let name = entry.file_name();
                    let Some(version) = self.layout.version_of(identity, &name.to_string_lossy())
                    else {
                        continue;
                    };
                    if ExtractionStamp::path_for(&entry.path()).is_file() {
                        versions.push(version);
                    }
                }
                Ok(versions)
            })
    }

    fn invalidate(&self, identity: &PackageIdentity) -> Result<()> {
        if self.layout.is_single_slot() {
            return Ok(());
        }
        VersionIndex::new(self.layout.root_dir(&self.base, identity)).invalidate()
    }
}

/// Copy a directory tree into an existing directory
fn copy_tree(source: &Path, destination: &Path) -> Result<()> {
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(source).map_err(|e| {
            Error::IoError(format!("Failed to relativize {}: {}", entry.path().display(), e))
        })?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl Repository for ExtractedRepository {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn query_in_range(&self, state: &mut PackageState, range: &VersionRange) -> Result<bool> {
        state.tier_mut(self.tier).clear();
        let identity = state.identity.clone();

        let versions = self.available(&identity)?;
        let Some(version) = select_best(&versions, range) else {
            debug!("{} has no {} in {}", self.tier, identity, range);
            return Ok(false);
        };

        let entry = self.entry_dir(&identity, &version);
        let Some((stamp, signature)) = ExtractionStamp::read(&entry)? else {
            self.invalidate(&identity)?;
            return Ok(false);
        };

        let filename = entry
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        *state.tier_mut(self.tier) = TierState {
            url: self.base.display().to_string(),
            filename,
            version,
            signature: Some(signature),
            checksum: stamp.checksum,
        };
        debug!(
            "{} has {} version {}",
            self.tier,
            identity,
            state.tier(self.tier).version
        );
        Ok(true)
    }

    fn link(&self, state: &PackageState) -> Result<Option<PathBuf>> {
        require_present(state, self.tier)?;
        Ok(Some(
            self.entry_dir(&state.identity, &state.tier(self.tier).version),
        ))
    }

    fn download(&self, state: &PackageState, destination: &Path) -> Result<()> {
        if let Some(entry) = self.link(state)? {
            archive::pack_dir(&entry, destination)?;
        }
        Ok(())
    }

    fn submit(&self, state: &mut PackageState, from: &dyn Repository) -> Result<()> {
        require_present(state, from.tier())?;
        let source = state.tier(from.tier()).clone();
        let identity = state.identity.clone();

        let destination = self.entry_dir(&identity, &source.version);
        let parent = destination
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.base.clone());
        fs::create_dir_all(&parent)?;

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&parent)?;

        let artifact = fetch(from, state, &parent)?;
        if artifact.path().is_dir() {
            copy_tree(artifact.path(), staging.path())?;
        } else {
            if let Some(expected) = &source.checksum {
                archive::verify_md5(artifact.path(), expected)?;
            }
            archive::extract(artifact.path(), staging.path())?;
        }
        drop(artifact);

        // the stamp goes first so a crash never leaves a stamp over a partial tree
        remove_if_present(&ExtractionStamp::path_for(&destination))?;
        remove_if_present(&destination)?;
        fs::rename(staging.path(), &destination).map_err(|e| {
            Error::IoError(format!(
                "Failed to move extraction into {}: {}",
                destination.display(),
                e
            ))
        })?;
        // staging path no longer exists; cleanup on drop finds nothing
        drop(staging);

        let signature = source.signature.unwrap_or_else(Signature::now);
        let stamp = ExtractionStamp {
            name: identity.name.clone(),
            version: source.version.clone(),
            source: source.filename.clone(),
            checksum: source.checksum.clone(),
        };
        stamp.write(&destination, signature)?;
        self.invalidate(&identity)?;

        info!(
            "Extracted {} version {} into {} ({})",
            identity,
            source.version,
            self.tier,
            destination.display()
        );

        *state.tier_mut(self.tier) = TierState {
            url: self.base.display().to_string(),
            filename: destination
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            version: source.version,
            signature: Some(signature),
            checksum: source.checksum,
        };
        Ok(())
    }
}
