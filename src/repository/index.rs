// src/repository/index.rs

//! Cached version listings for file-backed tiers
//!
//! Scanning a tier directory and parsing every entry name on each query is
//! the hot path of negotiation. Each identity root gets a sibling
//! `<root>.versions.json` holding the sorted version list together with a
//! marker of the directory state it was built from. A matching marker
//! serves the cached list; anything else (missing, unreadable, stale)
//! falls back to a full rescan.
//!
//! Rebuilds are written under a [`WriteLock`] and moved into place with an
//! atomic rename, so readers never see a partial index.

use super::lock::{DEFAULT_LOCK_TIMEOUT, WriteLock};
use crate::error::{Error, Result};
use crate::version::ComparableVersion;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const INDEX_SUFFIX: &str = "versions.json";
const LOCK_SUFFIX: &str = "writelock";

/// Directory state an index was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct DirMarker {
    modified_nanos: u64,
    entries: usize,
}

impl DirMarker {
    fn read(root: &Path) -> Result<Self> {
        let modified_nanos = fs::metadata(root)?
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        let entries = fs::read_dir(root)?.count();
        Ok(Self {
            modified_nanos,
            entries,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    marker: DirMarker,
    versions: Vec<ComparableVersion>,
}

/// Sorted version index for one identity root
#[derive(Debug, Clone)]
pub struct VersionIndex {
    root: PathBuf,
    lock_timeout: Duration,
}

impl VersionIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn index_path(&self) -> PathBuf {
        sibling(&self.root, INDEX_SUFFIX)
    }

    pub fn lock_path(&self) -> PathBuf {
        sibling(&self.root, LOCK_SUFFIX)
    }

    /// Sorted, deduplicated versions under the root
    ///
    /// `scan` lists the versions present on disk and is only called when
    /// the cached index is missing or stale.
    pub fn versions<F>(&self, scan: F) -> Result<Vec<ComparableVersion>>
    where
        F: FnOnce(&Path) -> Result<Vec<ComparableVersion>>,
    {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let marker = DirMarker::read(&self.root)?;
        match self.load() {
            Ok(Some(index)) if index.marker == marker => {
                debug!("Version index hit for {:?}", self.root);
                return Ok(index.versions);
            }
            Ok(_) => {}
            Err(e) => debug!("Ignoring unreadable index for {:?}: {}", self.root, e),
        }

        let mut versions = scan(&self.root)?;
        versions.sort();
        versions.dedup();

        if let Err(e) = self.store(marker, &versions) {
            warn!("Failed to write version index for {:?}: {}", self.root, e);
        }
        Ok(versions)
    }

    /// Drop the cached index so the next query rescans
    pub fn invalidate(&self) -> Result<()> {
        match fs::remove_file(self.index_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn load(&self) -> Result<Option<IndexFile>> {
        let content = match fs::read_to_string(self.index_path()) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::ParseError(format!("Invalid version index: {e}")))
    }

    fn store(&self, marker: DirMarker, versions: &[ComparableVersion]) -> Result<()> {
        let Some(_lock) = WriteLock::try_acquire(&self.lock_path(), self.lock_timeout)? else {
            debug!("Skipping index write for {:?}, lock busy", self.root);
            return Ok(());
        };

        let index = IndexFile {
            marker,
            versions: versions.to_vec(),
        };
        let json = serde_json::to_vec(&index)
            .map_err(|e| Error::ParseError(format!("Failed to encode version index: {e}")))?;

        let parent = self.root.parent().unwrap_or_else(|| Path::new("."));
        let mut staged = NamedTempFile::new_in(parent)?;
        staged.write_all(&json)?;
        staged
            .persist(self.index_path())
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

/// `<root>.<suffix>` next to `root`
fn sibling(root: &Path, suffix: &str) -> PathBuf {
    let mut name = root
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    root.with_file_name(name)
}
