// src/repository/filesystem.rs

//! Archive-file tiers (Cache and Local)
//!
//! Packages are stored as `.tar.gz` files laid out by a [`Layout`]. Each
//! archive has an `.md5` sidecar recording its checksum, and its mtime is
//! the freshness signature copied from the tier it was submitted from.

use super::index::VersionIndex;
use super::layout::Layout;
use super::lock::DEFAULT_LOCK_TIMEOUT;
use super::{Repository, fetch_archive, require_present, select_best};
use crate::archive;
use crate::error::{Error, Result};
use crate::package::{PackageIdentity, PackageState, Signature, Tier, TierState};
use crate::version::{ComparableVersion, VersionRange};
use filetime::FileTime;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info};

const CHECKSUM_SUFFIX: &str = ".md5";

/// Tier backed by archive files on a local filesystem
#[derive(Debug, Clone)]
pub struct FileRepository {
    tier: Tier,
    base: PathBuf,
    layout: Layout,
    lock_timeout: Duration,
}

impl FileRepository {
    pub fn new(tier: Tier, base: impl Into<PathBuf>, layout: Layout) -> Self {
        Self {
            tier,
            base: base.into(),
            layout,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Machine-wide archive cache
    pub fn cache(base: impl Into<PathBuf>) -> Self {
        Self::new(Tier::Cache, base, Layout::archive())
    }

    /// Project build output
    pub fn local(base: impl Into<PathBuf>) -> Self {
        Self::new(Tier::Local, base, Layout::local())
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Where an archive of `version` lives (or would live)
    pub fn archive_path(&self, identity: &PackageIdentity, version: &ComparableVersion) -> PathBuf {
        self.layout.entry_path(&self.base, identity, version)
    }

    fn index(&self, identity: &PackageIdentity) -> VersionIndex {
        VersionIndex::new(self.layout.root_dir(&self.base, identity))
            .with_lock_timeout(self.lock_timeout)
    }

    fn scan(&self, identity: &PackageIdentity, root: &Path) -> Result<Vec<ComparableVersion>> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(version) = self.layout.version_of(identity, &name.to_string_lossy()) {
                versions.push(version);
            }
        }
        Ok(versions)
    }
}

fn checksum_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(CHECKSUM_SUFFIX);
    PathBuf::from(name)
}

fn read_checksum(archive: &Path) -> Option<String> {
    fs::read_to_string(checksum_path(archive))
        .ok()
        .map(|content| content.trim().to_lowercase())
        .filter(|checksum| !checksum.is_empty())
}

impl Repository for FileRepository {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn query_in_range(&self, state: &mut PackageState, range: &VersionRange) -> Result<bool> {
        state.tier_mut(self.tier).clear();
        let identity = state.identity.clone();
        let index = self.index(&identity);

        let versions = index.versions(|root| self.scan(&identity, root))?;
        let Some(version) = select_best(&versions, range) else {
            debug!("{} has no {} in {}", self.tier, identity, range);
            return Ok(false);
        };

        let path = self.archive_path(&identity, &version);
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // removed behind the index's back
                index.invalidate()?;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        *state.tier_mut(self.tier) = TierState {
            url: self.base.display().to_string(),
            filename: self.layout.entry_name(&identity, &version),
            signature: Some(Signature::from_system_time(metadata.modified()?)),
            checksum: read_checksum(&path),
            version,
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
        let slot = state.tier(self.tier);
        Ok(Some(
            self.layout
                .root_dir(&self.base, &state.identity)
                .join(&slot.filename),
        ))
    }

    fn download(&self, state: &PackageState, destination: &Path) -> Result<()> {
        if let Some(source) = self.link(state)? {
            fs::copy(&source, destination).map_err(|e| {
                Error::IoError(format!(
                    "Failed to copy {} to {}: {}",
                    source.display(),
                    destination.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    fn submit(&self, state: &mut PackageState, from: &dyn Repository) -> Result<()> {
        require_present(state, from.tier())?;
        let source = state.tier(from.tier()).clone();
        let identity = state.identity.clone();

        let root = self.layout.root_dir(&self.base, &identity);
        fs::create_dir_all(&root)?;

        let artifact = fetch_archive(from, state, &root)?;
        let mut staged = NamedTempFile::new_in(&root)?;
        io::copy(&mut File::open(artifact.path())?, staged.as_file_mut())?;
        drop(artifact);

        let checksum = archive::md5_file(staged.path())?;
        if let Some(expected) = &source.checksum {
            if !expected.eq_ignore_ascii_case(&checksum) {
                return Err(Error::IntegrityError {
                    artifact: format!("{} from {}", identity, from.tier()),
                    expected: expected.to_lowercase(),
                    actual: checksum,
                });
            }
        }

        let destination = self.archive_path(&identity, &source.version);
        staged
            .persist(&destination)
            .map_err(|e| Error::Io(e.error))?;
        fs::write(checksum_path(&destination), format!("{checksum}\n"))?;

        let signature = source.signature.unwrap_or_else(Signature::now);
        filetime::set_file_mtime(
            &destination,
            FileTime::from_unix_time(signature.unix_seconds(), 0),
        )?;
        self.index(&identity).invalidate()?;

        info!(
            "Stored {} version {} in {} ({})",
            identity,
            source.version,
            self.tier,
            destination.display()
        );

        *state.tier_mut(self.tier) = TierState {
            url: self.base.display().to_string(),
            filename: self.layout.entry_name(&identity, &source.version),
            version: source.version,
            signature: Some(signature),
            checksum: Some(checksum),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn identity() -> PackageIdentity {
        PackageIdentity::new("zlib", "thirdparty", "default", "x64")
    }

    fn v(s: &str) -> ComparableVersion {
        ComparableVersion::parse(s).unwrap()
    }

    fn write_archive(repo: &FileRepository, version: &str, seconds: i64) -> PathBuf {
        let path = repo.archive_path(&identity(), &v(version));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!("archive {version}")).unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(seconds, 0)).unwrap();
        path
    }

    #[test]
    fn test_query_picks_highest() {
        let dir = TempDir::new().unwrap();
        let repo = FileRepository::cache(dir.path());
        write_archive(&repo, "1.0", 1_700_000_000);
        write_archive(&repo, "2.0", 1_700_000_100);

        let mut state = PackageState::new(identity());
        assert!(repo.query(&mut state).unwrap());
        let slot = state.tier(Tier::Cache);
        assert_eq!(slot.version, v("2.0"));
        assert_eq!(slot.filename, "zlib-2.0.tar.gz");
        assert_eq!(slot.signature, Some(Signature::from_unix(1_700_000_100)));
        assert_eq!(slot.checksum, None);
    }

    #[test]
    fn test_query_in_range_and_miss() {
        let dir = TempDir::new().unwrap();
        let repo = FileRepository::cache(dir.path());
        write_archive(&repo, "1.0", 1_700_000_000);
        write_archive(&repo, "2.0", 1_700_000_000);

        let mut state = PackageState::new(identity());
        let range = VersionRange::parse("[1.0,2.0)").unwrap();
        assert!(repo.query_in_range(&mut state, &range).unwrap());
        assert_eq!(state.tier(Tier::Cache).version, v("1.0"));

        let range = VersionRange::parse("[3.0,)").unwrap();
        assert!(!repo.query_in_range(&mut state, &range).unwrap());
        assert!(!state.tier(Tier::Cache).exists());
    }

    #[test]
    fn test_ignores_sidecars_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        let repo = FileRepository::cache(dir.path());
        let path = write_archive(&repo, "1.0", 1_700_000_000);
        fs::write(checksum_path(&path), "abc\n").unwrap();
        fs::write(path.with_file_name("README"), "hi").unwrap();

        let mut state = PackageState::new(identity());
        assert!(repo.query(&mut state).unwrap());
        assert_eq!(state.tier(Tier::Cache).version, v("1.0"));
        assert_eq!(state.tier(Tier::Cache).checksum.as_deref(), Some("abc"));
    }

    #[test]
    fn test_submit_copies_and_stamps() {
        let dir = TempDir::new().unwrap();
        let local = FileRepository::local(dir.path().join("build"));
        let cache = FileRepository::cache(dir.path().join("cache"));
        write_archive(&local, "1.5", 1_650_000_000);

        let mut state = PackageState::new(identity());
        assert!(local.query(&mut state).unwrap());
        cache.submit(&mut state, &local).unwrap();

        let slot = state.tier(Tier::Cache).clone();
        assert_eq!(slot.version, v("1.5"));
        assert_eq!(slot.signature, Some(Signature::from_unix(1_650_000_000)));

        let stored = cache.archive_path(&identity(), &v("1.5"));
        assert_eq!(fs::read_to_string(&stored).unwrap(), "archive 1.5");
        assert_eq!(
            fs::read_to_string(checksum_path(&stored)).unwrap().trim(),
            archive::md5_file(&stored).unwrap()
        );

        let mut fresh = PackageState::new(identity());
        assert!(cache.query(&mut fresh).unwrap());
        assert_eq!(fresh.tier(Tier::Cache), &slot);
    }

    #[test]
    fn test_submit_rejects_checksum_mismatch() {
        let dir = TempDir::new().unwrap();
        let local = FileRepository::local(dir.path().join("build"));
        let cache = FileRepository::cache(dir.path().join("cache"));
        write_archive(&local, "1.5", 1_650_000_000);

        let mut state = PackageState::new(identity());
        assert!(local.query(&mut state).unwrap());
        state.tier_mut(Tier::Local).checksum = Some("0".repeat(32));

        let err = cache.submit(&mut state, &local).unwrap_err();
        assert!(matches!(err, Error::IntegrityError { .. }));
        assert!(!cache.archive_path(&identity(), &v("1.5")).exists());
        assert!(!state.tier(Tier::Cache).exists());
    }

    #[test]
    fn test_submit_requires_source() {
        let dir = TempDir::new().unwrap();
        let local = FileRepository::local(dir.path().join("build"));
        let cache = FileRepository::cache(dir.path().join("cache"));

        let mut state = PackageState::new(identity());
        assert!(matches!(
            cache.submit(&mut state, &local),
            Err(Error::NotFoundError(_))
        ));
    }
}
