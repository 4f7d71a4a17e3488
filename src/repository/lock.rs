// src/repository/lock.rs

//! Advisory write lock for version index rebuilds
//!
//! Index rebuilds are serialized across processes with a marker file
//! created exclusively next to the index. A marker older than the lock
//! timeout belongs to a crashed writer and is reclaimed.
//!
//! # Lock Strategy
//!
//! - Acquire: create the marker with `create_new`; if it exists and is
//!   stale, reclaim it and try once more
//! - Reclaim: rename the stale marker to a name unique to this process,
//!   so only one of several racing writers wins it; a marker that turns
//!   out fresh after the rename is put back
//! - Busy: a fresh marker means another writer is active; the caller
//!   skips writing and serves its own scan
//! - Release: the marker is removed on drop

use crate::error::{Error, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Default age after which a lock marker is considered abandoned
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Held write lock; released on drop
#[derive(Debug)]
pub struct WriteLock {
    path: PathBuf,
}

impl WriteLock {
    /// Try to take the lock without blocking
    ///
    /// Returns:
    /// - `Ok(Some(lock))` if the lock was acquired (possibly by stealing a
    ///   stale marker)
    /// - `Ok(None)` if another writer holds a fresh marker
    /// - `Err` on I/O errors
    pub fn try_acquire(path: &Path, timeout: Duration) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        for attempt in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())?;
                    debug!("Acquired write lock {:?}", path);
                    return Ok(Some(Self {
                        path: path.to_path_buf(),
                    }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if attempt == 0 && Self::is_stale(path, timeout) && reclaim(path, timeout)? {
                        continue;
                    }
                    debug!("Write lock {:?} is held elsewhere", path);
                    return Ok(None);
                }
                Err(e) => {
                    return Err(Error::IoError(format!(
                        "Failed to create lock {}: {}",
                        path.display(),
                        e
                    )));
                }
            }
        }

        Ok(None)
    }

    /// True when the marker exists and is older than `timeout`
    pub fn is_stale(path: &Path, timeout: Duration) -> bool {
        fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > timeout)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Take a stale marker out of the way; false if it was not ours to take
fn reclaim(path: &Path, timeout: Duration) -> Result<bool> {
    let mut claimed = path.as_os_str().to_owned();
    claimed.push(format!(".{}.stale", std::process::id()));
    let claimed = PathBuf::from(claimed);

    match fs::rename(path, &claimed) {
        Ok(()) => {}
        // another writer reclaimed it first
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => {
            return Err(Error::IoError(format!(
                "Failed to reclaim lock {}: {}",
                path.display(),
                e
            )));
        }
    }

    if !WriteLock::is_stale(&claimed, timeout) {
        debug!("Write lock {:?} was renewed, putting it back", path);
        fs::rename(&claimed, path)?;
        return Ok(false);
    }

    warn!("Reclaimed stale write lock {:?}", path);
    fs::remove_file(&claimed)?;
    Ok(true)
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release write lock {:?}: {}", self.path, e);
        }
    }
}
