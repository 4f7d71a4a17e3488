// src/repository/remote.rs

//! Remote tier backed by a package database service
//!
//! The database stores one record per uploaded archive: an integer-encoded
//! version, a storage key, the upload time (used as the signature) and the
//! archive's MD5. [`PackageDatabase`] is the seam between negotiation and
//! the wire; [`HttpPackageDatabase`] talks to the service over HTTP:
//!
//! - `GET  {base}packages/find?group=&name=&branch=&platform=&range=`
//! - `GET  {base}packages/blob/{key}`
//! - `PUT  {base}packages/upload?group=&name=&branch=&platform=&version=&md5=&signature=`

use super::{Repository, fetch_archive, require_present};
use crate::archive;
use crate::error::{Error, Result};
use crate::package::{PackageIdentity, PackageState, Signature, Tier, TierState};
use crate::version::{ComparableVersion, VersionRange};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// One archive known to the package database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// `major * 10^6 + minor * 10^3 + build`
    pub version: u64,
    /// Storage key of the archive
    pub key: String,
    /// Upload time, unix seconds
    pub signature: i64,
    #[serde(default)]
    pub md5: Option<String>,
}

impl RemoteRecord {
    pub fn version(&self) -> Result<ComparableVersion> {
        ComparableVersion::from_int(self.version)
    }
}

/// Storage service behind the Remote tier
pub trait PackageDatabase {
    /// Highest record for `identity` whose version satisfies `range`
    fn find(
        &self,
        identity: &PackageIdentity,
        range: &VersionRange,
    ) -> Result<Option<RemoteRecord>>;

    /// Fetch the archive stored under `key`
    fn download(&self, key: &str, destination: &Path) -> Result<()>;

    /// Store an archive and return its new record
    fn upload(
        &self,
        identity: &PackageIdentity,
        version: &ComparableVersion,
        source: &Path,
        md5: &str,
        signature: Signature,
    ) -> Result<RemoteRecord>;

    /// Human-readable location, recorded as the tier's URL
    fn location(&self) -> String;
}

/// [`PackageDatabase`] over HTTP
pub struct HttpPackageDatabase {
    client: Client,
    base: Url,
}

impl HttpPackageDatabase {
    pub fn new(base: &str) -> Result<Self> {
        let normalized = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{base}/")
        };
        let base = Url::parse(&normalized)
            .map_err(|e| Error::InitError(format!("Invalid remote URL {base}: {e}")))?;
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::TransportError(format!("Invalid endpoint {path}: {e}")))
    }

    fn identity_url(&self, path: &str, identity: &PackageIdentity) -> Result<Url> {
        let mut url = self.endpoint(path)?;
        url.query_pairs_mut()
            .append_pair("group", &identity.group)
            .append_pair("name", &identity.name)
            .append_pair("branch", &identity.branch)
            .append_pair("platform", &identity.platform);
        Ok(url)
    }
}

fn transport(context: &str, e: reqwest::Error) -> Error {
    Error::TransportError(format!("{context}: {e}"))
}

impl PackageDatabase for HttpPackageDatabase {
    fn find(
        &self,
        identity: &PackageIdentity,
        range: &VersionRange,
    ) -> Result<Option<RemoteRecord>> {
        let mut url = self.identity_url("packages/find", identity)?;
        url.query_pairs_mut().append_pair("range", &range.to_string());
        debug!("Querying {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| transport("Package query failed", e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| transport("Package query rejected", e))?;
        response
            .json::<RemoteRecord>()
            .map(Some)
            .map_err(|e| Error::ParseError(format!("Invalid package record: {e}")))
    }

    fn download(&self, key: &str, destination: &Path) -> Result<()> {
        let url = self.endpoint(&format!("packages/blob/{key}"))?;
        info!("Downloading {}", url);

        let mut response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| transport("Download failed", e))?;
        let mut file = File::create(destination)?;
        response
            .copy_to(&mut file)
            .map_err(|e| transport("Download interrupted", e))?;
        Ok(())
    }

    fn upload(
        &self,
        identity: &PackageIdentity,
        version: &ComparableVersion,
        source: &Path,
        md5: &str,
        signature: Signature,
    ) -> Result<RemoteRecord> {
        let mut url = self.identity_url("packages/upload", identity)?;
        url.query_pairs_mut()
            .append_pair("version", &version.to_int()?.to_string())
            .append_pair("md5", md5)
            .append_pair("signature", &signature.unix_seconds().to_string());
        info!("Uploading {} version {} to {}", identity, version, self.base);

        let response = self
            .client
            .put(url)
            .body(File::open(source)?)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| transport("Upload failed", e))?;
        response
            .json::<RemoteRecord>()
            .map_err(|e| Error::ParseError(format!("Invalid upload response: {e}")))
    }

    fn location(&self) -> String {
        self.base.to_string()
    }
}

/// Remote tier over any [`PackageDatabase`]
pub struct RemoteRepository {
    db: Box<dyn PackageDatabase>,
    scratch: PathBuf,
}

impl RemoteRepository {
    pub fn new(db: Box<dyn PackageDatabase>) -> Self {
        Self {
            db,
            scratch: std::env::temp_dir(),
        }
    }

    /// Directory for archives packed on the way to an upload
    pub fn with_scratch(mut self, scratch: impl Into<PathBuf>) -> Self {
        self.scratch = scratch.into();
        self
    }

    pub fn database(&self) -> &dyn PackageDatabase {
        self.db.as_ref()
    }

    fn fill(&self, state: &mut PackageState, record: RemoteRecord, version: ComparableVersion) {
        *state.tier_mut(Tier::Remote) = TierState {
            url: self.db.location(),
            filename: record.key,
            version,
            signature: Some(Signature::from_unix(record.signature)),
            checksum: record.md5.map(|md5| md5.to_lowercase()),
        };
    }
}

impl Repository for RemoteRepository {
    fn tier(&self) -> Tier {
        Tier::Remote
    }

    fn query_in_range(&self, state: &mut PackageState, range: &VersionRange) -> Result<bool> {
        state.tier_mut(Tier::Remote).clear();
        let Some(record) = self.db.find(&state.identity, range)? else {
            debug!("Remote has no {} in {}", state.identity, range);
            return Ok(false);
        };

        let version = record.version()?;
        if !range.is_in_range(&version) {
            warn!(
                "Remote answered {} version {} outside {}",
                state.identity, version, range
            );
            return Ok(false);
        }

        self.fill(state, record, version);
        Ok(true)
    }

    fn link(&self, _state: &PackageState) -> Result<Option<PathBuf>> {
        Ok(None)
    }

    fn download(&self, state: &PackageState, destination: &Path) -> Result<()> {
        require_present(state, Tier::Remote)?;
        self.db
            .download(&state.tier(Tier::Remote).filename, destination)
    }

    fn submit(&self, state: &mut PackageState, from: &dyn Repository) -> Result<()> {
        require_present(state, from.tier())?;
        let source = state.tier(from.tier()).clone();

        let artifact = fetch_archive(from, state, &self.scratch)?;
        let md5 = archive::md5_file(artifact.path())?;
        let signature = source.signature.unwrap_or_else(Signature::now);
        let record = self.db.upload(
            &state.identity,
            &source.version,
            artifact.path(),
            &md5,
            signature,
        )?;

        info!(
            "Published {} version {} to {}",
            state.identity,
            source.version,
            self.db.location()
        );
        let version = record.version()?;
        self.fill(state, record, version);
        Ok(())
    }
}
