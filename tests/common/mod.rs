// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Once;

use filetime::FileTime;
use strata::archive;
use strata::config::ContextConfig;
use strata::negotiate::TierSet;
use strata::package::{PackageIdentity, PackageState, Signature, Tier};
use strata::repository::{
    ExtractedRepository, FileRepository, PackageDatabase, RemoteRecord, RemoteRepository,
    Repository,
};
use strata::version::{ComparableVersion, VersionRange};
use strata::{Error, ResolutionContext, Result};
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness (`RUST_LOG` filters it)
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn v(s: &str) -> ComparableVersion {
    ComparableVersion::parse(s).unwrap()
}

pub fn identity(name: &str) -> PackageIdentity {
    PackageIdentity::new(name, "acme", "default", "x64")
}

/// Storage key used for an archive of `identity` at `version`
pub fn archive_key(identity: &PackageIdentity, version: &ComparableVersion) -> String {
    format!(
        "{}/{}/{}/{}/{}-{}.tar.gz",
        identity.group, identity.name, identity.branch, identity.platform, identity.name, version
    )
}

struct StoredPackage {
    identity: PackageIdentity,
    record: RemoteRecord,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct MemoryInner {
    packages: RefCell<Vec<StoredPackage>>,
    unreachable: Cell<bool>,
    failing_downloads: Cell<bool>,
    finds: Cell<usize>,
    downloads: Cell<usize>,
    uploads: Cell<usize>,
}

/// In-memory package database; clones share storage and counters
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    inner: Rc<MemoryInner>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an archive as if it had been uploaded at `signature`
    pub fn insert(&self, identity: &PackageIdentity, version: &str, signature: i64, archive: &Path) {
        let version = v(version);
        let record = RemoteRecord {
            version: version.to_int().unwrap(),
            key: archive_key(identity, &version),
            signature,
            md5: Some(archive::md5_file(archive).unwrap()),
        };
        self.inner.packages.borrow_mut().push(StoredPackage {
            identity: identity.clone(),
            record,
            bytes: fs::read(archive).unwrap(),
        });
    }

    /// Flip stored bytes so they no longer match their recorded MD5
    pub fn tamper(&self, identity: &PackageIdentity) {
        for package in self.inner.packages.borrow_mut().iter_mut() {
            if &package.identity == identity {
                package.bytes.push(0);
            }
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.set(unreachable);
    }

    /// Keep answering `find` but fail every blob transfer
    pub fn set_failing_downloads(&self, failing: bool) {
        self.inner.failing_downloads.set(failing);
    }

    pub fn finds(&self) -> usize {
        self.inner.finds.get()
    }

    pub fn downloads(&self) -> usize {
        self.inner.downloads.get()
    }

    pub fn uploads(&self) -> usize {
        self.inner.uploads.get()
    }

    pub fn versions(&self, identity: &PackageIdentity) -> Vec<ComparableVersion> {
        self.inner
            .packages
            .borrow()
            .iter()
            .filter(|p| &p.identity == identity)
            .map(|p| p.record.version().unwrap())
            .collect()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.inner.unreachable.get() {
            Err(Error::TransportError("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

fn bump(counter: &Cell<usize>) {
    counter.set(counter.get() + 1);
}

impl PackageDatabase for MemoryDatabase {
    fn find(
        &self,
        identity: &PackageIdentity,
        range: &VersionRange,
    ) -> Result<Option<RemoteRecord>> {
        bump(&self.inner.finds);
        self.check_reachable()?;
        Ok(self
            .inner
            .packages
            .borrow()
            .iter()
            .filter(|p| &p.identity == identity && range.is_in_range(&p.record.version().unwrap()))
            .max_by_key(|p| p.record.version)
            .map(|p| p.record.clone()))
    }

    fn download(&self, key: &str, destination: &Path) -> Result<()> {
        bump(&self.inner.downloads);
        self.check_reachable()?;
        if self.inner.failing_downloads.get() {
            return Err(Error::TransportError("blob fetch timed out".to_string()));
        }
        let packages = self.inner.packages.borrow();
        let package = packages
            .iter()
            .find(|p| p.record.key == key)
            .ok_or_else(|| Error::NotFoundError(key.to_string()))?;
        fs::write(destination, &package.bytes)?;
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
        bump(&self.inner.uploads);
        self.check_reachable()?;
        let record = RemoteRecord {
            version: version.to_int()?,
            key: archive_key(identity, version),
            signature: signature.unix_seconds(),
            md5: Some(md5.to_string()),
        };
        self.inner.packages.borrow_mut().push(StoredPackage {
            identity: identity.clone(),
            record: record.clone(),
            bytes: fs::read(source)?,
        });
        Ok(record)
    }

    fn location(&self) -> String {
        "mem://packages".to_string()
    }
}

/// Call counters for one tier
#[derive(Clone, Default)]
pub struct Counters {
    queries: Rc<Cell<usize>>,
    submits: Rc<Cell<usize>>,
}

impl Counters {
    pub fn queries(&self) -> usize {
        self.queries.get()
    }

    pub fn submits(&self) -> usize {
        self.submits.get()
    }

    pub fn reset(&self) {
        self.queries.set(0);
        self.submits.set(0);
    }
}

/// Repository wrapper counting queries and submits
pub struct Counting {
    inner: Box<dyn Repository>,
    counters: Counters,
}

impl Counting {
    pub fn wrap(inner: impl Repository + 'static, counters: &Counters) -> Box<Self> {
        Box::new(Self {
            inner: Box::new(inner),
            counters: counters.clone(),
        })
    }
}

impl Repository for Counting {
    fn tier(&self) -> Tier {
        self.inner.tier()
    }

    fn query_in_range(&self, state: &mut PackageState, range: &VersionRange) -> Result<bool> {
        bump(&self.counters.queries);
        self.inner.query_in_range(state, range)
    }

    fn link(&self, state: &PackageState) -> Result<Option<PathBuf>> {
        self.inner.link(state)
    }

    fn download(&self, state: &PackageState, destination: &Path) -> Result<()> {
        self.inner.download(state, destination)
    }

    fn submit(&self, state: &mut PackageState, from: &dyn Repository) -> Result<()> {
        bump(&self.counters.submits);
        self.inner.submit(state, from)
    }
}

/// Temporary tier directories, a memory remote and per-tier counters
pub struct Harness {
    pub dir: TempDir,
    pub db: MemoryDatabase,
    pub remote: Counters,
    pub cache: Counters,
    pub share: Counters,
    pub target: Counters,
    pub local: Counters,
    with_remote: bool,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        Self {
            dir: TempDir::new().unwrap(),
            db: MemoryDatabase::new(),
            remote: Counters::default(),
            cache: Counters::default(),
            share: Counters::default(),
            target: Counters::default(),
            local: Counters::default(),
            with_remote: true,
        }
    }

    /// Harness whose tier set has no remote at all
    pub fn without_remote() -> Self {
        Self {
            with_remote: false,
            ..Self::new()
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn config(&self) -> ContextConfig {
        let mut config = ContextConfig::default();
        config.repository.cache = self.path("cache");
        config.repository.share = self.path("share");
        config.repository.target = self.path("deps");
        config.repository.local = Some(self.path("out"));
        config
    }

    pub fn cache_repo(&self) -> FileRepository {
        FileRepository::cache(self.path("cache"))
    }

    pub fn local_repo(&self) -> FileRepository {
        FileRepository::local(self.path("out"))
    }

    /// A fresh tier set over the harness directories
    pub fn tiers(&self) -> TierSet {
        let tiers = TierSet::new(
            Counting::wrap(self.cache_repo(), &self.cache),
            Counting::wrap(ExtractedRepository::share(self.path("share")), &self.share),
            Counting::wrap(ExtractedRepository::target(self.path("deps")), &self.target),
        )
        .with_local(Counting::wrap(self.local_repo(), &self.local));

        if self.with_remote {
            tiers.with_remote(Counting::wrap(
                RemoteRepository::new(Box::new(self.db.clone())).with_scratch(self.path("scratch")),
                &self.remote,
            ))
        } else {
            tiers
        }
    }

    pub fn context(&self) -> ResolutionContext {
        ResolutionContext::new(self.config(), self.tiers())
    }

    pub fn total_submits(&self) -> usize {
        [&self.remote, &self.cache, &self.share, &self.target, &self.local]
            .iter()
            .map(|c| c.submits())
            .sum()
    }

    pub fn reset_counters(&self) {
        for counters in [&self.remote, &self.cache, &self.share, &self.target, &self.local] {
            counters.reset();
        }
    }

    /// Build a package archive whose `pom.xml` declares `dependencies`
    ///
    /// Each dependency is `(name, range)` or `(name, range, platforms)`
    /// written as raw attribute values.
    pub fn package(&self, name: &str, version: &str, dependencies: &[Dep<'_>]) -> PathBuf {
        let tree = self.path(&format!("trees/{name}-{version}"));
        fs::create_dir_all(tree.join("lib")).unwrap();
        fs::write(tree.join("pom.xml"), pom(name, version, dependencies)).unwrap();
        fs::write(tree.join(format!("lib/{name}.txt")), format!("{name} {version}\n")).unwrap();

        let archives = self.path("archives");
        fs::create_dir_all(&archives).unwrap();
        let path = archives.join(format!("{name}-{version}.tar.gz"));
        archive::pack_dir(&tree, &path).unwrap();
        path
    }

    /// Publish a package to the memory remote
    pub fn remote_package(&self, name: &str, version: &str, signature: i64, deps: &[Dep<'_>]) {
        let archive = self.package(name, version, deps);
        self.db.insert(&identity(name), version, signature, &archive);
    }

    /// Place a package directly into the cache tier
    pub fn cached_package(&self, name: &str, version: &str, signature: i64, deps: &[Dep<'_>]) {
        let archive = self.package(name, version, deps);
        let destination = self.cache_repo().archive_path(&identity(name), &v(version));
        fs::create_dir_all(destination.parent().unwrap()).unwrap();
        fs::copy(&archive, &destination).unwrap();
        filetime::set_file_mtime(&destination, FileTime::from_unix_time(signature, 0)).unwrap();
    }

    /// Place a package into the local build output
    pub fn built_package(&self, name: &str, version: &str, signature: i64) {
        let archive = self.package(name, version, &[]);
        let destination = self.local_repo().archive_path(&identity(name), &v(version));
        fs::create_dir_all(destination.parent().unwrap()).unwrap();
        fs::copy(&archive, &destination).unwrap();
        filetime::set_file_mtime(&destination, FileTime::from_unix_time(signature, 0)).unwrap();
    }
}

/// Declared dependency for fixture packages
#[derive(Clone, Copy)]
pub struct Dep<'a> {
    pub name: &'a str,
    pub range: &'a str,
    pub platforms: Option<&'a str>,
}

pub fn dep<'a>(name: &'a str, range: &'a str) -> Dep<'a> {
    Dep {
        name,
        range,
        platforms: None,
    }
}

pub fn dep_on<'a>(name: &'a str, range: &'a str, platforms: &'a str) -> Dep<'a> {
    Dep {
        name,
        range,
        platforms: Some(platforms),
    }
}

pub fn pom(name: &str, version: &str, dependencies: &[Dep<'_>]) -> String {
    let mut xml = format!(
        "<package name=\"{name}\" group=\"acme\">\n  <versions>\n    <version>{version}</version>\n  </versions>\n  <dependencies>\n"
    );
    for d in dependencies {
        let platforms = d
            .platforms
            .map(|p| format!(" platforms=\"{p}\""))
            .unwrap_or_default();
        xml.push_str(&format!(
            "    <dependency name=\"{}\" group=\"acme\" version=\"{}\"{platforms}/>\n",
            d.name, d.range
        ));
    }
    xml.push_str("  </dependencies>\n</package>\n");
    xml
}
