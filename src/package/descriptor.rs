// src/package/descriptor.rs

//! Package descriptor (`pom.xml`) reading
//!
//! Every package carries a small XML descriptor declaring its own version
//! table and the dependency edges it needs:
//!
//! ```xml
//! <package name="core" group="acme">
//!   <versions>
//!     <version platform="x64" branch="default">1.2.0</version>
//!     <version>1.0.0</version>
//!   </versions>
//!   <dependencies>
//!     <dependency name="zlib" group="thirdparty" version="[1.2,2.0)" platforms="x64,!arm"/>
//!   </dependencies>
//! </package>
//! ```

use super::PackageIdentity;
use crate::archive;
use crate::error::{Error, Result};
use crate::version::{ComparableVersion, VersionRange};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Descriptor file name inside a package
pub const DESCRIPTOR_FILE: &str = "pom.xml";

/// Which platforms a dependency edge applies to
///
/// Written as a comma list: `x64,win32` restricts the edge to those
/// platforms, `!arm` excludes one. An empty filter applies everywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl PlatformFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn parse(s: &str) -> Self {
        let mut filter = Self::default();
        for item in s.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            match item.strip_prefix('!') {
                Some(excluded) => filter.exclude.push(excluded.trim().to_lowercase()),
                None => filter.include.push(item.to_lowercase()),
            }
        }
        filter
    }

    pub fn applies_to(&self, platform: &str) -> bool {
        let platform = platform.to_lowercase();
        if self.exclude.contains(&platform) {
            return false;
        }
        self.include.is_empty() || self.include.contains(&platform)
    }
}

impl fmt::Display for PlatformFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self
            .include
            .iter()
            .cloned()
            .chain(self.exclude.iter().map(|p| format!("!{}", p)))
            .collect();
        write!(f, "{}", items.join(","))
    }
}

/// A declared requirement from one package on another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub name: String,
    pub group: String,
    pub range: VersionRange,
    pub platforms: PlatformFilter,
    /// Branch override; the resolution default applies when absent
    pub branch: Option<String>,
}

impl DependencyEdge {
    pub fn new(name: impl Into<String>, group: impl Into<String>, range: VersionRange) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            range,
            platforms: PlatformFilter::any(),
            branch: None,
        }
    }

    pub fn with_platforms(mut self, platforms: PlatformFilter) -> Self {
        self.platforms = platforms;
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn applies_to(&self, platform: &str) -> bool {
        self.platforms.applies_to(platform)
    }
}

/// One row of a package's own version table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    pub platform: Option<String>,
    pub branch: Option<String>,
    pub version: ComparableVersion,
}

/// Parsed package descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDescriptor {
    pub name: String,
    pub group: String,
    pub versions: Vec<VersionEntry>,
    pub dependencies: Vec<DependencyEdge>,
}

impl PackageDescriptor {
    /// Read a descriptor from a package directory or archive
    pub fn load(location: &Path) -> Result<Option<Self>> {
        if location.is_dir() {
            let path = location.join(DESCRIPTOR_FILE);
            if !path.exists() {
                return Ok(None);
            }
            let content = std::fs::read_to_string(&path)?;
            return Self::parse(&content).map(Some);
        }

        match archive::read_entry(location, DESCRIPTOR_FILE)? {
            Some(bytes) => {
                let content = String::from_utf8(bytes).map_err(|e| {
                    Error::ParseError(format!(
                        "{} in {} is not UTF-8: {}",
                        DESCRIPTOR_FILE,
                        location.display(),
                        e
                    ))
                })?;
                Self::parse(&content).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Parse descriptor XML
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut descriptor: Option<PackageDescriptor> = None;
        let mut open_version: Option<(HashMap<String, String>, String)> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let tag = tag_name(&e);
                    if tag == "version" {
                        open_version = Some((attributes(&e)?, String::new()));
                    } else {
                        start_element(&mut descriptor, &tag, &e)?;
                    }
                }
                Ok(Event::Empty(e)) => {
                    let tag = tag_name(&e);
                    start_element(&mut descriptor, &tag, &e)?;
                }
                Ok(Event::Text(text)) => {
                    if let Some((_, body)) = open_version.as_mut() {
                        let value = text.unescape().map_err(|e| {
                            Error::ParseError(format!("Invalid text in {}: {}", DESCRIPTOR_FILE, e))
                        })?;
                        body.push_str(value.trim());
                    }
                }
                Ok(Event::End(e)) => {
                    if e.name().as_ref() == b"version" {
                        if let Some((attrs, body)) = open_version.take() {
                            let entry = VersionEntry {
                                platform: attrs.get("platform").cloned(),
                                branch: attrs.get("branch").cloned(),
                                version: ComparableVersion::parse(&body)?,
                            };
                            root_mut(&mut descriptor, "version")?.versions.push(entry);
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(Error::ParseError(format!(
                        "Malformed {} at position {}: {}",
                        DESCRIPTOR_FILE,
                        reader.buffer_position(),
                        e
                    )));
                }
                _ => {}
            }
        }

        descriptor.ok_or_else(|| {
            Error::ParseError(format!("{} has no <package> element", DESCRIPTOR_FILE))
        })
    }

    /// The package's own version for a platform and branch
    ///
    /// The most specific row wins: platform and branch, then platform
    /// only, then branch only, then an unqualified row.
    pub fn version_for(&self, platform: &str, branch: &str) -> Option<&ComparableVersion> {
        let matches = |value: &Option<String>, wanted: &str| {
            value.as_deref().is_none_or(|v| v.eq_ignore_ascii_case(wanted))
        };
        self.versions
            .iter()
            .filter(|entry| matches(&entry.platform, platform) && matches(&entry.branch, branch))
            .max_by_key(|entry| (entry.platform.is_some(), entry.branch.is_some()))
            .map(|entry| &entry.version)
    }

    /// Dependency edges that apply to a platform
    pub fn dependencies_for<'a>(
        &'a self,
        platform: &'a str,
    ) -> impl Iterator<Item = &'a DependencyEdge> + 'a {
        self.dependencies
            .iter()
            .filter(move |edge| edge.applies_to(platform))
    }
}

fn tag_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attributes(e: &BytesStart<'_>) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| {
            Error::ParseError(format!("Invalid attribute in {}: {}", DESCRIPTOR_FILE, err))
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| {
                Error::ParseError(format!("Invalid attribute value in {}: {}", DESCRIPTOR_FILE, err))
            })?
            .into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

fn required(attrs: &HashMap<String, String>, tag: &str, key: &str) -> Result<String> {
    attrs.get(key).cloned().ok_or_else(|| {
        Error::ParseError(format!(
            "<{}> in {} is missing the '{}' attribute",
            tag, DESCRIPTOR_FILE, key
        ))
    })
}

fn root_mut<'a>(
    descriptor: &'a mut Option<PackageDescriptor>,
    tag: &str,
) -> Result<&'a mut PackageDescriptor> {
    descriptor.as_mut().ok_or_else(|| {
        Error::ParseError(format!(
            "<{}> appears outside <package> in {}",
            tag, DESCRIPTOR_FILE
        ))
    })
}

fn start_element(
    descriptor: &mut Option<PackageDescriptor>,
    tag: &str,
    e: &BytesStart<'_>,
) -> Result<()> {
    match tag {
        "package" => {
            let attrs = attributes(e)?;
            *descriptor = Some(PackageDescriptor {
                name: required(&attrs, tag, "name")?,
                group: attrs.get("group").cloned().unwrap_or_default(),
                versions: Vec::new(),
                dependencies: Vec::new(),
            });
        }
        "dependency" => {
            let attrs = attributes(e)?;
            let range = match attrs.get("version") {
                Some(text) => VersionRange::parse(text)?,
                None => VersionRange::default_query(),
            };
            let edge = DependencyEdge {
                name: required(&attrs, tag, "name")?,
                group: attrs.get("group").cloned().unwrap_or_default(),
                range,
                platforms: attrs
                    .get("platforms")
                    .map(|p| PlatformFilter::parse(p))
                    .unwrap_or_default(),
                branch: attrs.get("branch").cloned(),
            };
            root_mut(descriptor, tag)?.dependencies.push(edge);
        }
        "versions" | "dependencies" => {
            root_mut(descriptor, tag)?;
        }
        other => debug!("Ignoring <{}> in {}", other, DESCRIPTOR_FILE),
    }
    Ok(())
}

/// Provider of dependency declarations for resolved packages
pub trait DescriptorSource {
    /// Load the descriptor of a package materialized at `location`
    ///
    /// Returns `Ok(None)` for packages that declare nothing.
    fn load(&self, identity: &PackageIdentity, location: &Path) -> Result<Option<PackageDescriptor>>;
}

/// Reads `pom.xml` from extracted package directories or archives
#[derive(Debug, Clone, Copy, Default)]
pub struct PomDescriptorSource;

impl DescriptorSource for PomDescriptorSource {
    fn load(&self, identity: &PackageIdentity, location: &Path) -> Result<Option<PackageDescriptor>> {
        debug!("Loading descriptor for {} from {}", identity, location.display());
        PackageDescriptor::load(location)
    }
}
