// src/resolver/info.rs

//! `dependencies.info` build provenance
//!
//! A line-oriented manifest embedded in a package archive. The first line
//! describes the package itself; each following line names one resolved
//! dependency:
//!
//! ```text
//! app, version=2.1.0, platform=x64
//! zlib, version=1.2.11
//! libpng, version=1.6.37
//! ```

use crate::error::{Error, Result};
use crate::version::ComparableVersion;

/// Archive entry holding the manifest
pub const DEPENDENCIES_INFO_FILE: &str = "dependencies.info";

/// One dependency line of the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyInfo {
    pub name: String,
    pub version: ComparableVersion,
}

/// Render a manifest
pub fn format_dependencies(
    root: &str,
    root_version: &ComparableVersion,
    platform: &str,
    dependencies: &[DependencyInfo],
) -> String {
    let mut out = format!("{root}, version={root_version}, platform={platform}\n");
    for dep in dependencies {
        out.push_str(&format!("{}, version={}\n", dep.name, dep.version));
    }
    out
}

/// Read the dependency lines of a manifest, skipping the header
pub fn retrieve_dependencies(content: &str) -> Result<Vec<DependencyInfo>> {
    content
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> Result<DependencyInfo> {
    let mut fields = line.split(',').map(str::trim);
    let name = fields
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::ParseError(format!("Missing package name in '{line}'")))?;

    let version = fields
        .find_map(|field| field.strip_prefix("version="))
        .ok_or_else(|| Error::ParseError(format!("Missing version in '{line}'")))?;

    Ok(DependencyInfo {
        name: name.to_string(),
        version: ComparableVersion::parse(version)?,
    })
}
