// src/repository/layout.rs

//! On-disk layout strategies for repository tiers
//!
//! Tiers differ only in how a package identity maps to a directory and an
//! entry name. A layout is two templates over the placeholders `{group}`,
//! `{name}`, `{branch}`, `{platform}` and `{version}`:
//!
//! - `root_template`: directory holding every version of one identity
//! - `version_template`: entry for one version inside that directory; an
//!   empty template means the root itself is the single slot

use crate::package::PackageIdentity;
use crate::version::ComparableVersion;
use std::path::{Path, PathBuf};

const VERSION_PLACEHOLDER: &str = "{version}";

/// Path construction strategy for a tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root_template: String,
    pub version_template: String,
}

impl Layout {
    pub fn new(root_template: impl Into<String>, version_template: impl Into<String>) -> Self {
        Self {
            root_template: root_template.into(),
            version_template: version_template.into(),
        }
    }

    /// Archive store keyed by every identity field (remote keys, cache)
    pub fn archive() -> Self {
        Self::new("{group}/{name}/{branch}/{platform}", "{name}-{version}.tar.gz")
    }

    /// Project build output
    pub fn local() -> Self {
        Self::new("{platform}/{branch}", "{name}-{version}.tar.gz")
    }

    /// Shared extraction area, one directory per version
    pub fn share() -> Self {
        Self::new("{group}/{name}/{branch}/{platform}", "{version}")
    }

    /// Per-project extraction, one slot per package and platform
    pub fn target() -> Self {
        Self::new("{name}/{platform}", "")
    }

    pub fn is_single_slot(&self) -> bool {
        self.version_template.is_empty()
    }

    /// Directory holding the identity's versions under `base`
    pub fn root_dir(&self, base: &Path, identity: &PackageIdentity) -> PathBuf {
        base.join(expand(&self.root_template, identity))
    }

    /// Entry name for one version; empty for single-slot layouts
    pub fn entry_name(&self, identity: &PackageIdentity, version: &ComparableVersion) -> String {
        expand(&self.version_template, identity).replace(VERSION_PLACEHOLDER, &version.to_string())
    }

    /// Full path of one version's entry
    pub fn entry_path(
        &self,
        base: &Path,
        identity: &PackageIdentity,
        version: &ComparableVersion,
    ) -> PathBuf {
        let root = self.root_dir(base, identity);
        if self.is_single_slot() {
            root
        } else {
            root.join(self.entry_name(identity, version))
        }
    }

    /// Recover the version from an entry name, if it matches this layout
    pub fn version_of(&self, identity: &PackageIdentity, entry: &str) -> Option<ComparableVersion> {
        let expanded = expand(&self.version_template, identity);
        let (prefix, suffix) = expanded.split_once(VERSION_PLACEHOLDER)?;
        let middle = entry.strip_prefix(prefix)?.strip_suffix(suffix)?;
        match ComparableVersion::parse(middle) {
            Ok(version) if !version.is_null() => Some(version),
            _ => None,
        }
    }
}

fn expand(template: &str, identity: &PackageIdentity) -> String {
    template
        .replace("{group}", &identity.group)
        .replace("{name}", &identity.name)
        .replace("{branch}", &identity.branch)
        .replace("{platform}", &identity.platform)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> PackageIdentity {
        PackageIdentity::new("zlib-ng", "thirdparty", "default", "x64")
    }

    fn v(s: &str) -> ComparableVersion {
        ComparableVersion::parse(s).unwrap()
    }

    #[test]
    fn test_archive_layout_paths() {
        let layout = Layout::archive();
        let base = Path::new("/cache");
        assert_eq!(
            layout.root_dir(base, &identity()),
            PathBuf::from("/cache/thirdparty/zlib-ng/default/x64")
        );
        assert_eq!(
            layout.entry_path(base, &identity(), &v("1.2.11")),
            PathBuf::from("/cache/thirdparty/zlib-ng/default/x64/zlib-ng-1.2.11.tar.gz")
        );
    }

    #[test]
    fn test_version_of_round_trips() {
        for layout in [Layout::archive(), Layout::local(), Layout::share()] {
            let entry = layout.entry_name(&identity(), &v("2.0.1"));
            assert_eq!(layout.version_of(&identity(), &entry), Some(v("2.0.1")));
        }
    }

    #[test]
    fn test_version_of_rejects_foreign_entries() {
        let layout = Layout::archive();
        assert_eq!(layout.version_of(&identity(), "zlib-ng-1.2.tar.gz.md5"), None);
        assert_eq!(layout.version_of(&identity(), "other-1.2.tar.gz"), None);
        assert_eq!(layout.version_of(&identity(), "zlib-ng-.tar.gz"), None);
        assert_eq!(layout.version_of(&identity(), ".tmpA1b2"), None);
        assert_eq!(Layout::share().version_of(&identity(), "1.0.stamp"), None);
    }

    #[test]
    fn test_single_slot() {
        let layout = Layout::target();
        assert!(layout.is_single_slot());
        let base = Path::new("deps");
        assert_eq!(
            layout.entry_path(base, &identity(), &v("1.0")),
            PathBuf::from("deps/zlib-ng/x64")
        );
        assert_eq!(layout.version_of(&identity(), "anything"), None);
    }
}
