// src/config.rs

//! Resolution context configuration
//!
//! A context is configured from a small TOML file:
//!
//! ```toml
//! [repository]
//! remote = "https://packages.example.com/api"
//! cache = "/var/cache/strata"
//! share = "/opt/strata/share"
//! target = "deps"
//! local = "out"
//! offline = false
//!
//! [resolution]
//! default_branch = "default"
//! platforms = ["x64", "win32"]
//! lock_timeout_secs = 300
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default branch used when a package does not name one
pub const DEFAULT_BRANCH: &str = "default";

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub repository: RepositoryConfig,

    #[serde(default)]
    pub resolution: ResolutionConfig,
}

/// Where each tier lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Package database URL; no remote tier when unset
    #[serde(default)]
    pub remote: Option<String>,

    /// Machine-wide archive cache
    #[serde(default = "default_cache")]
    pub cache: PathBuf,

    /// Machine-wide extraction area
    #[serde(default = "default_share")]
    pub share: PathBuf,

    /// Project dependency directory
    #[serde(default = "default_target")]
    pub target: PathBuf,

    /// Project build output, needed only for publishing
    #[serde(default)]
    pub local: Option<PathBuf>,

    /// Skip the remote tier even when configured
    #[serde(default)]
    pub offline: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            remote: None,
            cache: default_cache(),
            share: default_share(),
            target: default_target(),
            local: None,
            offline: false,
        }
    }
}

/// Resolution policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionConfig {
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Platforms `ResolutionContext::resolve_platforms` builds a tree for
    #[serde(default)]
    pub platforms: Vec<String>,

    /// Age after which an index `.writelock` is reclaimed
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            default_branch: default_branch(),
            platforms: Vec::new(),
            lock_timeout_secs: default_lock_timeout(),
        }
    }
}

fn default_cache() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("strata")
}

fn default_share() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("strata")
        .join("share")
}

fn default_target() -> PathBuf {
    PathBuf::from("deps")
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

fn default_lock_timeout() -> u64 {
    300
}

impl ContextConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.resolution.lock_timeout_secs)
    }

    /// Whether a remote tier should be built
    pub fn remote_enabled(&self) -> bool {
        self.repository.remote.is_some() && !self.repository.offline
    }

    /// Check the configuration for consistency
    pub fn validate(&self) -> ConfigResult<()> {
        let repo = &self.repository;
        for (name, path) in [
            ("cache", &repo.cache),
            ("share", &repo.share),
            ("target", &repo.target),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "repository.{name} must not be empty"
                )));
            }
        }

        if repo.remote.as_deref().is_some_and(|url| url.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "repository.remote must not be empty when set".to_string(),
            ));
        }

        if self.resolution.default_branch.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "resolution.default_branch must not be empty".to_string(),
            ));
        }

        if self.resolution.lock_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "resolution.lock_timeout_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse a configuration from a file
pub fn parse_config_file(path: &Path) -> ConfigResult<ContextConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config_string(&content)
}

/// Parse a configuration from a string
pub fn parse_config_string(content: &str) -> ConfigResult<ContextConfig> {
    let config: ContextConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[repository]
remote = "https://packages.example.com/api"
cache = "/var/cache/strata"
share = "/opt/strata/share"
target = "deps"
local = "out"

[resolution]
default_branch = "main"
platforms = ["x64", "win32"]
lock_timeout_secs = 60
"#;

        let config = parse_config_string(toml).unwrap();
        assert_eq!(
            config.repository.remote.as_deref(),
            Some("https://packages.example.com/api")
        );
        assert_eq!(config.repository.cache, PathBuf::from("/var/cache/strata"));
        assert_eq!(config.repository.local, Some(PathBuf::from("out")));
        assert_eq!(config.resolution.default_branch, "main");
        assert_eq!(config.resolution.platforms, vec!["x64", "win32"]);
        assert_eq!(config.lock_timeout(), Duration::from_secs(60));
        assert!(config.remote_enabled());
    }

    #[test]
    fn test_defaults() {
        let config = parse_config_string("").unwrap();
        assert_eq!(config.resolution.default_branch, DEFAULT_BRANCH);
        assert_eq!(config.lock_timeout(), Duration::from_secs(300));
        assert_eq!(config.repository.target, PathBuf::from("deps"));
        assert!(!config.remote_enabled());
        assert_eq!(config, ContextConfig::default());
    }

    #[test]
    fn test_offline_disables_remote() {
        let config = parse_config_string(
            r#"
[repository]
remote = "http://localhost:8080"
offline = true
"#,
        )
        .unwrap();
        assert!(!config.remote_enabled());
    }

    #[test]
    fn test_invalid_values() {
        let result = parse_config_string("[resolution]\nlock_timeout_secs = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = parse_config_string("[resolution]\ndefault_branch = \"  \"\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = parse_config_string("[repository]\ntarget = \"\"\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_toml() {
        let result = parse_config_string("[repository\ncache = ");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_parse_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "[resolution]\nplatforms = [\"x64\"]\n").unwrap();

        let config = parse_config_file(&path).unwrap();
        assert_eq!(config.resolution.platforms, vec!["x64"]);

        assert!(matches!(
            parse_config_file(&dir.path().join("missing.toml")),
            Err(ConfigError::ReadError(_))
        ));
    }
}
