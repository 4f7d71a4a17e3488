// src/lib.rs

//! Strata dependency resolution engine
//!
//! Resolves a package's dependency tree against a chain of repository
//! tiers and negotiates the best available version of each dependency
//! down into a project's target directory.
//!
//! # Architecture
//!
//! - Versions: dotted numeric versions and bracketed range expressions
//! - Tiers: Remote → Cache → Share → Target, plus Local build output, all
//!   behind one `Repository` trait
//! - Negotiation: per-package query, freshness check and downward
//!   propagation, with signatures copied between tiers to detect staleness
//! - Trees: recursive, fail-fast resolution with conflict and cycle
//!   reporting
//! - Context: configuration and tiers passed explicitly, no global state

pub mod archive;
pub mod config;
pub mod context;
mod error;
pub mod negotiate;
pub mod package;
pub mod repository;
pub mod resolver;
pub mod vcs;
pub mod version;

pub use config::{ConfigError, ContextConfig, parse_config_file, parse_config_string};
pub use context::ResolutionContext;
pub use error::{Error, Result};
pub use negotiate::{Negotiation, Negotiator, TierSet};
pub use package::{
    DependencyEdge, PackageDescriptor, PackageIdentity, PackageState, PlatformFilter, Signature,
    Tier, TierState,
};
pub use repository::{
    ExtractedRepository, FileRepository, HttpPackageDatabase, PackageDatabase, RemoteRecord,
    RemoteRepository, Repository,
};
pub use resolver::{Conflict, DependencyInstance, DependencyTree, PackageInstance};
pub use vcs::{VcsInfo, VersionControl};
pub use version::{ComparableVersion, RangeKind, VersionRange};
