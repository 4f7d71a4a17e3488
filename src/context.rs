// src/context.rs

//! Resolution context
//!
//! Everything a resolution needs (configuration, the tier set and the
//! descriptor source) travels in one [`ResolutionContext`] passed by
//! reference. Independent contexts can coexist in one process, which is
//! what lets tests run resolutions side by side over separate directories.

use crate::config::{ConfigError, ContextConfig};
use crate::error::Result;
use crate::negotiate::{Negotiator, TierSet};
use crate::package::{DescriptorSource, PackageDescriptor, PackageIdentity, PomDescriptorSource};
use crate::repository::{
    ExtractedRepository, FileRepository, HttpPackageDatabase, RemoteRepository,
};
use crate::resolver::DependencyTree;
use std::path::Path;
use tracing::info;

/// Configuration, tiers and descriptor source for one resolution
pub struct ResolutionContext {
    config: ContextConfig,
    tiers: TierSet,
    descriptors: Box<dyn DescriptorSource>,
}

impl ResolutionContext {
    /// Context over injected tiers, reading `pom.xml` descriptors
    pub fn new(config: ContextConfig, tiers: TierSet) -> Self {
        Self {
            config,
            tiers,
            descriptors: Box::new(PomDescriptorSource),
        }
    }

    pub fn with_descriptors(mut self, descriptors: Box<dyn DescriptorSource>) -> Self {
        self.descriptors = descriptors;
        self
    }

    /// Build the standard tiers described by `config`
    pub fn from_config(config: ContextConfig) -> Result<Self> {
        config.validate()?;
        let repo = &config.repository;
        let timeout = config.lock_timeout();

        let mut tiers = TierSet::new(
            Box::new(FileRepository::cache(&repo.cache).with_lock_timeout(timeout)),
            Box::new(ExtractedRepository::share(&repo.share).with_lock_timeout(timeout)),
            Box::new(ExtractedRepository::target(&repo.target).with_lock_timeout(timeout)),
        );

        if config.remote_enabled() {
            if let Some(url) = &repo.remote {
                let db = HttpPackageDatabase::new(url)?;
                tiers = tiers.with_remote(Box::new(RemoteRepository::new(Box::new(db))));
            }
        } else if repo.remote.is_some() {
            info!("Offline mode, remote tier disabled");
        }

        if let Some(local) = &repo.local {
            tiers = tiers.with_local(Box::new(
                FileRepository::local(local).with_lock_timeout(timeout),
            ));
        }

        Ok(Self::new(config, tiers))
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn tiers(&self) -> &TierSet {
        &self.tiers
    }

    pub fn negotiator(&self) -> Negotiator<'_> {
        Negotiator::new(&self.tiers)
    }

    pub fn descriptors(&self) -> &dyn DescriptorSource {
        self.descriptors.as_ref()
    }

    /// Identity on the configured default branch
    pub fn identity(
        &self,
        name: impl Into<String>,
        group: impl Into<String>,
        platform: impl Into<String>,
    ) -> PackageIdentity {
        PackageIdentity::new(
            name,
            group,
            self.config.resolution.default_branch.clone(),
            platform,
        )
    }

    /// Build one dependency tree per configured platform
    ///
    /// Trees come back in the order of `resolution.platforms`. The first
    /// platform that fails to resolve aborts the whole call.
    pub fn resolve_platforms(
        &self,
        descriptor: &PackageDescriptor,
        location: &Path,
    ) -> Result<Vec<DependencyTree>> {
        let platforms = &self.config.resolution.platforms;
        if platforms.is_empty() {
            return Err(ConfigError::Invalid(
                "resolution.platforms lists no platform to resolve".to_string(),
            )
            .into());
        }

        let branch = &self.config.resolution.default_branch;
        let mut trees = Vec::with_capacity(platforms.len());
        for platform in platforms {
            let mut tree = DependencyTree::from_descriptor(descriptor, platform, branch, location);
            tree.build(self)?;
            trees.push(tree);
        }
        Ok(trees)
    }
}
