// src/negotiate.rs

//! Version negotiation across repository tiers
//!
//! A negotiation pass takes one package identity and a version range and
//! makes sure the Target tier holds the best version any tier can supply:
//!
//! 1. Query Target, Share and Cache for their best in-range version
//! 2. Query Remote; an unreachable remote is logged and skipped
//! 3. If every consulted tier already agrees on version and signature,
//!    stop (the warm-cache path)
//! 4. Propagate downward pairwise (Remote→Cache, Cache→Share,
//!    Share→Target) wherever the upstream copy is newer or differs
//! 5. Succeed once Target holds a version; otherwise report why not
//!
//! Publishing runs the chain the other way: Local→Cache→Remote.

use crate::error::{Error, Result};
use crate::package::{PackageState, Tier};
use crate::repository::Repository;
use crate::version::{ComparableVersion, VersionRange};
use tracing::{debug, info, warn};

/// Downward propagation order
const DESCENT: [(Tier, Tier); 3] = [
    (Tier::Remote, Tier::Cache),
    (Tier::Cache, Tier::Share),
    (Tier::Share, Tier::Target),
];

/// The repositories taking part in negotiation
pub struct TierSet {
    remote: Option<Box<dyn Repository>>,
    cache: Box<dyn Repository>,
    share: Box<dyn Repository>,
    target: Box<dyn Repository>,
    local: Option<Box<dyn Repository>>,
}

impl TierSet {
    pub fn new(
        cache: Box<dyn Repository>,
        share: Box<dyn Repository>,
        target: Box<dyn Repository>,
    ) -> Self {
        Self {
            remote: None,
            cache,
            share,
            target,
            local: None,
        }
    }

    pub fn with_remote(mut self, remote: Box<dyn Repository>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_local(mut self, local: Box<dyn Repository>) -> Self {
        self.local = Some(local);
        self
    }

    /// Repository serving `tier`, if configured
    pub fn get(&self, tier: Tier) -> Option<&dyn Repository> {
        match tier {
            Tier::Remote => self.remote.as_deref(),
            Tier::Cache => Some(self.cache.as_ref()),
            Tier::Share => Some(self.share.as_ref()),
            Tier::Target => Some(self.target.as_ref()),
            Tier::Local => self.local.as_deref(),
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }
}

/// Outcome of a successful negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    /// Version now present at Target
    pub version: ComparableVersion,
    /// Submits performed, as (from, to) pairs
    pub propagated: Vec<(Tier, Tier)>,
    /// Whether the remote tier answered its query
    pub remote_reachable: bool,
}

impl Negotiation {
    pub fn submits(&self) -> usize {
        self.propagated.len()
    }

    /// True when nothing had to be copied
    pub fn was_fresh(&self) -> bool {
        self.propagated.is_empty()
    }
}

/// Drives queries and submits across a [`TierSet`]
pub struct Negotiator<'a> {
    tiers: &'a TierSet,
}

impl<'a> Negotiator<'a> {
    pub fn new(tiers: &'a TierSet) -> Self {
        Self { tiers }
    }

    /// Bring Target up to the best version satisfying `range`
    pub fn update(&self, state: &mut PackageState, range: &VersionRange) -> Result<Negotiation> {
        debug!("Negotiating {} in {}", state.identity, range);

        for tier in [Tier::Target, Tier::Share, Tier::Cache] {
            if let Some(repository) = self.tiers.get(tier) {
                repository.query_in_range(state, range)?;
            }
        }

        let mut remote_error = None;
        let mut remote_reachable = false;
        if let Some(remote) = self.tiers.get(Tier::Remote) {
            match remote.query_in_range(state, range) {
                Ok(_) => remote_reachable = true,
                Err(e) if e.is_transport() => {
                    warn!(
                        "Remote unavailable for {}, using local tiers: {}",
                        state.identity, e
                    );
                    state.tier_mut(Tier::Remote).clear();
                    remote_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        if is_fresh(state, remote_reachable) {
            debug!("{} is current at every tier", state.identity);
            return Ok(Negotiation {
                version: state.tier(Tier::Target).version.clone(),
                propagated: Vec::new(),
                remote_reachable,
            });
        }

        let mut propagated = Vec::new();
        for (upstream, downstream) in DESCENT {
            let (Some(from), Some(to)) = (self.tiers.get(upstream), self.tiers.get(downstream))
            else {
                continue;
            };
            if !needs_propagation(state, upstream, downstream) {
                continue;
            }

            info!(
                "Propagating {} version {} from {} to {}",
                state.identity,
                state.tier(upstream).version,
                upstream,
                downstream
            );
            match to.submit(state, from) {
                Ok(()) => propagated.push((upstream, downstream)),
                Err(e) if upstream == Tier::Remote && e.is_transport() => {
                    warn!(
                        "Fetching {} from remote failed, keeping {} at {}: {}",
                        state.identity,
                        state.tier(downstream).version,
                        downstream,
                        e
                    );
                    state.tier_mut(Tier::Remote).clear();
                    remote_reachable = false;
                    remote_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let target = state.tier(Tier::Target);
        if target.exists() {
            return Ok(Negotiation {
                version: target.version.clone(),
                propagated,
                remote_reachable,
            });
        }

        match remote_error {
            Some(e) => Err(e),
            None => Err(Error::NotFoundError(format!(
                "No tier has {} in {}",
                state.identity, range
            ))),
        }
    }

    /// Push a locally built `version` up through Cache and, if configured,
    /// Remote
    pub fn publish(
        &self,
        state: &mut PackageState,
        version: &ComparableVersion,
    ) -> Result<Vec<(Tier, Tier)>> {
        let local = self.tiers.get(Tier::Local).ok_or_else(|| {
            Error::NotFoundError("No local tier configured for publishing".to_string())
        })?;

        let exact = VersionRange::Unique(version.clone());
        if !local.query_in_range(state, &exact)? {
            return Err(Error::NotFoundError(format!(
                "{} version {} has not been built",
                state.identity, version
            )));
        }

        let mut propagated = Vec::new();
        let mut from = local;
        for tier in [Tier::Cache, Tier::Remote] {
            let Some(to) = self.tiers.get(tier) else {
                continue;
            };
            info!(
                "Publishing {} version {} from {} to {}",
                state.identity,
                version,
                from.tier(),
                tier
            );
            to.submit(state, from)?;
            propagated.push((from.tier(), tier));
            from = to;
        }
        Ok(propagated)
    }
}

/// True when every consulted tier holds Target's exact version and signature
fn is_fresh(state: &PackageState, remote_reachable: bool) -> bool {
    let target = state.tier(Tier::Target);
    let chain: &[Tier] = if remote_reachable {
        &[Tier::Remote, Tier::Cache, Tier::Share]
    } else {
        &[Tier::Cache, Tier::Share]
    };

    target.exists()
        && chain.iter().all(|tier| {
            let slot = state.tier(*tier);
            slot.exists() && slot.version == target.version && slot.signature == target.signature
        })
}

/// Whether `downstream` must take `upstream`'s copy
fn needs_propagation(state: &PackageState, upstream: Tier, downstream: Tier) -> bool {
    let up = state.tier(upstream);
    let down = state.tier(downstream);
    if !up.exists() {
        return false;
    }
    if !down.exists() || up.version > down.version {
        return true;
    }
    up.version == down.version && up.signature != down.signature
}
