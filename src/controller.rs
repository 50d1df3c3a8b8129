//! The update controller
//!
//! `update_to_version` takes at most one step toward the target version per
//! call: it rebuilds the catalog from the caches, orders components by
//! priority in the direction of the version skew, and mutates the first
//! component that is not yet at the target. A component that already runs
//! the target but has not finished rolling out holds the walk: nothing after
//! it is touched until it settles. It keeps no cursor between
//! calls; progress lives entirely in cluster state, which is re-read every
//! time. Callers drive it on an interval until it reports
//! [`UpdateOutcome::Converged`].
//!
//! Invocations are expected to be serial. Nothing here guards against two
//! concurrent calls each mutating a different component.

use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;

use kube::Client;
use tracing::{debug, error, info};

use crate::cache::ClusterCache;
use crate::catalog::build_catalog;
use crate::client::{ClusterClient, KubeClusterClient};
use crate::component::{Component, ComponentKind, UpdateStep};
use crate::metrics::UpdateTimer;
use crate::version::Version;
use crate::{Error, Result};

/// Result of a successful `update_to_version` call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Exactly one component was mutated
    Updated {
        /// Name of the mutated component
        name: String,
        /// Kind of the mutated component
        kind: ComponentKind,
    },
    /// A component at the target is still rolling out; nothing was mutated
    InProgress {
        /// Name of the component being waited on
        name: String,
        /// Kind of the component being waited on
        kind: ComponentKind,
    },
    /// No component needed a mutation
    Converged,
}

impl UpdateOutcome {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Updated { .. } => "updated",
            Self::InProgress { .. } => "in_progress",
            Self::Converged => "converged",
        }
    }

    /// Kind of the component this outcome names, if any
    pub fn kind(&self) -> Option<ComponentKind> {
        match self {
            Self::Updated { kind, .. } | Self::InProgress { kind, .. } => Some(*kind),
            Self::Converged => None,
        }
    }
}

/// Order in which priorities are walked
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Lowest priority first; used for upgrades and re-applies
    Ascending,
    /// Highest priority first; used for downgrades
    Descending,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => f.write_str("ascending"),
            Self::Descending => f.write_str("descending"),
        }
    }
}

/// Updates an entire cluster, one component per call
pub struct UpdateController {
    client: Arc<dyn ClusterClient>,
    cache: ClusterCache,
}

impl UpdateController {
    /// Create a controller and start its cache watches in `namespace`
    ///
    /// Must be called inside a tokio runtime. The watches run until the
    /// process exits.
    pub fn new(client: Client, namespace: &str) -> Self {
        let cache = ClusterCache::spawn(client.clone(), namespace);
        Self {
            client: Arc::new(KubeClusterClient::new(client)),
            cache,
        }
    }

    /// Create a controller over an existing client and caches
    pub fn with_parts(client: Arc<dyn ClusterClient>, cache: ClusterCache) -> Self {
        Self { client, cache }
    }

    /// The caches this controller reads from
    pub fn cache(&self) -> &ClusterCache {
        &self.cache
    }

    /// Take at most one step toward `target`
    pub async fn update_to_version(&self, target: &Version) -> Result<UpdateOutcome> {
        let timer = UpdateTimer::start();
        let result = match build_catalog(&self.cache, self.client.clone()) {
            Ok(components) => update_components(components, target).await,
            Err(e) => Err(e),
        };
        match &result {
            Ok(outcome) => timer.success(outcome),
            Err(e) => timer.error(e),
        }
        result
    }
}

/// Order `components` for `target` and mutate the first one that needs it.
///
/// Stops at the first component that reports a mutation, a rollout in
/// progress, or an error; components after it are not touched.
pub async fn update_components<C: Component>(
    mut components: Vec<C>,
    target: &Version,
) -> Result<UpdateOutcome> {
    let highest = highest_version(&components)?;
    let direction = sort_by_priority(&mut components, &highest, target);
    debug!(
        highest = %highest,
        target = %target,
        direction = %direction,
        components = components.len(),
        "Ordered components for update"
    );

    for component in &components {
        let name = component.name();
        let kind = component.kind();
        debug!(component = %name, kind = %kind, "Begin update of component");

        let step = component.update_to_version(target).await.map_err(|e| {
            let err = Error::component_update(&name, kind, e);
            error!(error = %err, "Component update failed");
            err
        })?;

        // Return after a single mutation; the next call re-reads the cluster so
        // out-of-band changes made during the rollout are picked up.
        match step {
            UpdateStep::Updated => {
                info!(component = %name, kind = %kind, target = %target, "Updated component");
                return Ok(UpdateOutcome::Updated { name, kind });
            }
            UpdateStep::InProgress => {
                info!(component = %name, kind = %kind, target = %target, "Waiting for component rollout");
                return Ok(UpdateOutcome::InProgress { name, kind });
            }
            UpdateStep::Converged => {
                debug!(component = %name, kind = %kind, "Component converged, moving on");
            }
        }
    }

    info!(target = %target, "All components at target version");
    Ok(UpdateOutcome::Converged)
}

/// The highest version reported by any component
pub fn highest_version<C: Component>(components: &[C]) -> Result<Version> {
    let mut highest: Option<Version> = None;
    for component in components {
        let version = component.version()?;
        if highest.as_ref().map_or(true, |h| version > *h) {
            highest = Some(version);
        }
    }
    highest.ok_or(Error::NoComponents)
}

/// Sort by priority in the direction implied by the version skew.
///
/// Moving to or above the highest running version walks priorities
/// ascending; moving below it walks them descending so that dependents are
/// rolled back before what they depend on. The sort is stable.
pub fn sort_by_priority<C: Component>(
    components: &mut [C],
    highest: &Version,
    target: &Version,
) -> Direction {
    if target >= highest {
        components.sort_by_key(|c| c.priority());
        Direction::Ascending
    } else {
        components.sort_by_key(|c| Reverse(c.priority()));
        Direction::Descending
    }
}
