//! Managed cluster components
//!
//! A component wraps one live cluster object (a node, a DaemonSet or a
//! Deployment) and answers four questions about it: its name, its priority in
//! the update order, its current version, and how to move it one step toward
//! a target version. Components are snapshots: they are rebuilt from the
//! caches on every update call and never reused.

mod daemonset;
mod deployment;
mod node;

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, PodSpec};
#[cfg(test)]
use mockall::automock;

use crate::version::{ImageRef, Version};
use crate::{Error, Result};

pub use daemonset::DaemonSetComponent;
pub use deployment::DeploymentComponent;
pub use node::NodeComponent;

/// Priority of DaemonSet components (API-serving tier, proxies)
pub const DAEMONSET_PRIORITY: i32 = 10;
/// Priority of Deployment components (controller tier)
pub const DEPLOYMENT_PRIORITY: i32 = 20;
/// Priority of Node components (node agents)
pub const NODE_PRIORITY: i32 = 30;

/// The kind of cluster object a component wraps
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// A cluster node, versioned by annotation
    Node,
    /// A DaemonSet, versioned by pod template image tag
    DaemonSet,
    /// A Deployment, versioned by pod template image tag
    Deployment,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node => f.write_str("Node"),
            Self::DaemonSet => f.write_str("DaemonSet"),
            Self::Deployment => f.write_str("Deployment"),
        }
    }
}

/// What one `update_to_version` call found or did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateStep {
    /// A mutation was issued
    Updated,
    /// Already instructed to run the target, but its rollout has not settled;
    /// nothing was mutated and nothing after it may be touched yet
    InProgress,
    /// At the target and settled
    Converged,
}

impl UpdateStep {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Updated => "updated",
            Self::InProgress => "in_progress",
            Self::Converged => "converged",
        }
    }
}

/// A single updatable unit of the cluster
///
/// Priority encodes dependency order: a component with a lower number is
/// depended upon by components with higher numbers. Upgrades walk priorities
/// ascending, rollbacks descending.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Component: Send + Sync {
    /// Name of the underlying object
    fn name(&self) -> String;

    /// Kind of the underlying object
    fn kind(&self) -> ComponentKind;

    /// Position in the update order
    fn priority(&self) -> i32;

    /// Current version of the component
    ///
    /// Never defaults: a missing or unparsable version is an error.
    fn version(&self) -> Result<Version>;

    /// Move the component toward `target`.
    ///
    /// Issues at most one mutation, and never one when the component already
    /// reports `target`; in that case the variant's convergence check decides
    /// between [`UpdateStep::InProgress`] and [`UpdateStep::Converged`].
    async fn update_to_version(&self, target: &Version) -> Result<UpdateStep>;
}

/// A component of any of the three supported kinds
pub enum ManagedComponent {
    /// Node-backed component
    Node(NodeComponent),
    /// DaemonSet-backed component
    DaemonSet(DaemonSetComponent),
    /// Deployment-backed component
    Deployment(DeploymentComponent),
}

#[async_trait]
impl Component for ManagedComponent {
    fn name(&self) -> String {
        match self {
            Self::Node(c) => c.name(),
            Self::DaemonSet(c) => c.name(),
            Self::Deployment(c) => c.name(),
        }
    }

    fn kind(&self) -> ComponentKind {
        match self {
            Self::Node(_) => ComponentKind::Node,
            Self::DaemonSet(_) => ComponentKind::DaemonSet,
            Self::Deployment(_) => ComponentKind::Deployment,
        }
    }

    fn priority(&self) -> i32 {
        match self {
            Self::Node(c) => c.priority(),
            Self::DaemonSet(c) => c.priority(),
            Self::Deployment(c) => c.priority(),
        }
    }

    fn version(&self) -> Result<Version> {
        match self {
            Self::Node(c) => c.version(),
            Self::DaemonSet(c) => c.version(),
            Self::Deployment(c) => c.version(),
        }
    }

    async fn update_to_version(&self, target: &Version) -> Result<UpdateStep> {
        match self {
            Self::Node(c) => c.update_to_version(target).await,
            Self::DaemonSet(c) => c.update_to_version(target).await,
            Self::Deployment(c) => c.update_to_version(target).await,
        }
    }
}

// =============================================================================
// Pod template helpers shared by the workload variants
// =============================================================================

/// Pick the container that carries the workload's version.
///
/// The container named after the workload wins; otherwise the first one.
pub(crate) fn versioned_container<'a>(
    workload: &str,
    pod_spec: Option<&'a PodSpec>,
) -> Result<&'a Container> {
    let containers = pod_spec
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default();
    containers
        .iter()
        .find(|c| c.name == workload)
        .or_else(|| containers.first())
        .ok_or_else(|| Error::version_unavailable(workload, "pod template has no containers"))
}

/// Parse the image of a versioned container
pub(crate) fn container_image(workload: &str, container: &Container) -> Result<ImageRef> {
    let image = container.image.as_deref().ok_or_else(|| {
        Error::version_unavailable(
            workload,
            format!("container {} has no image", container.name),
        )
    })?;
    ImageRef::parse(image)
}
