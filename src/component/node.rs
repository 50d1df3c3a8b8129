//! Node components
//!
//! A node's version lives in the [`NODE_VERSION_ANNOTATION`] annotation. The
//! controller only writes that annotation; an agent running on the node acts
//! on it and the kubelet eventually reports the new version in
//! `status.nodeInfo.kubeletVersion`.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::{debug, info};

use super::{Component, ComponentKind, UpdateStep, NODE_PRIORITY};
use crate::client::ClusterClient;
use crate::version::Version;
use crate::{Error, Result, NODE_VERSION_ANNOTATION};

/// A cluster node, updated through its version annotation
pub struct NodeComponent {
    client: Arc<dyn ClusterClient>,
    node: Arc<Node>,
}

impl NodeComponent {
    /// Wrap a cached node
    pub fn new(client: Arc<dyn ClusterClient>, node: Arc<Node>) -> Self {
        Self { client, node }
    }

    /// Whether the node is Ready and its kubelet reports `target`
    fn is_converged(&self, target: &Version) -> bool {
        let Some(status) = self.node.status.as_ref() else {
            return false;
        };
        let ready = status
            .conditions
            .iter()
            .flatten()
            .any(|c| c.type_ == "Ready" && c.status == "True");
        let kubelet_at_target = status
            .node_info
            .as_ref()
            .and_then(|info| Version::parse(&info.kubelet_version).ok())
            .is_some_and(|v| &v == target);
        ready && kubelet_at_target
    }
}

#[async_trait]
impl Component for NodeComponent {
    fn name(&self) -> String {
        self.node.name_any()
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Node
    }

    fn priority(&self) -> i32 {
        NODE_PRIORITY
    }

    fn version(&self) -> Result<Version> {
        let value = self
            .node
            .annotations()
            .get(NODE_VERSION_ANNOTATION)
            .ok_or_else(|| {
                Error::version_unavailable(
                    self.name(),
                    format!("node has no {NODE_VERSION_ANNOTATION} annotation"),
                )
            })?;
        Version::parse(value)
    }

    async fn update_to_version(&self, target: &Version) -> Result<UpdateStep> {
        let name = self.name();
        if &self.version()? == target {
            if self.is_converged(target) {
                debug!(node = %name, version = %target, "Node already at target version");
                return Ok(UpdateStep::Converged);
            }
            debug!(node = %name, version = %target, "Node update in progress");
            return Ok(UpdateStep::InProgress);
        }

        info!(node = %name, version = %target, "Updating node version annotation");
        self.client.patch_node_version(&name, target).await?;
        Ok(UpdateStep::Updated)
    }
}
