//! Write path to the Kubernetes API
//!
//! Components never talk to the API server directly; every mutation goes
//! through [`ClusterClient`] so that tests can substitute a mock and so that
//! the one-patch-per-call contract is visible in a single place.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::version::Version;
use crate::{Result, FIELD_MANAGER, NODE_VERSION_ANNOTATION};

/// Kinds of replicated workloads whose pod template carries a version
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadKind {
    /// An `apps/v1` DaemonSet
    DaemonSet,
    /// An `apps/v1` Deployment
    Deployment,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DaemonSet => f.write_str("DaemonSet"),
            Self::Deployment => f.write_str("Deployment"),
        }
    }
}

/// Identifies a namespaced workload to patch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadRef {
    /// Workload kind
    pub kind: WorkloadKind,
    /// Namespace of the workload
    pub namespace: String,
    /// Name of the workload
    pub name: String,
}

/// Trait abstracting the mutating Kubernetes calls made during an update
///
/// Each method is a single best-effort write. Failures are returned as-is;
/// nothing here retries.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Set the version annotation on a node, instructing its node agent to
    /// move to `version`
    async fn patch_node_version(&self, node: &str, version: &Version) -> Result<()>;

    /// Replace the image of one container in a workload's pod template
    async fn patch_container_image(
        &self,
        workload: &WorkloadRef,
        container: &str,
        image: &str,
    ) -> Result<()>;
}

/// Real Kubernetes client implementation
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Create a new KubeClusterClient wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn patch_params() -> PatchParams {
        PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn patch_node_version(&self, node: &str, version: &Version) -> Result<()> {
        let api: Api<Node> = Api::all(self.client.clone());
        let patch = node_version_patch(version);
        api.patch(node, &Self::patch_params(), &Patch::Merge(&patch))
            .await?;
        debug!(node = %node, version = %version, "Patched node version annotation");
        Ok(())
    }

    async fn patch_container_image(
        &self,
        workload: &WorkloadRef,
        container: &str,
        image: &str,
    ) -> Result<()> {
        let patch = container_image_patch(container, image);
        let params = Self::patch_params();
        match workload.kind {
            WorkloadKind::DaemonSet => {
                let api: Api<DaemonSet> =
                    Api::namespaced(self.client.clone(), &workload.namespace);
                api.patch(&workload.name, &params, &Patch::Strategic(&patch))
                    .await?;
            }
            WorkloadKind::Deployment => {
                let api: Api<Deployment> =
                    Api::namespaced(self.client.clone(), &workload.namespace);
                api.patch(&workload.name, &params, &Patch::Strategic(&patch))
                    .await?;
            }
        }
        debug!(
            kind = %workload.kind,
            namespace = %workload.namespace,
            name = %workload.name,
            container = %container,
            image = %image,
            "Patched container image"
        );
        Ok(())
    }
}

/// Merge patch setting the node version annotation
fn node_version_patch(version: &Version) -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "annotations": {
                NODE_VERSION_ANNOTATION: version.to_string(),
            }
        }
    })
}

/// Strategic merge patch replacing one container's image.
///
/// Containers merge by name, so sibling containers are left untouched.
fn container_image_patch(container: &str, image: &str) -> serde_json::Value {
    serde_json::json!({
        "spec": {
            "template": {
                "spec": {
                    "containers": [{
                        "name": container,
                        "image": image,
                    }]
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_patch_only_touches_version_annotation() {
        let version = Version::parse("v1.5.0").unwrap();
        let patch = node_version_patch(&version);
        assert_eq!(
            patch["metadata"]["annotations"][NODE_VERSION_ANNOTATION],
            "v1.5.0"
        );
        assert!(patch.get("spec").is_none());
    }

    #[test]
    fn container_patch_targets_named_container() {
        let patch = container_image_patch("kube-apiserver", "quay.io/coreos/hyperkube:v1.5.0");
        let containers = patch["spec"]["template"]["spec"]["containers"]
            .as_array()
            .unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0]["name"], "kube-apiserver");
        assert_eq!(containers[0]["image"], "quay.io/coreos/hyperkube:v1.5.0");
    }

    #[test]
    fn workload_kind_display() {
        assert_eq!(WorkloadKind::DaemonSet.to_string(), "DaemonSet");
        assert_eq!(WorkloadKind::Deployment.to_string(), "Deployment");
    }
}
