//! Deployment components

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use tracing::{debug, info};

use super::{
    container_image, versioned_container, Component, ComponentKind, UpdateStep,
    DEPLOYMENT_PRIORITY,
};
use crate::client::{ClusterClient, WorkloadKind, WorkloadRef};
use crate::version::{ImageRef, Version};
use crate::Result;

/// A Deployment, updated by retagging its pod template image
pub struct DeploymentComponent {
    client: Arc<dyn ClusterClient>,
    deployment: Arc<Deployment>,
}

impl DeploymentComponent {
    /// Wrap a cached Deployment
    pub fn new(client: Arc<dyn ClusterClient>, deployment: Arc<Deployment>) -> Self {
        Self { client, deployment }
    }

    fn image(&self) -> Result<(String, ImageRef)> {
        let name = self.name();
        let pod_spec = self
            .deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref());
        let container = versioned_container(&name, pod_spec)?;
        let image = container_image(&name, container)?;
        Ok((container.name.clone(), image))
    }

    /// Whether every desired replica is updated and ready at the current
    /// template generation
    fn is_converged(&self) -> bool {
        let desired = self
            .deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1);
        let Some(status) = self.deployment.status.as_ref() else {
            return false;
        };
        let generation_observed = match (self.deployment.metadata.generation, status.observed_generation) {
            (Some(generation), Some(observed)) => observed >= generation,
            (Some(_), None) => false,
            (None, _) => true,
        };
        generation_observed
            && status.updated_replicas.unwrap_or(0) == desired
            && status.ready_replicas.unwrap_or(0) == desired
    }
}

#[async_trait]
impl Component for DeploymentComponent {
    fn name(&self) -> String {
        self.deployment.name_any()
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Deployment
    }

    fn priority(&self) -> i32 {
        DEPLOYMENT_PRIORITY
    }

    fn version(&self) -> Result<Version> {
        self.image()?.1.version()
    }

    async fn update_to_version(&self, target: &Version) -> Result<UpdateStep> {
        let name = self.name();
        let (container, image) = self.image()?;

        if &image.version()? == target {
            if self.is_converged() {
                debug!(deployment = %name, version = %target, "Deployment already at target version");
                return Ok(UpdateStep::Converged);
            }
            debug!(deployment = %name, version = %target, "Deployment rollout in progress");
            return Ok(UpdateStep::InProgress);
        }

        let workload = WorkloadRef {
            kind: WorkloadKind::Deployment,
            namespace: self.deployment.namespace().unwrap_or_default(),
            name: name.clone(),
        };
        let new_image = image.with_version(target);
        info!(deployment = %name, from = %image, to = %new_image, "Updating Deployment image");
        self.client
            .patch_container_image(&workload, &container, &new_image)
            .await?;
        Ok(UpdateStep::Updated)
    }
}
