//! DaemonSet components
//!
//! A DaemonSet's version is the image tag of its versioned container. Patching
//! the template is not enough to call the DaemonSet converged: every pod it
//! selects must be Ready and running the target image.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Pod;
use kube::core::{Selector, SelectorExt};
use kube::ResourceExt;
use tracing::{debug, info};

use super::{
    container_image, versioned_container, Component, ComponentKind, UpdateStep,
    DAEMONSET_PRIORITY,
};
use crate::client::{ClusterClient, WorkloadKind, WorkloadRef};
use crate::version::{ImageRef, Version};
use crate::{Error, Result};

/// A DaemonSet, updated by retagging its pod template image
pub struct DaemonSetComponent {
    client: Arc<dyn ClusterClient>,
    daemonset: Arc<DaemonSet>,
    /// Pods selected by this DaemonSet at catalog build time
    pods: Vec<Arc<Pod>>,
}

impl DaemonSetComponent {
    /// Wrap a cached DaemonSet, keeping the pods its selector matches.
    ///
    /// Fails if the selector cannot be evaluated, since convergence could
    /// then never be judged.
    pub fn new(
        client: Arc<dyn ClusterClient>,
        daemonset: Arc<DaemonSet>,
        pods: &[Arc<Pod>],
    ) -> Result<Self> {
        let selected = match daemonset.spec.as_ref() {
            Some(spec) => {
                let selector = Selector::try_from(spec.selector.clone()).map_err(|e| {
                    Error::version_unavailable(
                        daemonset.name_any(),
                        format!("invalid pod selector: {e}"),
                    )
                })?;
                let namespace = daemonset.namespace();
                pods.iter()
                    .filter(|pod| pod.namespace() == namespace)
                    .filter(|pod| selector.matches(pod.labels()))
                    .cloned()
                    .collect()
            }
            None => Vec::new(),
        };

        Ok(Self {
            client,
            daemonset,
            pods: selected,
        })
    }

    fn image(&self) -> Result<(String, ImageRef)> {
        let name = self.name();
        let pod_spec = self
            .daemonset
            .spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref());
        let container = versioned_container(&name, pod_spec)?;
        let image = container_image(&name, container)?;
        Ok((container.name.clone(), image))
    }

    /// Whether the rollout of `target` has finished on every selected pod
    fn is_converged(&self, container: &str, target: &Version) -> bool {
        let generation_observed = match (
            self.daemonset.metadata.generation,
            self.daemonset
                .status
                .as_ref()
                .and_then(|s| s.observed_generation),
        ) {
            (Some(generation), Some(observed)) => observed >= generation,
            (Some(_), None) => false,
            (None, _) => true,
        };
        if !generation_observed {
            return false;
        }

        if let Some(status) = self.daemonset.status.as_ref() {
            let desired = usize::try_from(status.desired_number_scheduled).unwrap_or_default();
            if self.pods.len() < desired {
                return false;
            }
        }

        self.pods
            .iter()
            .all(|pod| pod_is_ready(pod) && pod_runs_version(pod, container, target))
    }
}

#[async_trait]
impl Component for DaemonSetComponent {
    fn name(&self) -> String {
        self.daemonset.name_any()
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::DaemonSet
    }

    fn priority(&self) -> i32 {
        DAEMONSET_PRIORITY
    }

    fn version(&self) -> Result<Version> {
        self.image()?.1.version()
    }

    async fn update_to_version(&self, target: &Version) -> Result<UpdateStep> {
        let name = self.name();
        let (container, image) = self.image()?;

        if &image.version()? == target {
            if self.is_converged(&container, target) {
                debug!(daemonset = %name, version = %target, "DaemonSet already at target version");
                return Ok(UpdateStep::Converged);
            }
            debug!(
                daemonset = %name,
                version = %target,
                pods = self.pods.len(),
                "DaemonSet rollout in progress"
            );
            return Ok(UpdateStep::InProgress);
        }

        let workload = WorkloadRef {
            kind: WorkloadKind::DaemonSet,
            namespace: self.daemonset.namespace().unwrap_or_default(),
            name: name.clone(),
        };
        let new_image = image.with_version(target);
        info!(daemonset = %name, from = %image, to = %new_image, "Updating DaemonSet image");
        self.client
            .patch_container_image(&workload, &container, &new_image)
            .await?;
        Ok(UpdateStep::Updated)
    }
}

fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .into_iter()
        .flatten()
        .any(|c| c.type_ == "Ready" && c.status == "True")
}

fn pod_runs_version(pod: &Pod, container: &str, target: &Version) -> bool {
    pod.spec
        .iter()
        .flat_map(|spec| spec.containers.iter())
        .find(|c| c.name == container)
        .and_then(|c| c.image.as_deref())
        .and_then(|image| ImageRef::parse(image).ok())
        .and_then(|image| image.version().ok())
        .is_some_and(|v| &v == target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterClient;
    use crate::component::fixtures::{self, NAMESPACE, REPO};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
    use mockall::predicate::{always, eq};

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn component(client: MockClusterClient, ds: DaemonSet, pods: Vec<Pod>) -> DaemonSetComponent {
        let pods: Vec<Arc<Pod>> = pods.into_iter().map(Arc::new).collect();
        DaemonSetComponent::new(Arc::new(client), Arc::new(ds), &pods).unwrap()
    }

    #[test]
    fn reads_version_from_template_image() {
        let c = component(
            MockClusterClient::new(),
            fixtures::daemonset("kube-apiserver", "v1.4.3_coreos.0", 1),
            vec![],
        );
        assert_eq!(c.version().unwrap(), v("1.4.3+coreos.0"));
        assert_eq!(c.priority(), DAEMONSET_PRIORITY);
        assert_eq!(c.kind(), ComponentKind::DaemonSet);
    }

    #[test]
    fn untagged_image_is_an_error() {
        let mut ds = fixtures::daemonset("kube-proxy", "v1.4.3", 1);
        ds.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0].image =
            Some(REPO.to_string());
        let c = component(MockClusterClient::new(), ds, vec![]);
        assert!(matches!(
            c.version().unwrap_err(),
            Error::InvalidVersion { .. }
        ));
    }

    #[test]
    fn keeps_only_selected_pods() {
        let mut other_ns = fixtures::pod("apiserver-x", "kube-apiserver", "v1.4.3", true);
        other_ns.metadata.namespace = Some("default".to_string());
        let c = component(
            MockClusterClient::new(),
            fixtures::daemonset("kube-apiserver", "v1.4.3", 2),
            vec![
                fixtures::pod("apiserver-a", "kube-apiserver", "v1.4.3", true),
                fixtures::pod("proxy-a", "kube-proxy", "v1.4.3", true),
                other_ns,
            ],
        );
        assert_eq!(c.pods.len(), 1);
        assert_eq!(c.pods[0].name_any(), "apiserver-a");
    }

    #[tokio::test]
    async fn patches_versioned_container_when_behind() {
        let mut client = MockClusterClient::new();
        let expected = WorkloadRef {
            kind: WorkloadKind::DaemonSet,
            namespace: NAMESPACE.to_string(),
            name: "kube-apiserver".to_string(),
        };
        client
            .expect_patch_container_image()
            .with(
                eq(expected),
                eq("kube-apiserver"),
                eq("quay.io/coreos/hyperkube:v1.5.0_coreos.0"),
            )
            .times(1)
            .returning(|_, _, _| Ok(()));

        let c = component(
            client,
            fixtures::daemonset("kube-apiserver", "v1.4.3_coreos.0", 1),
            vec![fixtures::pod("apiserver-a", "kube-apiserver", "v1.4.3_coreos.0", true)],
        );
        assert_eq!(
            c.update_to_version(&v("1.5.0+coreos.0")).await.unwrap(),
            UpdateStep::Updated
        );
    }

    #[tokio::test]
    async fn partial_rollout_does_not_repatch() {
        // Template already at target, one pod still on the old image.
        let c = component(
            MockClusterClient::new(),
            fixtures::daemonset("kube-apiserver", "v1.5.0", 2),
            vec![
                fixtures::pod("apiserver-a", "kube-apiserver", "v1.5.0", true),
                fixtures::pod("apiserver-b", "kube-apiserver", "v1.4.3", true),
            ],
        );
        assert!(!c.is_converged("kube-apiserver", &v("1.5.0")));
        for _ in 0..2 {
            assert_eq!(
                c.update_to_version(&v("1.5.0")).await.unwrap(),
                UpdateStep::InProgress
            );
        }
    }

    #[tokio::test]
    async fn settled_rollout_reports_converged() {
        let c = component(
            MockClusterClient::new(),
            fixtures::daemonset("kube-apiserver", "v1.5.0", 1),
            vec![fixtures::pod("apiserver-a", "kube-apiserver", "v1.5.0", true)],
        );
        assert_eq!(
            c.update_to_version(&v("1.5.0")).await.unwrap(),
            UpdateStep::Converged
        );
    }

    #[test]
    fn convergence_requires_ready_pods_at_target() {
        let target = v("1.5.0");
        let ds = || fixtures::daemonset("kube-apiserver", "v1.5.0", 2);

        let settled = component(
            MockClusterClient::new(),
            ds(),
            vec![
                fixtures::pod("apiserver-a", "kube-apiserver", "v1.5.0", true),
                fixtures::pod("apiserver-b", "kube-apiserver", "v1.5.0", true),
            ],
        );
        assert!(settled.is_converged("kube-apiserver", &target));

        let unready = component(
            MockClusterClient::new(),
            ds(),
            vec![
                fixtures::pod("apiserver-a", "kube-apiserver", "v1.5.0", true),
                fixtures::pod("apiserver-b", "kube-apiserver", "v1.5.0", false),
            ],
        );
        assert!(!unready.is_converged("kube-apiserver", &target));

        let missing_pod = component(
            MockClusterClient::new(),
            ds(),
            vec![fixtures::pod("apiserver-a", "kube-apiserver", "v1.5.0", true)],
        );
        assert!(!missing_pod.is_converged("kube-apiserver", &target));
    }

    #[test]
    fn convergence_waits_for_observed_generation() {
        let mut ds = fixtures::daemonset("kube-apiserver", "v1.5.0", 1);
        ds.metadata.generation = Some(2);
        let c = component(
            MockClusterClient::new(),
            ds,
            vec![fixtures::pod("apiserver-a", "kube-apiserver", "v1.5.0", true)],
        );
        assert!(!c.is_converged("kube-apiserver", &v("1.5.0")));
    }

    #[tokio::test]
    async fn patch_failure_is_surfaced() {
        let mut client = MockClusterClient::new();
        client
            .expect_patch_container_image()
            .with(always(), always(), always())
            .returning(|_, _, _| Err(Error::config("conflict")));

        let c = component(
            client,
            fixtures::daemonset("kube-proxy", "v1.4.3", 1),
            vec![],
        );
        assert!(c.update_to_version(&v("1.5.0")).await.is_err());
    }

    #[test]
    fn match_expressions_select_pods() {
        let mut ds = fixtures::daemonset("kube-proxy", "v1.4.3", 2);
        ds.spec.as_mut().unwrap().selector = LabelSelector {
            match_expressions: Some(vec![
                LabelSelectorRequirement {
                    key: "k8s-app".to_string(),
                    operator: "In".to_string(),
                    values: Some(vec!["kube-proxy".to_string(), "kube-proxy-v2".to_string()]),
                },
                LabelSelectorRequirement {
                    key: "canary".to_string(),
                    operator: "DoesNotExist".to_string(),
                    values: None,
                },
            ]),
            ..Default::default()
        };
        let mut canary = fixtures::pod("proxy-c", "kube-proxy", "v1.4.3", true);
        canary
            .metadata
            .labels
            .as_mut()
            .unwrap()
            .insert("canary".to_string(), "true".to_string());

        let c = component(
            MockClusterClient::new(),
            ds,
            vec![
                fixtures::pod("proxy-a", "kube-proxy", "v1.4.3", true),
                fixtures::pod("proxy-b", "kube-proxy-v2", "v1.4.3", true),
                fixtures::pod("dns-a", "kube-dns", "v1.4.3", true),
                canary,
            ],
        );
        let mut names: Vec<String> = c.pods.iter().map(|p| p.name_any()).collect();
        names.sort();
        assert_eq!(names, vec!["proxy-a", "proxy-b"]);
    }

    #[test]
    fn unknown_selector_operator_is_an_error() {
        let mut ds = fixtures::daemonset("kube-proxy", "v1.4.3", 1);
        ds.spec.as_mut().unwrap().selector = LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "k8s-app".to_string(),
                operator: "Matches".to_string(),
                values: Some(vec!["kube-proxy".to_string()]),
            }]),
            ..Default::default()
        };

        let result = DaemonSetComponent::new(Arc::new(MockClusterClient::new()), Arc::new(ds), &[]);
        match result {
            Err(Error::VersionUnavailable { component, reason }) => {
                assert_eq!(component, "kube-proxy");
                assert!(reason.contains("selector"));
            }
            Err(other) => panic!("expected VersionUnavailable, got {other:?}"),
            Ok(_) => panic!("expected an invalid selector error"),
        }
    }
}
