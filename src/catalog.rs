//! Component catalog construction
//!
//! The catalog is the per-call snapshot of every managed component. It is
//! built from the caches in a fixed discovery order (DaemonSets, Deployments,
//! Nodes) and is either complete or not returned at all.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::ResourceExt;
use tracing::debug;

use crate::cache::{ClusterCache, SyncedStore};
use crate::client::ClusterClient;
use crate::component::{DaemonSetComponent, DeploymentComponent, ManagedComponent, NodeComponent};
use crate::{Error, Result, MANAGED_LABEL_KEY, MANAGED_LABEL_VALUE};

/// Whether an object carries the managed label
pub fn is_managed(labels: &BTreeMap<String, String>) -> bool {
    labels.get(MANAGED_LABEL_KEY).map(String::as_str) == Some(MANAGED_LABEL_VALUE)
}

/// List every managed object in a cache by name, recording the failure otherwise
fn list_managed<K>(cache: &SyncedStore<K>, failures: &mut Vec<String>) -> Vec<Arc<K>>
where
    K: kube::Resource<DynamicType = ()> + Clone + 'static,
{
    match cache.list() {
        Ok(objects) => {
            let mut managed: Vec<Arc<K>> = objects
                .into_iter()
                .filter(|o| is_managed(o.labels()))
                .collect();
            // Store iteration order is arbitrary; name order keeps ties stable.
            managed.sort_by_key(|o| o.name_any());
            managed
        }
        Err(e) => {
            failures.push(e.to_string());
            Vec::new()
        }
    }
}

/// Build one component per managed object.
///
/// Every cache is listed and every component constructed before anything is
/// returned; if any step fails the error names all of the failures.
pub fn build_catalog(
    cache: &ClusterCache,
    client: Arc<dyn ClusterClient>,
) -> Result<Vec<ManagedComponent>> {
    let mut failures = Vec::new();

    let daemonsets = list_managed(cache.daemonsets(), &mut failures);
    let deployments = list_managed(cache.deployments(), &mut failures);
    let nodes = list_managed(cache.nodes(), &mut failures);
    // Pods are looked up by selector, not by label, so they are not filtered.
    let pods = cache.pods().list().unwrap_or_else(|e| {
        failures.push(e.to_string());
        Vec::new()
    });

    let mut components = Vec::with_capacity(daemonsets.len() + deployments.len() + nodes.len());
    for ds in daemonsets {
        match DaemonSetComponent::new(client.clone(), ds, &pods) {
            Ok(component) => components.push(ManagedComponent::DaemonSet(component)),
            Err(e) => failures.push(e.to_string()),
        }
    }
    components.extend(
        deployments
            .into_iter()
            .map(|d| ManagedComponent::Deployment(DeploymentComponent::new(client.clone(), d))),
    );
    components.extend(
        nodes
            .into_iter()
            .map(|n| ManagedComponent::Node(NodeComponent::new(client.clone(), n))),
    );

    if !failures.is_empty() {
        return Err(Error::catalog_build(failures.join("; ")));
    }

    debug!(components = components.len(), "Built component catalog");
    Ok(components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterClient;
    use crate::component::{fixtures, Component, ComponentKind};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

    fn client() -> Arc<dyn ClusterClient> {
        Arc::new(MockClusterClient::new())
    }

    #[test]
    fn discovery_order_is_daemonsets_deployments_nodes() {
        let cache = ClusterCache::from_objects(
            vec![fixtures::node("worker-1", Some("v1.4.3"), "v1.4.3", true)],
            vec![fixtures::daemonset("kube-apiserver", "v1.4.3", 1)],
            vec![fixtures::deployment("kube-scheduler", "v1.4.3", 1, 1, 1)],
            vec![],
        );

        let catalog = build_catalog(&cache, client()).unwrap();
        let kinds: Vec<ComponentKind> = catalog.iter().map(|c| c.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ComponentKind::DaemonSet,
                ComponentKind::Deployment,
                ComponentKind::Node
            ]
        );
    }

    #[test]
    fn unmanaged_objects_are_skipped() {
        let mut unmanaged = fixtures::daemonset("kube-flannel", "v0.7.0", 1);
        unmanaged.metadata.labels = None;
        let mut opted_out = fixtures::node("worker-2", Some("v1.4.3"), "v1.4.3", true);
        opted_out
            .metadata
            .labels
            .as_mut()
            .unwrap()
            .insert(MANAGED_LABEL_KEY.to_string(), "false".to_string());

        let cache = ClusterCache::from_objects(
            vec![
                fixtures::node("worker-1", Some("v1.4.3"), "v1.4.3", true),
                opted_out,
            ],
            vec![unmanaged, fixtures::daemonset("kube-proxy", "v1.4.3", 1)],
            vec![],
            vec![],
        );

        let names: Vec<String> = build_catalog(&cache, client())
            .unwrap()
            .iter()
            .map(|c| c.name())
            .collect();
        assert_eq!(names, vec!["kube-proxy", "worker-1"]);
    }

    #[test]
    fn empty_cluster_builds_empty_catalog() {
        let cache = ClusterCache::from_objects(vec![], vec![], vec![], vec![]);
        assert!(build_catalog(&cache, client()).unwrap().is_empty());
    }

    #[test]
    fn unsynced_caches_fail_the_whole_build() {
        let cache = ClusterCache::from_objects(
            vec![fixtures::node("worker-1", Some("v1.4.3"), "v1.4.3", true)],
            vec![fixtures::daemonset("kube-apiserver", "v1.4.3", 1)],
            vec![],
            vec![],
        )
        .with_unsynced_nodes()
        .with_unsynced_pods();

        let err = build_catalog(&cache, client()).err().expect("expected build_catalog to fail");
        match err {
            Error::CatalogBuild { message } => {
                assert!(message.contains("nodes"));
                assert!(message.contains("pods"));
            }
            other => panic!("Expected CatalogBuild, got {other:?}"),
        }
    }

    #[test]
    fn invalid_daemonset_selector_fails_the_build() {
        let mut broken = fixtures::daemonset("kube-proxy", "v1.4.3", 1);
        broken.spec.as_mut().unwrap().selector = LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "k8s-app".to_string(),
                operator: "Matches".to_string(),
                values: Some(vec!["kube-proxy".to_string()]),
            }]),
            ..Default::default()
        };
        let cache = ClusterCache::from_objects(
            vec![],
            vec![fixtures::daemonset("kube-apiserver", "v1.4.3", 1), broken],
            vec![],
            vec![],
        );

        match build_catalog(&cache, client()).err().expect("expected build_catalog to fail") {
            Error::CatalogBuild { message } => {
                assert!(message.contains("kube-proxy"));
                assert!(!message.contains("kube-apiserver"));
            }
            other => panic!("Expected CatalogBuild, got {other:?}"),
        }
    }

    #[test]
    fn managed_label_predicate() {
        let mut labels = fixtures::managed_labels();
        assert!(is_managed(&labels));
        labels.insert(MANAGED_LABEL_KEY.to_string(), "no".to_string());
        assert!(!is_managed(&labels));
        assert!(!is_managed(&BTreeMap::new()));
    }
}
