//! Read-through caches of cluster state
//!
//! Each cache is a kube-rs reflector store fed by its own watch task. The
//! tasks are spawned once, when the cache is created, and run for the life of
//! the process; nothing in the update path ever writes to a store. A cache
//! refuses to be listed until its store reports ready, that is until the
//! watch has delivered the initial listing, so a freshly started controller
//! cannot mistake an empty store for an empty cluster.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::runtime::reflector::{self, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{Error, Result, MANAGED_LABEL_SELECTOR};

/// A reflector store that refuses to be read before its initial listing
pub struct SyncedStore<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    kind: &'static str,
    store: Store<K>,
}

impl<K> SyncedStore<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    pub(crate) fn new(kind: &'static str, store: Store<K>) -> Self {
        Self { kind, store }
    }

    /// Human-readable name of the cached kind
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Whether the store's writer has delivered the initial listing
    pub fn is_synced(&self) -> bool {
        matches!(self.store.wait_until_ready().now_or_never(), Some(Ok(())))
    }

    /// Snapshot of every cached object
    ///
    /// Fails with [`Error::CacheNotSynced`] if the cache has not completed its
    /// initial sync.
    pub fn list(&self) -> Result<Vec<Arc<K>>> {
        if !self.is_synced() {
            return Err(Error::cache_not_synced(self.kind));
        }
        Ok(self.store.state())
    }
}

/// The four caches read by the catalog builder
pub struct ClusterCache {
    nodes: SyncedStore<Node>,
    daemonsets: SyncedStore<DaemonSet>,
    deployments: SyncedStore<Deployment>,
    pods: SyncedStore<Pod>,
    /// Watch tasks; held for the life of the cache and never aborted
    _tasks: Vec<JoinHandle<()>>,
}

impl ClusterCache {
    /// Start watching the cluster and return the caches being filled.
    ///
    /// Nodes are watched cluster-wide, workloads and pods in `namespace`.
    /// Nodes and workloads are filtered by the managed label; pods are not,
    /// since they are matched against workload selectors instead.
    pub fn spawn(client: Client, namespace: &str) -> Self {
        let managed = watcher::Config::default().labels(MANAGED_LABEL_SELECTOR);

        let (nodes, nodes_task) =
            spawn_reflector("nodes", Api::<Node>::all(client.clone()), managed.clone());
        let (daemonsets, daemonsets_task) = spawn_reflector(
            "daemonsets",
            Api::<DaemonSet>::namespaced(client.clone(), namespace),
            managed.clone(),
        );
        let (deployments, deployments_task) = spawn_reflector(
            "deployments",
            Api::<Deployment>::namespaced(client.clone(), namespace),
            managed,
        );
        let (pods, pods_task) = spawn_reflector(
            "pods",
            Api::<Pod>::namespaced(client, namespace),
            watcher::Config::default(),
        );

        info!(namespace = %namespace, "Started cluster cache watches");

        Self {
            nodes,
            daemonsets,
            deployments,
            pods,
            _tasks: vec![nodes_task, daemonsets_task, deployments_task, pods_task],
        }
    }

    /// Build caches over existing stores.
    ///
    /// Each store counts as synced once its writer has applied an
    /// `InitDone` event.
    pub fn from_stores(
        nodes: Store<Node>,
        daemonsets: Store<DaemonSet>,
        deployments: Store<Deployment>,
        pods: Store<Pod>,
    ) -> Self {
        Self {
            nodes: SyncedStore::new("nodes", nodes),
            daemonsets: SyncedStore::new("daemonsets", daemonsets),
            deployments: SyncedStore::new("deployments", deployments),
            pods: SyncedStore::new("pods", pods),
            _tasks: Vec::new(),
        }
    }

    /// Build synced caches holding exactly the given objects
    pub fn from_objects(
        nodes: Vec<Node>,
        daemonsets: Vec<DaemonSet>,
        deployments: Vec<Deployment>,
        pods: Vec<Pod>,
    ) -> Self {
        Self::from_stores(
            store_of(nodes),
            store_of(daemonsets),
            store_of(deployments),
            store_of(pods),
        )
    }

    /// Node cache
    pub fn nodes(&self) -> &SyncedStore<Node> {
        &self.nodes
    }

    /// DaemonSet cache
    pub fn daemonsets(&self) -> &SyncedStore<DaemonSet> {
        &self.daemonsets
    }

    /// Deployment cache
    pub fn deployments(&self) -> &SyncedStore<Deployment> {
        &self.deployments
    }

    /// Pod cache
    pub fn pods(&self) -> &SyncedStore<Pod> {
        &self.pods
    }

    /// Whether every cache has completed its initial sync
    pub fn is_synced(&self) -> bool {
        self.nodes.is_synced()
            && self.daemonsets.is_synced()
            && self.deployments.is_synced()
            && self.pods.is_synced()
    }

    /// Wait until every cache has synced, giving up after `timeout`.
    ///
    /// Returns whether the caches synced in time. A cache whose watch task
    /// is gone never syncs.
    pub async fn wait_for_sync(&self, timeout: Duration) -> bool {
        let ready = async {
            tokio::try_join!(
                self.nodes.store.wait_until_ready(),
                self.daemonsets.store.wait_until_ready(),
                self.deployments.store.wait_until_ready(),
                self.pods.store.wait_until_ready(),
            )
        };
        matches!(tokio::time::timeout(timeout, ready).await, Ok(Ok(_)))
    }

    #[cfg(test)]
    pub(crate) fn with_unsynced_pods(mut self) -> Self {
        self.pods = SyncedStore::new("pods", reflector::store().0);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_unsynced_nodes(mut self) -> Self {
        self.nodes = SyncedStore::new("nodes", reflector::store().0);
        self
    }
}

/// Spawn a reflector task feeding a new store.
///
/// Watch errors are logged and the watch restarts with kube-rs' default
/// backoff; the task only ends if the stream itself ends.
fn spawn_reflector<K>(
    kind: &'static str,
    api: Api<K>,
    config: watcher::Config,
) -> (SyncedStore<K>, JoinHandle<()>)
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let (store, writer) = reflector::store();
    let cache = SyncedStore::new(kind, store);

    let stream = reflector::reflector(writer, watcher::watcher(api, config)).default_backoff();
    let handle = tokio::spawn(async move {
        let mut stream = std::pin::pin!(stream);
        let mut synced = false;
        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::InitDone) => {
                    if synced {
                        debug!(kind = kind, "Cache relisted");
                    } else {
                        synced = true;
                        info!(kind = kind, "Cache synced");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(kind = kind, error = %e, "Watch error, will retry");
                }
            }
        }
        warn!(kind = kind, "Watch stream ended; cache is no longer updated");
    });

    (cache, handle)
}

/// Build a synced store holding exactly `objects`
fn store_of<K>(objects: Vec<K>) -> Store<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    let mut writer = reflector::store::Writer::default();
    writer.apply_watcher_event(&watcher::Event::Init);
    for object in objects {
        writer.apply_watcher_event(&watcher::Event::InitApply(object));
    }
    writer.apply_watcher_event(&watcher::Event::InitDone);
    writer.as_reader()
}
