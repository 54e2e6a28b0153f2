use kube::ResourceExt;
use kubert::index::NamespacedRemoved;
use parking_lot::RwLock;
use std::sync::Arc;
use trellis_controller_collections::{object_key, Collection};
use trellis_controller_k8s_api::{
    self as k8s, Backend, BackendConfigPolicy, Gateway, HttpRoute, InferencePool, ListenerPolicy,
    ReferenceGrant, TrafficPolicy,
};

/// Leaf collections holding the watched Kubernetes objects, keyed by
/// `namespace/name`.
#[derive(Clone, Debug)]
pub struct Inputs {
    pub gateways: Collection<Gateway>,
    pub http_routes: Collection<HttpRoute>,
    pub reference_grants: Collection<ReferenceGrant>,
    pub services: Collection<k8s::Service>,
    pub pods: Collection<k8s::Pod>,
    pub backends: Collection<Backend>,
    pub inference_pools: Collection<InferencePool>,
    pub traffic_policies: Collection<TrafficPolicy>,
    pub backend_config_policies: Collection<BackendConfigPolicy>,
    pub listener_policies: Collection<ListenerPolicy>,
}

/// Feeds a watch into a leaf collection.
///
/// The collection is marked synced once the watch's initial listing has been
/// applied.
#[derive(Debug)]
pub struct Feed<K: Send + Sync + 'static> {
    collection: Collection<K>,
}

pub type SharedFeed<K> = Arc<RwLock<Feed<K>>>;

// === impl Inputs ===

impl Default for Inputs {
    fn default() -> Self {
        Self {
            gateways: Collection::new("gateways"),
            http_routes: Collection::new("httproutes"),
            reference_grants: Collection::new("referencegrants"),
            services: Collection::new("services"),
            pods: Collection::new("pods"),
            backends: Collection::new("backends"),
            inference_pools: Collection::new("inferencepools"),
            traffic_policies: Collection::new("trafficpolicies"),
            backend_config_policies: Collection::new("backendconfigpolicies"),
            listener_policies: Collection::new("listenerpolicies"),
        }
    }
}

impl Inputs {
    fn synced(&self) -> [bool; 10] {
        [
            self.gateways.has_synced(),
            self.http_routes.has_synced(),
            self.reference_grants.has_synced(),
            self.services.has_synced(),
            self.pods.has_synced(),
            self.backends.has_synced(),
            self.inference_pools.has_synced(),
            self.traffic_policies.has_synced(),
            self.backend_config_policies.has_synced(),
            self.listener_policies.has_synced(),
        ]
    }

    /// The number of inputs whose initial listing has not been applied.
    pub fn unsynced(&self) -> usize {
        self.synced().iter().filter(|synced| !**synced).count()
    }

    pub async fn wait_until_synced(&self) {
        self.gateways.wait_until_synced().await;
        self.http_routes.wait_until_synced().await;
        self.reference_grants.wait_until_synced().await;
        self.services.wait_until_synced().await;
        self.pods.wait_until_synced().await;
        self.backends.wait_until_synced().await;
        self.inference_pools.wait_until_synced().await;
        self.traffic_policies.wait_until_synced().await;
        self.backend_config_policies.wait_until_synced().await;
        self.listener_policies.wait_until_synced().await;
    }
}

// === impl Feed ===

impl<K> Feed<K>
where
    K: kube::Resource + PartialEq + Send + Sync + 'static,
{
    pub fn new(collection: &Collection<K>) -> Self {
        Self {
            collection: collection.clone(),
        }
    }

    pub fn shared(collection: &Collection<K>) -> SharedFeed<K> {
        Arc::new(RwLock::new(Self::new(collection)))
    }

    fn key(resource: &K) -> String {
        let namespace = resource.namespace().unwrap_or_default();
        object_key(&namespace, &resource.name_unchecked())
    }
}

impl<K> kubert::index::IndexNamespacedResource<K> for Feed<K>
where
    K: kube::Resource + PartialEq + Send + Sync + 'static,
{
    fn apply(&mut self, resource: K) {
        let key = Self::key(&resource);
        tracing::trace!(collection = %self.collection.name(), %key, "Applying");
        self.collection.insert(key, resource);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let key = object_key(&namespace, &name);
        tracing::trace!(collection = %self.collection.name(), %key, "Deleting");
        self.collection.remove(&key);
    }

    fn reset(&mut self, resources: Vec<K>, _removed: NamespacedRemoved) {
        let items = resources
            .into_iter()
            .map(|resource| (Self::key(&resource), resource))
            .collect::<Vec<_>>();
        tracing::debug!(
            collection = %self.collection.name(),
            items = items.len(),
            "Resetting"
        );
        self.collection.reset(items);
        self.collection.mark_synced();
    }
}
