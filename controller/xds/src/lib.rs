#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Per-client proxy snapshots.
//!
//! Connected proxies are tracked as a leaf collection of
//! [`UniquelyConnectedClient`]s. Each client's snapshot is composed from the
//! generic snapshot of its gateway role and a set of clusters specialized
//! for that client, and every composed snapshot is pushed to a
//! [`SnapshotCache`] from which proxies are served.

mod cache;
mod clients;
mod compose;
mod metrics;
mod per_client;
mod snapshot;
mod sync;

#[cfg(test)]
mod tests;

pub use self::{
    cache::{InMemoryCache, SnapshotCache},
    clients::{ClientHandle, ConnectedClients, UniquelyConnectedClient},
    compose::compose,
    metrics::SnapshotMetrics,
    per_client::{per_client_clusters, PerClientClusters, CLIENT_CERT_SECRET, MTLS_LABEL},
    snapshot::{content_hash, Resource, ResourceType, Snapshot, VersionedResources, XdsSnapWrapper},
    sync::sync_to_cache,
};

use std::sync::Arc;
use trellis_controller_collections::{Collection, Registration};
use trellis_controller_core::{
    ir::{ClusterIr, EndpointsForBackend},
    proxy::GatewaySnapshot,
};

/// The client-facing half of the pipeline.
#[derive(Clone, Debug)]
pub struct Xds {
    pub clients: ConnectedClients,
    pub per_client: Collection<PerClientClusters>,
    pub snapshots: Collection<XdsSnapWrapper>,
}

impl Xds {
    pub fn new(
        generic: &Collection<GatewaySnapshot>,
        clusters: &Collection<ClusterIr>,
        endpoints: &Collection<EndpointsForBackend>,
    ) -> Self {
        let clients = ConnectedClients::default();
        let per_client = per_client_clusters(clients.collection(), generic, clusters, endpoints);
        let snapshots = compose(clients.collection(), generic, &per_client);
        Self {
            clients,
            per_client,
            snapshots,
        }
    }

    /// Starts pushing composed snapshots into `cache`.
    pub fn sync(&self, cache: Arc<dyn SnapshotCache>, metrics: SnapshotMetrics) -> Registration {
        sync_to_cache(&self.snapshots, cache, metrics)
    }

    /// Syncs into a new in-memory cache and returns the handles a transport
    /// needs to serve proxies.
    pub fn serve(&self, metrics: SnapshotMetrics) -> XdsServer {
        let cache = Arc::new(InMemoryCache::default());
        let _registration = self.sync(cache.clone(), metrics);
        XdsServer {
            xds: self.clone(),
            cache,
        }
    }
}

/// What a transport needs to serve proxies: connections are registered via
/// `xds.clients`, and each connected client follows its snapshot by
/// subscribing to `cache` under the client's key.
#[derive(Clone, Debug)]
pub struct XdsServer {
    pub xds: Xds,
    pub cache: Arc<InMemoryCache>,
}
