use crate::clients::UniquelyConnectedClient;
use std::{collections::BTreeMap, sync::Arc};
use trellis_controller_collections::{Collection, ResourceName};
use trellis_controller_core::{
    ir::{locality_priority, ClusterIr, EndpointsForBackend, Locality},
    proxy::{ClusterResource, EndpointResource, GatewaySnapshot, LocalityEndpoints},
};

/// Clients carrying this label, set to `enabled`, present a client
/// certificate to backends that request mutual TLS.
pub const MTLS_LABEL: &str = "security.trellis.dev/mtls";

/// The secret, in the client's namespace, holding its client certificate.
pub const CLIENT_CERT_SECRET: &str = "trellis-proxy-client-tls";

/// The clusters and endpoints of a client's role, specialized for that
/// client.
#[derive(Clone, Debug, PartialEq)]
pub struct PerClientClusters {
    pub client_key: String,
    pub role: String,
    /// The revision of the role's snapshot these clusters were computed
    /// against.
    pub revision: u64,
    pub clusters: Vec<Arc<ClusterResource>>,
    pub endpoints: Vec<Arc<EndpointResource>>,
}

impl ResourceName for PerClientClusters {
    fn resource_name(&self) -> String {
        self.client_key.clone()
    }
}

/// Derives per-client clusters for every connected client whose role has a
/// snapshot.
pub fn per_client_clusters(
    clients: &Collection<UniquelyConnectedClient>,
    snapshots: &Collection<GatewaySnapshot>,
    clusters: &Collection<ClusterIr>,
    endpoints: &Collection<EndpointsForBackend>,
) -> Collection<PerClientClusters> {
    let snapshots = snapshots.clone();
    let clusters = clusters.clone();
    let endpoints = endpoints.clone();
    clients.derive_one("per-client-clusters", move |ctx, client| {
        let generic = ctx.fetch_one(&snapshots, &client.role)?;

        let mut out_clusters = Vec::with_capacity(generic.cluster_names.len());
        let mut out_endpoints = Vec::with_capacity(generic.cluster_names.len());
        for name in &generic.cluster_names {
            let Some(cluster) = ctx.fetch_one(&clusters, name) else {
                tracing::debug!(
                    client = %client.key(),
                    cluster = %name,
                    "Cluster not yet computed"
                );
                continue;
            };
            out_clusters.push(Arc::new(specialize_cluster(client, &cluster.cluster)));
            if let Some(eps) = ctx.fetch_one(&endpoints, name) {
                out_endpoints.push(Arc::new(prioritize_endpoints(&client.locality, &eps)));
            }
        }

        Some(PerClientClusters {
            client_key: client.key().to_string(),
            role: client.role.clone(),
            revision: generic.cluster_revision(),
            clusters: out_clusters,
            endpoints: out_endpoints,
        })
    })
}

fn mtls_enabled(client: &UniquelyConnectedClient) -> bool {
    client.labels.get(MTLS_LABEL).map(String::as_str) == Some("enabled")
}

pub(crate) fn specialize_cluster(
    client: &UniquelyConnectedClient,
    cluster: &ClusterResource,
) -> ClusterResource {
    let mut cluster = cluster.clone();
    if let Some(tls) = cluster.tls.as_mut() {
        tls.client_certificate = (tls.mutual_requested && mtls_enabled(client))
            .then(|| format!("{}/{CLIENT_CERT_SECRET}", client.namespace));
    }
    cluster
}

/// Groups endpoints by locality, ordered by their priority for a client in
/// `client`.
pub(crate) fn prioritize_endpoints(
    client: &Locality,
    endpoints: &EndpointsForBackend,
) -> EndpointResource {
    let mut by_locality = BTreeMap::<(u32, &Locality), Vec<String>>::new();
    for ep in &endpoints.endpoints {
        let priority = locality_priority(client, &ep.locality);
        by_locality
            .entry((priority, &ep.locality))
            .or_default()
            .push(format!("{}:{}", ep.address, ep.port));
    }
    EndpointResource {
        cluster_name: endpoints.cluster_name.clone(),
        localities: by_locality
            .into_iter()
            .map(|((priority, locality), addresses)| LocalityEndpoints {
                locality: locality.clone(),
                priority,
                addresses,
            })
            .collect(),
    }
}
