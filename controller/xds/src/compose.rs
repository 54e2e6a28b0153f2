use crate::{
    clients::UniquelyConnectedClient,
    per_client::PerClientClusters,
    snapshot::{Resource, Snapshot, XdsSnapWrapper},
};
use std::sync::Arc;
use trellis_controller_collections::Collection;
use trellis_controller_core::proxy::GatewaySnapshot;

/// Composes one snapshot per connected client from its role's generic
/// snapshot and its per-client clusters.
///
/// The two inputs are computed independently, so either may lag the other.
/// A client gets no snapshot until both are present and the per-client
/// clusters were computed against the current revision of the generic
/// snapshot; the client is recomputed when the lagging input catches up.
pub fn compose(
    clients: &Collection<UniquelyConnectedClient>,
    generic: &Collection<GatewaySnapshot>,
    per_client: &Collection<PerClientClusters>,
) -> Collection<XdsSnapWrapper> {
    let generic = generic.clone();
    let per_client = per_client.clone();
    clients.derive_one("xds-snapshots", move |ctx, client| {
        let snapshot = ctx.fetch_one(&generic, &client.role)?;
        let Some(overrides) = ctx.fetch_one(&per_client, client.key()) else {
            tracing::debug!(client = %client.key(), "Per-client clusters not yet computed");
            return None;
        };
        if overrides.revision != snapshot.cluster_revision() {
            tracing::debug!(
                client = %client.key(),
                "Per-client clusters computed against a stale snapshot"
            );
            return None;
        }
        Some(wrap(client, &snapshot, &overrides))
    })
}

fn wrap(
    client: &UniquelyConnectedClient,
    generic: &GatewaySnapshot,
    overrides: &PerClientClusters,
) -> XdsSnapWrapper {
    let resources = generic
        .listeners
        .iter()
        .cloned()
        .map(Resource::Listener)
        .chain(generic.route_configs.iter().cloned().map(Resource::RouteConfig))
        .chain(overrides.clusters.iter().cloned().map(Resource::Cluster))
        .chain(overrides.endpoints.iter().cloned().map(Resource::Endpoint));
    XdsSnapWrapper {
        proxy_key: client.key().to_string(),
        role: client.role.clone(),
        snapshot: Arc::new(Snapshot::new(resources)),
        errors: generic.errors.clone(),
    }
}
