#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Builds the controller's dataflow from watched Kubernetes resources to
//! per-gateway proxy snapshots.
//!
//! Watches write into the leaf collections held by [`Inputs`]. Everything
//! else is derived: policies are translated and indexed by target, backends
//! and their endpoints and clusters are computed with merged backend
//! policy, routes resolve their backends, and gateways attach routes to
//! listeners. The translator turns each gateway's IR into a
//! [`GatewaySnapshot`]. A change to any input recomputes only the items that
//! read it.

pub mod backends;
pub mod clusters;
pub mod endpoints;
pub mod gateways;
pub mod inputs;
pub mod metrics;
pub mod policies;
pub mod reference_grants;
pub mod routes;
pub mod translator;


pub use self::{
    backends::Backends,
    inputs::{Feed, Inputs, SharedFeed},
    policies::Policies,
    reference_grants::ReferenceGrants,
    routes::Routes,
};
use chrono::{offset::Utc, DateTime};
use kube::api::ObjectMeta;
use std::sync::Arc;
use trellis_controller_collections::Collection;
use trellis_controller_core::{
    ir::{ClusterIr, EndpointsForBackend, GatewayIr},
    proxy::GatewaySnapshot,
    DEFAULT_CONTROLLER_NAME,
};

#[derive(Clone, Debug)]
pub struct Config {
    /// Written to route status and used as the first segment of every
    /// gateway role.
    pub controller_name: String,
    /// Gateways of other classes are ignored.
    pub gateway_classes: Vec<String>,
}

/// Every collection in the dataflow.
#[derive(Clone, Debug)]
pub struct Pipeline {
    pub config: Arc<Config>,
    pub inputs: Inputs,
    pub reference_grants: ReferenceGrants,
    pub policies: Policies,
    pub backends: Backends,
    pub endpoints: Collection<EndpointsForBackend>,
    pub clusters: Collection<ClusterIr>,
    pub routes: Routes,
    pub gateways: Collection<GatewayIr>,
    pub snapshots: Collection<GatewaySnapshot>,
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            controller_name: DEFAULT_CONTROLLER_NAME.to_string(),
            gateway_classes: vec!["trellis".to_string()],
        }
    }
}

// === impl Pipeline ===

impl Pipeline {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let inputs = Inputs::default();

        let reference_grants = ReferenceGrants::new(&inputs.reference_grants);
        let policies = Policies::new(&inputs);
        let backends = Backends::new(&inputs, &policies);
        let endpoints = endpoints::endpoints(&inputs, &backends);
        let clusters = clusters::clusters(&backends);
        let routes = Routes::new(&inputs, &policies, &backends, &reference_grants);
        let gateways = gateways::gateways(config.clone(), &inputs.gateways, &policies, &routes);
        let snapshots = translator::snapshots(&gateways);

        Self {
            config,
            inputs,
            reference_grants,
            policies,
            backends,
            endpoints,
            clusters,
            routes,
            gateways,
            snapshots,
        }
    }

    /// The name and size of every derived collection.
    pub fn collection_sizes(&self) -> Vec<(&str, usize)> {
        vec![
            (self.policies.all.name(), self.policies.all.len()),
            (self.backends.objects.name(), self.backends.objects.len()),
            (self.endpoints.name(), self.endpoints.len()),
            (self.clusters.name(), self.clusters.len()),
            (self.routes.routes.name(), self.routes.routes.len()),
            (self.gateways.name(), self.gateways.len()),
            (self.snapshots.name(), self.snapshots.len()),
        ]
    }
}

pub(crate) fn creation_timestamp(meta: &ObjectMeta) -> Option<DateTime<Utc>> {
    let ts = meta.creation_timestamp.as_ref()?.0;
    DateTime::from_timestamp(
        ts.timestamp(),
        u32::try_from(ts.timestamp_subsec_nanos()).unwrap_or_default(),
    )
}
