#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Writes resource status.
//!
//! Desired statuses are derived from the index pipeline as collections of
//! their own. A [`StatusSyncer`] per resource kind writes them to the API
//! server while this replica holds the write lease, comparing structurally
//! against the live status so that unchanged statuses are never rewritten.

mod backend;
mod client;
mod desired;
mod gateway;
mod http_route;
mod inference_pool;
mod metrics;
mod policy;
mod reconcile;
mod retry;
mod syncer;


pub use self::{
    backend::{backend_status, backend_statuses},
    client::{KubeStatusClient, StatusClient, WriteError},
    desired::DesiredStatus,
    gateway::{gateway_status, gateway_statuses},
    http_route::{parent_status, route_statuses},
    inference_pool::{pool_status, PoolStatusIndex, PoolStatuses},
    metrics::ControllerMetrics,
    policy::{ancestor_status, policy_statuses},
    reconcile::{conditions_eq, pool_parents_eq, ReconcilableStatus},
    retry::RetryPolicy,
    syncer::{StatusSyncer, WriteState},
};
use kubert::lease::Claim;
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{info_span, Instrument};
use trellis_controller_core::ir::PolicyKind;
use trellis_controller_k8s_api::{
    Backend, BackendConfigPolicy, Gateway, HasStatus, HttpRoute, InferencePool, ListenerPolicy,
    TrafficPolicy,
};
use trellis_controller_k8s_index::Pipeline;

/// How often the write lease is re-checked when no claim update arrives. A
/// claim can lapse without the watch changing.
const CLAIM_RECHECK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct Params {
    pub retry: RetryPolicy,
    pub queue_size: usize,
}

/// Builds the API client used to write each kind's status.
pub trait StatusClients {
    fn client<K: HasStatus>(&self) -> Arc<dyn StatusClient<K>>;
}

#[derive(Clone)]
pub struct KubeStatusClients {
    client: kube::Client,
    field_manager: String,
}

/// A status writer for every kind this controller reports on.
#[derive(Clone, Debug)]
pub struct StatusControllers {
    pub gateways: StatusSyncer<Gateway>,
    pub http_routes: StatusSyncer<HttpRoute>,
    pub backends: StatusSyncer<Backend>,
    pub inference_pools: StatusSyncer<InferencePool>,
    pub traffic_policies: StatusSyncer<TrafficPolicy>,
    pub backend_config_policies: StatusSyncer<BackendConfigPolicy>,
    pub listener_policies: StatusSyncer<ListenerPolicy>,
    pub pools: PoolStatuses,
}

// === impl Params ===

impl Default for Params {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            queue_size: 10_000,
        }
    }
}

// === impl KubeStatusClients ===

impl std::fmt::Debug for KubeStatusClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStatusClients")
            .field("field_manager", &self.field_manager)
            .finish_non_exhaustive()
    }
}

impl KubeStatusClients {
    pub fn new(client: kube::Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }
}

impl StatusClients for KubeStatusClients {
    fn client<K: HasStatus>(&self) -> Arc<dyn StatusClient<K>> {
        Arc::new(KubeStatusClient::<K>::new(
            self.client.clone(),
            self.field_manager.clone(),
        ))
    }
}

// === impl StatusControllers ===

impl StatusControllers {
    pub fn new(
        pipeline: &Pipeline,
        clients: &impl StatusClients,
        params: Params,
        metrics: ControllerMetrics,
    ) -> Self {
        let controller_name: Arc<str> = pipeline.config.controller_name.as_str().into();
        let pools = PoolStatuses::new(&pipeline.inputs);

        macro_rules! syncer {
            ($desired:expr) => {
                StatusSyncer::new(
                    controller_name.clone(),
                    $desired,
                    clients.client(),
                    params.retry,
                    metrics.clone(),
                    params.queue_size,
                )
            };
        }

        Self {
            gateways: syncer!(gateway_statuses(&pipeline.gateways)),
            http_routes: syncer!(route_statuses(
                pipeline.config.clone(),
                &pipeline.routes.routes,
                &pipeline.gateways,
            )),
            backends: syncer!(backend_statuses(pipeline)),
            inference_pools: syncer!(pools.statuses.clone()),
            traffic_policies: syncer!(policy_statuses(pipeline, PolicyKind::Traffic)),
            backend_config_policies: syncer!(policy_statuses(pipeline, PolicyKind::BackendConfig)),
            listener_policies: syncer!(policy_statuses(pipeline, PolicyKind::Listener)),
            pools,
        }
    }

    pub fn attach_all(&self) {
        self.gateways.attach();
        self.http_routes.attach();
        self.backends.attach();
        self.inference_pools.attach();
        self.traffic_policies.attach();
        self.backend_config_policies.attach();
        self.listener_policies.attach();
    }

    pub fn detach_all(&self) {
        self.gateways.detach();
        self.http_routes.detach();
        self.backends.detach();
        self.inference_pools.detach();
        self.traffic_policies.detach();
        self.backend_config_policies.detach();
        self.listener_policies.detach();
    }

    pub fn is_attached(&self) -> bool {
        self.gateways.is_attached()
    }

    /// Spawns a write worker per kind.
    pub fn spawn(&self, resync: Duration) {
        fn spawn<K>(syncer: &StatusSyncer<K>, resync: Duration)
        where
            K: HasStatus,
            K::Status: ReconcilableStatus,
        {
            let span = info_span!("status", kind = syncer.kind());
            tokio::spawn(syncer.clone().run(resync).instrument(span));
        }

        spawn(&self.gateways, resync);
        spawn(&self.http_routes, resync);
        spawn(&self.backends, resync);
        spawn(&self.inference_pools, resync);
        spawn(&self.traffic_policies, resync);
        spawn(&self.backend_config_policies, resync);
        spawn(&self.listener_policies, resync);
    }

    /// Attaches the writers while `hostname` holds the write lease and
    /// detaches them otherwise. Returns when the claim watch closes.
    pub async fn follow_claims(self, mut claims: watch::Receiver<Arc<Claim>>, hostname: String) {
        loop {
            let current = claims.borrow_and_update().is_current_for(&hostname);
            if current && !self.is_attached() {
                tracing::info!(%hostname, "Claimed write lease");
                self.attach_all();
            } else if !current && self.is_attached() {
                tracing::info!(%hostname, "Lost write lease");
                self.detach_all();
            }

            match tokio::time::timeout(CLAIM_RECHECK_INTERVAL, claims.changed()).await {
                Ok(Ok(())) | Err(_) => {}
                Ok(Err(_)) => {
                    tracing::debug!("Claim watch closed");
                    self.detach_all();
                    return;
                }
            }
        }
    }
}
