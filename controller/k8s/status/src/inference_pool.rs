//! InferencePool parent status.
//!
//! A pool is not attached to gateways directly: it lists as parents every
//! gateway with at least one route in the pool's namespace that references
//! it. Route and pool events update a [`PoolStatusIndex`], and each pool a
//! change touches has its status recomputed from the whole index.

use crate::{reconcile::condition, DesiredStatus};
use ahash::AHashMap as HashMap;
use kube::ResourceExt;
use parking_lot::Mutex;
use std::{collections::BTreeSet, sync::Arc};
use trellis_controller_collections::{Collection, Event, EventKind};
use trellis_controller_core::{
    conditions::{self, errors_message, reasons},
    ir::validate_pool,
    ObjectSource, GATEWAY_API_GROUP, INFERENCE_API_GROUP,
};
use trellis_controller_k8s_api::{
    inference::{InferencePoolStatus, PoolParentReference, PoolParentStatus},
    HttpRoute, InferencePool,
};
use trellis_controller_k8s_index::{
    routes::{backend_ref_source, parent_gateways},
    Inputs,
};

/// The parent that reports a pool's own validation errors.
pub const DEFAULT_PARENT_KIND: &str = "Status";
pub const DEFAULT_PARENT_NAME: &str = "default";

/// Desired InferencePool statuses, kept current by handlers on the route and
/// pool inputs.
#[derive(Clone, Debug)]
pub struct PoolStatuses {
    pub statuses: Collection<DesiredStatus<InferencePoolStatus>>,
    index: Arc<Mutex<PoolStatusIndex>>,
}

/// Which routes reference which pools, and each pool's validation errors.
#[derive(Debug, Default)]
pub struct PoolStatusIndex {
    routes: HashMap<ObjectSource, RouteRefs>,
    pools: HashMap<ObjectSource, Vec<String>>,
}

#[derive(Debug, Default)]
struct RouteRefs {
    uid: Option<String>,
    gateways: BTreeSet<ObjectSource>,
    pools: BTreeSet<ObjectSource>,
}

// === impl PoolStatuses ===

impl PoolStatuses {
    pub fn new(inputs: &Inputs) -> Self {
        let statuses = Collection::new("inferencepool-statuses");
        let index = Arc::new(Mutex::new(PoolStatusIndex::default()));

        // Handlers stay registered for the life of the inputs.
        {
            let index = index.clone();
            let statuses = statuses.clone();
            let _registration = inputs
                .inference_pools
                .register_with_initial(move |events: &[Event<InferencePool>]| {
                    let mut index = index.lock();
                    let mut affected = BTreeSet::new();
                    for event in events {
                        match (event.kind(), event.latest()) {
                            (EventKind::Delete, Some(pool)) => {
                                affected.insert(index.delete_pool(pool));
                            }
                            (_, Some(pool)) => {
                                affected.insert(index.apply_pool(pool));
                            }
                            (_, None) => {}
                        }
                    }
                    publish(&index, &statuses, affected);
                });
        }
        {
            let index = index.clone();
            let statuses = statuses.clone();
            let _registration = inputs
                .http_routes
                .register_with_initial(move |events: &[Event<HttpRoute>]| {
                    let mut index = index.lock();
                    let mut affected = BTreeSet::new();
                    for event in events {
                        match (event.kind(), event.latest()) {
                            (EventKind::Delete, Some(route)) => {
                                affected.extend(index.delete_route(route));
                            }
                            (_, Some(route)) => affected.extend(index.apply_route(route)),
                            (_, None) => {}
                        }
                    }
                    publish(&index, &statuses, affected);
                });
        }

        Self { statuses, index }
    }

    /// The status currently computed for a pool.
    pub fn status(&self, pool: &ObjectSource) -> Option<InferencePoolStatus> {
        self.index.lock().status(pool)
    }
}

fn publish(
    index: &PoolStatusIndex,
    statuses: &Collection<DesiredStatus<InferencePoolStatus>>,
    pools: BTreeSet<ObjectSource>,
) {
    for pool in pools {
        match index.status(&pool) {
            Some(status) => {
                tracing::debug!(%pool, parents = status.parent.len(), "Updating status");
                statuses.insert(pool.key(), DesiredStatus::new(&pool, status));
            }
            None => statuses.remove(&pool.key()),
        }
    }
}

// === impl PoolStatusIndex ===

impl PoolStatusIndex {
    /// Records a route's gateways and pools, returning every pool whose
    /// status may have changed.
    pub fn apply_route(&mut self, route: &HttpRoute) -> BTreeSet<ObjectSource> {
        let namespace = route.namespace().unwrap_or_default();
        let source = ObjectSource::http_route(namespace.clone(), route.name_unchecked());
        let refs = route_refs(&namespace, route);

        let mut affected = refs.pools.clone();
        if let Some(previous) = self.routes.insert(source, refs) {
            affected.extend(previous.pools);
        }
        affected
    }

    /// Forgets a deleted route. A route with the same name but a different
    /// UID has replaced it and is kept.
    pub fn delete_route(&mut self, route: &HttpRoute) -> BTreeSet<ObjectSource> {
        let source = ObjectSource::http_route(
            route.namespace().unwrap_or_default(),
            route.name_unchecked(),
        );
        let uid = route.metadata.uid.as_deref();
        match self.routes.get(&source) {
            Some(refs) if refs.uid.as_deref() == uid => {}
            _ => return BTreeSet::new(),
        }
        self.routes
            .remove(&source)
            .map(|refs| refs.pools)
            .unwrap_or_default()
    }

    pub fn apply_pool(&mut self, pool: &InferencePool) -> ObjectSource {
        let source = pool_source(pool);
        let spec = &pool.spec;
        let errors = validate_pool(
            &spec.selector,
            spec.target_port_number,
            spec.extension_ref.as_ref().map(|ext| ext.name.as_str()),
        );
        self.pools.insert(source.clone(), errors);
        source
    }

    pub fn delete_pool(&mut self, pool: &InferencePool) -> ObjectSource {
        let source = pool_source(pool);
        self.pools.remove(&source);
        source
    }

    /// Computes a pool's status from the routes in its namespace, or `None`
    /// if the pool does not exist.
    pub fn status(&self, pool: &ObjectSource) -> Option<InferencePoolStatus> {
        let errors = self.pools.get(pool)?;
        let gateways = self
            .routes
            .iter()
            .filter(|(route, refs)| {
                route.namespace == pool.namespace && refs.pools.contains(pool)
            })
            .flat_map(|(_, refs)| refs.gateways.iter().cloned())
            .collect::<BTreeSet<_>>();
        Some(pool_status(&gateways, errors))
    }
}

fn pool_source(pool: &InferencePool) -> ObjectSource {
    ObjectSource::inference_pool(pool.namespace().unwrap_or_default(), pool.name_unchecked())
}

fn route_refs(namespace: &str, route: &HttpRoute) -> RouteRefs {
    let spec = &route.spec;
    let gateways = parent_gateways(namespace, spec.parent_refs.as_deref().unwrap_or_default())
        .into_iter()
        .map(|parent| parent.gateway)
        .collect();
    let pools = spec
        .rules
        .iter()
        .flatten()
        .flat_map(|rule| rule.backend_refs.iter().flatten())
        .map(|backend| backend_ref_source(namespace, backend))
        .filter(|source| source.is_kind(INFERENCE_API_GROUP, "InferencePool"))
        .collect();
    RouteRefs {
        uid: route.metadata.uid.clone(),
        gateways,
        pools,
    }
}

/// Builds a pool's parents: one per referencing gateway, plus the default
/// parent while the pool has validation errors.
pub fn pool_status(gateways: &BTreeSet<ObjectSource>, errors: &[String]) -> InferencePoolStatus {
    let message = errors_message("InferencePool", errors);
    let resolved_refs = match &message {
        None => condition(
            conditions::RESOLVED_REFS,
            true,
            reasons::RESOLVED_REFS,
            "",
            None,
        ),
        Some(message) => condition(
            conditions::RESOLVED_REFS,
            false,
            reasons::INVALID,
            message.clone(),
            None,
        ),
    };

    let mut parent = gateways
        .iter()
        .map(|gateway| PoolParentStatus {
            parent_ref: PoolParentReference {
                group: Some(GATEWAY_API_GROUP.to_string()),
                kind: "Gateway".to_string(),
                namespace: Some(gateway.namespace.clone()),
                name: gateway.name.clone(),
            },
            conditions: vec![
                condition(
                    conditions::ACCEPTED,
                    true,
                    reasons::ACCEPTED,
                    "",
                    None,
                ),
                resolved_refs.clone(),
            ],
        })
        .collect::<Vec<_>>();

    if message.is_some() {
        parent.push(PoolParentStatus {
            parent_ref: PoolParentReference {
                group: Some(INFERENCE_API_GROUP.to_string()),
                kind: DEFAULT_PARENT_KIND.to_string(),
                namespace: None,
                name: DEFAULT_PARENT_NAME.to_string(),
            },
            conditions: vec![resolved_refs],
        });
    }

    InferencePoolStatus { parent }
}
