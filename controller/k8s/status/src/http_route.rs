use crate::{reconcile::condition, DesiredStatus};
use std::sync::Arc;
use trellis_controller_collections::Collection;
use trellis_controller_core::{
    conditions::{self, errors_message, reasons},
    ir::{GatewayIr, ParentRefIr, RouteIr},
};
use trellis_controller_k8s_api::{
    gateway::httproutes::{HTTPRouteStatusParents, HTTPRouteStatusParentsParentRef},
    HttpRouteStatus,
};
use trellis_controller_k8s_index::Config;

/// Derives each route's status for the parents this controller serves.
/// Parents naming gateways of other classes are left to their controllers.
pub fn route_statuses(
    config: Arc<Config>,
    routes: &Collection<RouteIr>,
    gateways: &Collection<GatewayIr>,
) -> Collection<DesiredStatus<HttpRouteStatus>> {
    let gateways = gateways.clone();
    routes.derive_one("httproute-statuses", move |ctx, route| {
        let parents = route
            .parents
            .iter()
            .filter_map(|parent| {
                let gateway = ctx.fetch_one(&gateways, &parent.gateway.key())?;
                Some(parent_status(&config.controller_name, route, parent, &gateway))
            })
            .collect();
        Some(DesiredStatus::new(&route.source, HttpRouteStatus { parents }))
    })
}

pub fn parent_status(
    controller_name: &str,
    route: &RouteIr,
    parent: &ParentRefIr,
    gateway: &GatewayIr,
) -> HTTPRouteStatusParents {
    let generation = route.generation;

    let mut listeners = gateway
        .listeners
        .iter()
        .filter(|l| parent.section_name.as_ref().map_or(true, |s| *s == l.name))
        .filter(|l| parent.port.map_or(true, |p| p == l.port))
        .peekable();
    let accepted = if listeners.peek().is_none() {
        condition(
            conditions::ACCEPTED,
            false,
            reasons::NO_MATCHING_PARENT,
            "no listener matches the parent reference",
            generation,
        )
    } else if listeners.any(|l| l.routes.iter().any(|r| r.source == route.source)) {
        condition(
            conditions::ACCEPTED,
            true,
            reasons::ACCEPTED,
            "",
            generation,
        )
    } else {
        condition(
            conditions::ACCEPTED,
            false,
            reasons::NOT_ALLOWED_BY_LISTENERS,
            "no listener accepts this route",
            generation,
        )
    };

    let errors = route.backend_errors().collect::<Vec<_>>();
    let messages = errors.iter().map(|e| e.message.clone()).collect::<Vec<_>>();
    let resolved_refs = match (errors.first(), errors_message("HTTPRoute", &messages)) {
        (Some(first), Some(message)) => condition(
            conditions::RESOLVED_REFS,
            false,
            first.reason,
            message,
            generation,
        ),
        _ => condition(
            conditions::RESOLVED_REFS,
            true,
            reasons::RESOLVED_REFS,
            "",
            generation,
        ),
    };

    HTTPRouteStatusParents {
        parent_ref: HTTPRouteStatusParentsParentRef {
            group: Some(parent.gateway.group.clone()),
            kind: Some(parent.gateway.kind.clone()),
            namespace: Some(parent.gateway.namespace.clone()),
            name: parent.gateway.name.clone(),
            section_name: parent.section_name.clone(),
            port: parent.port.map(i32::from),
        },
        controller_name: controller_name.to_string(),
        conditions: Some(vec![accepted, resolved_refs]),
    }
}
