use crate::{
    policies::{for_section, Policies},
    routes::Routes,
    Config,
};
use kube::{Resource, ResourceExt};
use std::{collections::BTreeSet, sync::Arc};
use trellis_controller_collections::{Collection, HandlerContext};
use trellis_controller_core::{
    ir::{GatewayIr, ListenerIr, ListenerProtocol, PolicyAtt, PolicyIr, RouteIr},
    merge::{self, MergeStrategy},
    proxy, ObjectSource, GATEWAY_API_GROUP,
};
use trellis_controller_k8s_api::{
    gateway::gateways::{GatewayListeners, GatewayListenersAllowedRoutesNamespacesFrom},
    Gateway,
};

/// Derives the IR of every gateway whose class this controller serves.
pub fn gateways(
    config: Arc<Config>,
    gateways: &Collection<Gateway>,
    policies: &Policies,
    routes: &Routes,
) -> Collection<GatewayIr> {
    let policies = policies.clone();
    let routes = routes.clone();
    gateways.derive_one("gateways-ir", move |ctx, gateway| {
        if !config
            .gateway_classes
            .iter()
            .any(|c| *c == gateway.spec.gateway_class_name)
        {
            return None;
        }
        Some(gateway_ir(ctx, &config, &policies, &routes, gateway))
    })
}

fn gateway_ir(
    ctx: &mut HandlerContext<'_>,
    config: &Config,
    policies: &Policies,
    routes: &Routes,
    gateway: &Gateway,
) -> GatewayIr {
    let namespace = gateway.namespace().unwrap_or_default();
    let name = gateway.name_unchecked();
    let source = ObjectSource::gateway(namespace.clone(), name.clone());
    let strategy = MergeStrategy::from_annotations(&source, gateway.annotations());

    let atts = policies.attachments(ctx, &source);

    // Older routes take precedence when routes conflict.
    let mut candidates = ctx.fetch_indexed(&routes.by_parent, &source.key());
    candidates.sort_by(|a, b| {
        a.creation_timestamp
            .cmp(&b.creation_timestamp)
            .then_with(|| a.source.cmp(&b.source))
    });

    let mut errors = Vec::new();
    let mut names = BTreeSet::new();
    let mut listeners = Vec::with_capacity(gateway.spec.listeners.len());
    for listener in &gateway.spec.listeners {
        if !names.insert(listener.name.as_str()) {
            errors.push(format!("listener {} is defined more than once", listener.name));
            continue;
        }
        listeners.push(listener_ir(&source, strategy, &atts, &candidates, listener));
    }

    GatewayIr {
        role: proxy::role(&config.controller_name, &namespace, &name),
        generation: gateway.meta().generation,
        class_name: gateway.spec.gateway_class_name.clone(),
        source,
        listeners,
        errors,
    }
}

fn listener_ir(
    gateway: &ObjectSource,
    strategy: MergeStrategy,
    atts: &[PolicyAtt],
    candidates: &[Arc<RouteIr>],
    listener: &GatewayListeners,
) -> ListenerIr {
    let mut errors = Vec::new();
    let port = match u16::try_from(listener.port) {
        Ok(port) if port != 0 => port,
        _ => {
            errors.push(format!(
                "port {} is outside the range 1-65535",
                listener.port
            ));
            0
        }
    };
    let protocol = ListenerProtocol::parse(&listener.protocol);
    if protocol == ListenerProtocol::Unsupported {
        errors.push(format!("unsupported protocol {}", listener.protocol));
    }
    let namespaces = match allowed_namespaces(listener) {
        Ok(namespaces) => namespaces,
        Err(error) => {
            errors.push(error);
            AllowedNamespaces::Same
        }
    };
    if !allows_http_routes(listener) {
        errors.push("allowedRoutes does not include HTTPRoute".to_string());
    }

    let atts = for_section(atts, Some(&listener.name));
    let (policy, policy_origins) =
        merge::merge_attachments(&atts, strategy, PolicyIr::as_listener);
    let (traffic_policy, traffic_origins) =
        merge::merge_attachments(&atts, strategy, PolicyIr::as_traffic);

    let routes = if errors.is_empty() {
        candidates
            .iter()
            .filter(|route| attaches(gateway, listener, namespaces, port, route))
            .cloned()
            .collect()
    } else {
        Vec::new()
    };

    ListenerIr {
        name: listener.name.clone(),
        port,
        protocol,
        hostname: listener.hostname.clone(),
        policy,
        policy_origins,
        traffic_policy,
        traffic_origins,
        routes,
        errors,
    }
}

/// The namespaces a listener accepts routes from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum AllowedNamespaces {
    Same,
    All,
}

fn allowed_namespaces(listener: &GatewayListeners) -> Result<AllowedNamespaces, String> {
    let from = listener
        .allowed_routes
        .as_ref()
        .and_then(|allowed| allowed.namespaces.as_ref())
        .and_then(|namespaces| namespaces.from.as_ref());
    match from {
        None | Some(GatewayListenersAllowedRoutesNamespacesFrom::Same) => {
            Ok(AllowedNamespaces::Same)
        }
        Some(GatewayListenersAllowedRoutesNamespacesFrom::All) => Ok(AllowedNamespaces::All),
        Some(GatewayListenersAllowedRoutesNamespacesFrom::Selector) => {
            Err("allowedRoutes namespace selectors are not supported".to_string())
        }
    }
}

/// Listeners without explicit route kinds accept HTTPRoutes.
fn allows_http_routes(listener: &GatewayListeners) -> bool {
    let Some(kinds) = listener
        .allowed_routes
        .as_ref()
        .and_then(|allowed| allowed.kinds.as_ref())
    else {
        return true;
    };
    kinds.is_empty()
        || kinds.iter().any(|k| {
            let group = k.group.as_deref().unwrap_or(GATEWAY_API_GROUP);
            k.kind == "HTTPRoute" && group == GATEWAY_API_GROUP
        })
}

/// Routes attach to listeners that accept the route's namespace, whose
/// section and port match the parent reference and whose hostname
/// intersects the route's.
fn attaches(
    gateway: &ObjectSource,
    listener: &GatewayListeners,
    namespaces: AllowedNamespaces,
    port: u16,
    route: &RouteIr,
) -> bool {
    if namespaces == AllowedNamespaces::Same && route.source.namespace != gateway.namespace {
        return false;
    }
    let parent_matches = route.parents_for(gateway).any(|parent| {
        parent
            .section_name
            .as_deref()
            .map_or(true, |s| s == listener.name)
            && parent.port.map_or(true, |p| p == port)
    });
    parent_matches && hostnames_intersect(listener.hostname.as_deref(), &route.hostnames)
}

pub(crate) fn hostnames_intersect(listener: Option<&str>, route: &[String]) -> bool {
    let Some(listener) = listener else {
        return true;
    };
    route.is_empty() || route.iter().any(|h| hostname_matches(listener, h))
}

/// Matches hostnames where either side may carry a `*.` wildcard prefix.
pub(crate) fn hostname_matches(a: &str, b: &str) -> bool {
    match (a.strip_prefix("*."), b.strip_prefix("*.")) {
        (None, None) => a.eq_ignore_ascii_case(b),
        (Some(suffix), None) => wildcard_covers(suffix, b),
        (None, Some(suffix)) => wildcard_covers(suffix, a),
        (Some(x), Some(y)) => {
            x.eq_ignore_ascii_case(y) || wildcard_covers(x, y) || wildcard_covers(y, x)
        }
    }
}

fn wildcard_covers(suffix: &str, host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let suffix = suffix.to_ascii_lowercase();
    host.len() > suffix.len() + 1 && host.ends_with(&format!(".{suffix}"))
}
