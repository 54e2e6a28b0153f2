//! HTTPRoute translation: parent defaulting, backend resolution and
//! per-rule policy merging.

use crate::{
    backends::Backends,
    creation_timestamp,
    inputs::Inputs,
    policies::{for_section, Policies},
    reference_grants::{ReferenceFrom, ReferenceGrants},
};
use kube::{Resource, ResourceExt};
use trellis_controller_collections::{Collection, HandlerContext, Index};
use trellis_controller_core::{
    ir::{
        BackendRefError, BackendRefIr, HeaderMatch, HttpRouteMatch, ParentRefIr, PathMatch,
        PolicyIr, QueryParamMatch, RouteIr, RouteRuleIr,
    },
    merge::{self, MergeStrategy},
    ObjectSource, CORE_GROUP, GATEWAY_API_GROUP, INFERENCE_API_GROUP, TRELLIS_API_GROUP,
};
use trellis_controller_k8s_api::{
    duration::parse_duration,
    gateway::httproutes::{
        HTTPRouteParentRefs, HTTPRouteRulesBackendRefs, HTTPRouteRulesMatches,
        HTTPRouteRulesMatchesHeadersType, HTTPRouteRulesMatchesMethod,
        HTTPRouteRulesMatchesPathType, HTTPRouteRulesMatchesQueryParamsType,
    },
    HttpRoute,
};

#[derive(Clone, Debug)]
pub struct Routes {
    pub routes: Collection<RouteIr>,
    /// Routes keyed by the `namespace/name` of each parent gateway.
    pub by_parent: Index<RouteIr>,
}

impl Routes {
    pub fn new(
        inputs: &Inputs,
        policies: &Policies,
        backends: &Backends,
        grants: &ReferenceGrants,
    ) -> Self {
        let policies = policies.clone();
        let backends = backends.clone();
        let grants = grants.clone();
        let routes = inputs
            .http_routes
            .derive_one("httproutes-ir", move |ctx, route| {
                Some(route_ir(ctx, &policies, &backends, &grants, route))
            });
        let by_parent = routes.index("httproutes-by-parent", |route| {
            route.parents.iter().map(|p| p.gateway.key()).collect()
        });
        Self { routes, by_parent }
    }
}

/// Applies the Gateway API defaults to a route's parent references and drops
/// references to parents that are not Gateways or that name an invalid port.
pub fn parent_gateways(
    route_namespace: &str,
    parents: &[HTTPRouteParentRefs],
) -> Vec<ParentRefIr> {
    let mut refs = parents
        .iter()
        .filter(|parent| {
            let group = parent.group.as_deref().unwrap_or(GATEWAY_API_GROUP);
            let kind = parent.kind.as_deref().unwrap_or("Gateway");
            group == GATEWAY_API_GROUP && kind == "Gateway"
        })
        .filter_map(|parent| {
            let port = match parent.port {
                Some(port) => Some(port_number(i64::from(port))?),
                None => None,
            };
            Some(ParentRefIr {
                gateway: ObjectSource::gateway(
                    parent.namespace.as_deref().unwrap_or(route_namespace),
                    parent.name.clone(),
                ),
                section_name: parent.section_name.clone(),
                port,
            })
        })
        .collect::<Vec<_>>();
    refs.dedup();
    refs
}

/// Resolves the object a backend reference names, applying the defaults
/// for group, kind and namespace.
pub fn backend_ref_source(
    route_namespace: &str,
    backend: &HTTPRouteRulesBackendRefs,
) -> ObjectSource {
    let group = backend.group.as_deref().unwrap_or(CORE_GROUP);
    let kind = backend.kind.as_deref().unwrap_or("Service");
    let namespace = backend.namespace.as_deref().unwrap_or(route_namespace);
    ObjectSource::new(group, kind, namespace, backend.name.clone())
}

fn route_ir(
    ctx: &mut HandlerContext<'_>,
    policies: &Policies,
    backends: &Backends,
    grants: &ReferenceGrants,
    route: &HttpRoute,
) -> RouteIr {
    let namespace = route.namespace().unwrap_or_default();
    let source = ObjectSource::http_route(namespace.clone(), route.name_unchecked());
    let merge_strategy = MergeStrategy::from_annotations(&source, route.annotations());
    let spec = &route.spec;

    let parents = parent_gateways(&namespace, spec.parent_refs.as_deref().unwrap_or_default());
    let atts = policies.attachments(ctx, &source);

    let rules = spec
        .rules
        .iter()
        .flatten()
        .map(|rule| {
            let backends = rule
                .backend_refs
                .iter()
                .flatten()
                .map(|backend| resolve_backend(ctx, backends, grants, &namespace, backend))
                .collect();

            let rule_atts = for_section(&atts, rule.name.as_deref());
            let (policy, origins) =
                merge::merge_attachments(&rule_atts, merge_strategy, PolicyIr::as_traffic);

            let timeout = rule
                .timeouts
                .as_ref()
                .and_then(|t| t.request.as_ref())
                .and_then(|t| match parse_duration(t) {
                    Ok(t) => Some(t),
                    Err(error) => {
                        tracing::warn!(route = %source, %error, "Ignoring invalid request timeout");
                        None
                    }
                });

            let matches = match rule.matches.as_deref() {
                None | Some([]) => vec![HttpRouteMatch {
                    path: Some(PathMatch::Prefix("/".to_string())),
                    ..Default::default()
                }],
                Some(matches) => matches.iter().map(route_match).collect(),
            };

            RouteRuleIr {
                name: rule.name.clone(),
                matches,
                backends,
                timeout,
                policy,
                origins,
            }
        })
        .collect();

    RouteIr {
        generation: route.meta().generation,
        creation_timestamp: creation_timestamp(route.meta()),
        parents,
        hostnames: spec.hostnames.clone().unwrap_or_default(),
        rules,
        merge_strategy,
        source,
    }
}

fn resolve_backend(
    ctx: &mut HandlerContext<'_>,
    backends: &Backends,
    grants: &ReferenceGrants,
    route_namespace: &str,
    backend_ref: &HTTPRouteRulesBackendRefs,
) -> BackendRefIr {
    let backend = backend_ref_source(route_namespace, backend_ref);
    // Negative weights are rejected by the CRD schema.
    let weight = backend_ref
        .weight
        .map_or(1, |w| u32::try_from(i64::from(w)).unwrap_or(0));
    let error = |error| BackendRefIr::Error {
        backend: backend.clone(),
        weight,
        error,
    };

    let is_service = backend.is_kind(CORE_GROUP, "Service");
    if !is_service
        && !backend.is_kind(TRELLIS_API_GROUP, "Backend")
        && !backend.is_kind(INFERENCE_API_GROUP, "InferencePool")
    {
        return error(BackendRefError::invalid_kind(&backend));
    }

    let from = ReferenceFrom {
        group: GATEWAY_API_GROUP,
        kind: "HTTPRoute",
        namespace: route_namespace,
    };
    if !grants.allowed(ctx, from, &backend) {
        return error(BackendRefError::not_permitted(&backend));
    }

    let candidates = backends.lookup(ctx, &backend);
    let found = if is_service {
        let Some(port) = backend_ref.port.and_then(|p| port_number(i64::from(p))) else {
            return error(BackendRefError::missing_port(&backend));
        };
        candidates.into_iter().find(|b| b.port == port)
    } else {
        candidates.into_iter().next()
    };
    match found {
        Some(object) => BackendRefIr::Resolved {
            cluster_name: object.cluster_name(),
            dynamic_forward_proxy: object.is_dynamic_forward_proxy(),
            backend,
            weight,
        },
        None => error(BackendRefError::not_found(&backend)),
    }
}

fn route_match(m: &HTTPRouteRulesMatches) -> HttpRouteMatch {
    let path = m.path.as_ref().map(|path| {
        let value = path.value.clone().unwrap_or_else(|| "/".to_string());
        match path.r#type {
            Some(HTTPRouteRulesMatchesPathType::Exact) => PathMatch::Exact(value),
            Some(HTTPRouteRulesMatchesPathType::RegularExpression) => PathMatch::Regex(value),
            Some(HTTPRouteRulesMatchesPathType::PathPrefix) | None => PathMatch::Prefix(value),
        }
    });
    let headers = m
        .headers
        .iter()
        .flatten()
        .map(|h| {
            let name = h.name.to_ascii_lowercase();
            match h.r#type {
                Some(HTTPRouteRulesMatchesHeadersType::RegularExpression) => {
                    HeaderMatch::Regex(name, h.value.clone())
                }
                Some(HTTPRouteRulesMatchesHeadersType::Exact) | None => {
                    HeaderMatch::Exact(name, h.value.clone())
                }
            }
        })
        .collect();
    let query_params = m
        .query_params
        .iter()
        .flatten()
        .map(|q| match q.r#type {
            Some(HTTPRouteRulesMatchesQueryParamsType::RegularExpression) => {
                QueryParamMatch::Regex(q.name.clone(), q.value.clone())
            }
            Some(HTTPRouteRulesMatchesQueryParamsType::Exact) | None => {
                QueryParamMatch::Exact(q.name.clone(), q.value.clone())
            }
        })
        .collect();
    HttpRouteMatch {
        path,
        headers,
        query_params,
        method: m.method.as_ref().map(|m| method_name(m).to_string()),
    }
}

fn method_name(method: &HTTPRouteRulesMatchesMethod) -> &'static str {
    match method {
        HTTPRouteRulesMatchesMethod::Get => "GET",
        HTTPRouteRulesMatchesMethod::Head => "HEAD",
        HTTPRouteRulesMatchesMethod::Post => "POST",
        HTTPRouteRulesMatchesMethod::Put => "PUT",
        HTTPRouteRulesMatchesMethod::Delete => "DELETE",
        HTTPRouteRulesMatchesMethod::Connect => "CONNECT",
        HTTPRouteRulesMatchesMethod::Options => "OPTIONS",
        HTTPRouteRulesMatchesMethod::Trace => "TRACE",
        HTTPRouteRulesMatchesMethod::Patch => "PATCH",
    }
}

/// Port numbers in Gateway API resources are 32-bit; zero and values above
/// 65535 are invalid.
fn port_number(port: i64) -> Option<u16> {
    u16::try_from(port).ok().filter(|p| *p != 0)
}
