//! Translates gateway IR to client-agnostic proxy configuration.
//!
//! Each listener port becomes a proxy listener; each gateway listener on that
//! port becomes a filter chain with its own route configuration. Routes are
//! grouped into virtual hosts by their effective domains.

use crate::gateways::hostname_matches;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};
use trellis_controller_collections::Collection;
use trellis_controller_core::{
    ir::{
        BackendRefIr, GatewayIr, HeaderModifierIr, HttpRouteMatch, ListenerIr, ListenerProtocol,
        RouteIr, TrafficPolicyIr,
    },
    merge,
    proxy::{
        DfpFilterConfig, FilterChain, GatewaySnapshot, HeaderModifierConfig, ListenerResource,
        RateLimitConfig, RetryConfig, RouteAction, RouteConfigResource, RouteEntry, VirtualHost,
        WeightedCluster, DFP_DNS_CACHE_NAME,
    },
};

/// The status returned for rules with no usable backend.
const NO_BACKEND_STATUS: u16 = 500;

/// Derives one snapshot per gateway role.
pub fn snapshots(gateways: &Collection<GatewayIr>) -> Collection<GatewaySnapshot> {
    gateways.derive_one("gateway-snapshots", |_, gateway| Some(translate(gateway)))
}

pub fn translate(gateway: &GatewayIr) -> GatewaySnapshot {
    let mut errors = gateway.errors.clone();
    let mut by_port = BTreeMap::<u16, Vec<FilterChain>>::new();
    let mut route_configs = Vec::new();
    let mut cluster_names = BTreeSet::new();
    let mut dfp_filters = BTreeMap::new();

    for listener in &gateway.listeners {
        errors.extend(
            listener
                .errors
                .iter()
                .map(|e| format!("listener {}: {e}", listener.name)),
        );
        if listener.protocol == ListenerProtocol::Unsupported || listener.port == 0 {
            continue;
        }

        let chain_name = format!("listener~{}~{}", listener.port, listener.name);
        let route_config = route_config(&chain_name, listener);

        let mut dfp_clusters = BTreeSet::new();
        for route in &listener.routes {
            for backend in route.rules.iter().flat_map(|r| r.backends.iter()) {
                if let BackendRefIr::Resolved {
                    cluster_name,
                    dynamic_forward_proxy,
                    ..
                } = backend
                {
                    cluster_names.insert(cluster_name.clone());
                    if *dynamic_forward_proxy {
                        dfp_clusters.insert(cluster_name.clone());
                    }
                }
            }
        }
        let dynamic_forward_proxy = (!dfp_clusters.is_empty()).then(|| DfpFilterConfig {
            dns_cache_name: DFP_DNS_CACHE_NAME.to_string(),
            sub_clusters: dfp_clusters.into_iter().collect(),
        });
        if let Some(dfp) = &dynamic_forward_proxy {
            dfp_filters.insert(chain_name.clone(), dfp.clone());
        }

        let settings = listener.policy.settings_for(listener.port);
        by_port.entry(listener.port).or_default().push(FilterChain {
            name: chain_name,
            server_names: listener.hostname.iter().cloned().collect(),
            route_config_name: route_config.name.clone(),
            tls: listener.protocol == ListenerProtocol::Https,
            per_connection_buffer_limit: settings.per_connection_buffer_limit,
            idle_timeout_ms: settings.idle_timeout.map(millis),
            proxy_protocol: settings.proxy_protocol.unwrap_or(false),
            dynamic_forward_proxy,
        });
        route_configs.push(Arc::new(route_config));
    }

    let listeners = by_port
        .into_iter()
        .map(|(port, filter_chains)| {
            Arc::new(ListenerResource {
                name: format!("listener~{port}"),
                address: "0.0.0.0".to_string(),
                port,
                filter_chains,
            })
        })
        .collect();

    GatewaySnapshot {
        role: gateway.role.clone(),
        gateway: gateway.source.clone(),
        listeners,
        route_configs,
        cluster_names,
        dfp_filters,
        errors,
    }
}

fn route_config(name: &str, listener: &ListenerIr) -> RouteConfigResource {
    let mut hosts = BTreeMap::<Vec<String>, Vec<RouteEntry>>::new();
    for route in &listener.routes {
        let domains = domains(listener.hostname.as_deref(), route);
        hosts
            .entry(domains)
            .or_default()
            .extend(route_entries(listener, route));
    }

    let virtual_hosts = hosts
        .into_iter()
        .map(|(domains, routes)| VirtualHost {
            name: format!("{name}~{}", domains.join(",")),
            domains,
            routes,
        })
        .collect();
    RouteConfigResource {
        name: name.to_string(),
        virtual_hosts,
    }
}

/// The domains a route serves on a listener: the route's hostnames that the
/// listener accepts, or the listener's hostname when the route names none.
fn domains(listener: Option<&str>, route: &RouteIr) -> Vec<String> {
    let mut domains = match listener {
        None if route.hostnames.is_empty() => vec!["*".to_string()],
        None => route.hostnames.clone(),
        Some(host) if route.hostnames.is_empty() => vec![host.to_string()],
        Some(host) => route
            .hostnames
            .iter()
            .filter(|h| hostname_matches(host, h))
            .cloned()
            .collect(),
    };
    domains.sort();
    domains.dedup();
    domains
}

fn route_entries<'r>(
    listener: &'r ListenerIr,
    route: &'r RouteIr,
) -> impl Iterator<Item = RouteEntry> + 'r {
    route.rules.iter().enumerate().flat_map(move |(i, rule)| {
        let (policy, _) = merge::inherit(
            &rule.policy,
            &rule.origins,
            &listener.traffic_policy,
            &listener.traffic_origins,
            route.merge_strategy,
        );

        let clusters = rule
            .backends
            .iter()
            .filter_map(|backend| match backend {
                BackendRefIr::Resolved {
                    cluster_name,
                    weight,
                    ..
                } => Some(WeightedCluster {
                    name: cluster_name.clone(),
                    weight: *weight,
                }),
                BackendRefIr::Error { .. } => None,
            })
            .collect::<Vec<_>>();
        let action = if clusters.is_empty() {
            RouteAction::DirectResponse {
                status: NO_BACKEND_STATUS,
            }
        } else {
            RouteAction::Forward { clusters }
        };
        let timeout = policy.timeout.or(rule.timeout);

        rule.matches.iter().enumerate().map(move |(j, matcher)| {
            entry(
                format!(
                    "{}~{}~rule-{i}~match-{j}",
                    route.source.namespace, route.source.name
                ),
                matcher.clone(),
                action.clone(),
                timeout,
                &policy,
            )
        })
    })
}

fn entry(
    name: String,
    matcher: HttpRouteMatch,
    action: RouteAction,
    timeout: Option<Duration>,
    policy: &TrafficPolicyIr,
) -> RouteEntry {
    RouteEntry {
        name,
        matcher,
        action,
        timeout_ms: timeout.map(millis),
        retry: policy.retry.as_ref().map(|retry| RetryConfig {
            attempts: retry.attempts.unwrap_or(1),
            per_try_timeout_ms: retry.per_try_timeout.map(millis),
            retry_on: retry.retry_on.clone().unwrap_or_default(),
        }),
        request_headers: policy.request_headers.as_ref().map(header_modifier),
        rate_limit: policy.rate_limit.as_ref().map(|rl| RateLimitConfig {
            max_tokens: rl.max_tokens,
            tokens_per_fill: rl.tokens_per_fill,
            fill_interval_ms: millis(rl.fill_interval),
        }),
    }
}

fn header_modifier(headers: &HeaderModifierIr) -> HeaderModifierConfig {
    HeaderModifierConfig {
        set: headers.set.clone().into_iter().collect(),
        add: headers.add.clone().into_iter().collect(),
        remove: headers.remove.iter().cloned().collect(),
    }
}

pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
