//! Client-agnostic proxy configuration produced by the translator.
//!
//! These descriptors are what the snapshot cache distributes. They derive
//! `Serialize` so their content can be hashed deterministically.

use crate::{
    ir::{HttpRouteMatch, Locality, LoadBalancer},
    ObjectSource,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    hash::{BuildHasher, Hash, Hasher},
    sync::Arc,
};
use trellis_controller_collections::ResourceName;

/// Client-agnostic configuration for all proxies serving one gateway.
#[derive(Clone, Debug, PartialEq)]
pub struct GatewaySnapshot {
    pub role: String,
    pub gateway: ObjectSource,
    pub listeners: Vec<Arc<ListenerResource>>,
    pub route_configs: Vec<Arc<RouteConfigResource>>,
    /// Clusters referenced by this gateway's routes. Cluster and endpoint
    /// descriptors are resolved per client.
    pub cluster_names: BTreeSet<String>,
    /// Dynamic forward proxy filter configuration keyed by filter-chain name.
    pub dfp_filters: BTreeMap<String, DfpFilterConfig>,
    pub errors: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerResource {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub filter_chains: Vec<FilterChain>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterChain {
    pub name: String,
    pub server_names: Vec<String>,
    pub route_config_name: String,
    pub tls: bool,
    pub per_connection_buffer_limit: Option<u32>,
    pub idle_timeout_ms: Option<u64>,
    pub proxy_protocol: bool,
    pub dynamic_forward_proxy: Option<DfpFilterConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DfpFilterConfig {
    pub dns_cache_name: String,
    pub sub_clusters: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfigResource {
    pub name: String,
    pub virtual_hosts: Vec<VirtualHost>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualHost {
    pub name: String,
    pub domains: Vec<String>,
    pub routes: Vec<RouteEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteEntry {
    pub name: String,
    pub matcher: HttpRouteMatch,
    pub action: RouteAction,
    pub timeout_ms: Option<u64>,
    pub retry: Option<RetryConfig>,
    pub request_headers: Option<HeaderModifierConfig>,
    pub rate_limit: Option<RateLimitConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RouteAction {
    Forward { clusters: Vec<WeightedCluster> },
    DirectResponse { status: u16 },
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct WeightedCluster {
    pub name: String,
    pub weight: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    pub attempts: u32,
    pub per_try_timeout_ms: Option<u64>,
    pub retry_on: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct HeaderModifierConfig {
    pub set: Vec<(String, String)>,
    pub add: Vec<(String, String)>,
    pub remove: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub max_tokens: u32,
    pub tokens_per_fill: u32,
    pub fill_interval_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResource {
    pub name: String,
    pub discovery: DiscoveryType,
    pub lb_policy: LoadBalancer,
    pub connect_timeout_ms: u64,
    pub tls: Option<UpstreamTlsConfig>,
    pub per_connection_buffer_limit: Option<u32>,
    /// Hosts for statically-addressed clusters.
    pub static_hosts: Vec<String>,
    pub dynamic_forward_proxy: Option<DfpClusterConfig>,
    /// The endpoint-picker extension serving an inference pool.
    pub inference_extension: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub enum DiscoveryType {
    Eds,
    Static,
    ClusterProvided,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamTlsConfig {
    pub sni: Option<String>,
    /// Whether the backend requests mutual TLS. The client certificate is
    /// only configured for clients that opt in.
    pub mutual_requested: bool,
    pub client_certificate: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DfpClusterConfig {
    pub dns_cache_name: String,
    pub tls: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointResource {
    pub cluster_name: String,
    pub localities: Vec<LocalityEndpoints>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalityEndpoints {
    pub locality: Locality,
    pub priority: u32,
    pub addresses: Vec<String>,
}

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// The DNS cache shared by dynamic forward proxy filters and clusters.
pub const DFP_DNS_CACHE_NAME: &str = "dynamic_forward_proxy_cache_config";

/// Formats the `controller~namespace~name` role of a gateway.
pub fn role(controller: &str, namespace: &str, name: &str) -> String {
    format!("{controller}~{namespace}~{name}")
}

/// Splits a role into its controller, namespace and name.
pub fn split_role(role: &str) -> Option<(&str, &str, &str)> {
    let mut parts = role.splitn(3, '~');
    let controller = parts.next()?;
    let namespace = parts.next()?;
    let name = parts.next()?;
    if name.contains('~') {
        return None;
    }
    Some((controller, namespace, name))
}

/// Builds a hasher with fixed seeds so hashes agree across processes and
/// restarts.
pub fn stable_hasher() -> impl Hasher {
    ahash::RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    )
    .build_hasher()
}

// === impl GatewaySnapshot ===

impl ResourceName for GatewaySnapshot {
    fn resource_name(&self) -> String {
        self.role.clone()
    }
}

impl GatewaySnapshot {
    /// A digest of the cluster set, used to detect per-client data computed
    /// against a different revision of this snapshot.
    pub fn cluster_revision(&self) -> u64 {
        let mut hasher = stable_hasher();
        self.cluster_names.hash(&mut hasher);
        hasher.finish()
    }
}
