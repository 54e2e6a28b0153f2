use crate::{backends::Backends, translator};
use trellis_controller_collections::Collection;
use trellis_controller_core::{
    ir::{BackendData, BackendObjectIr, ClusterIr, LoadBalancer, TlsMode},
    proxy::{
        ClusterResource, DfpClusterConfig, DiscoveryType, UpstreamTlsConfig,
        DEFAULT_CONNECT_TIMEOUT_MS, DFP_DNS_CACHE_NAME,
    },
};

/// Derives a client-agnostic cluster for every backend object.
pub fn clusters(backends: &Backends) -> Collection<ClusterIr> {
    backends
        .objects
        .derive_one("clusters", |_, backend| Some(cluster(backend)))
}

pub(crate) fn cluster(backend: &BackendObjectIr) -> ClusterIr {
    let policy = &backend.policy;
    let discovery = match &backend.data {
        BackendData::Service { .. } | BackendData::InferencePool(_) => DiscoveryType::Eds,
        BackendData::Static { .. } => DiscoveryType::Static,
        BackendData::DynamicForwardProxy { .. } => DiscoveryType::ClusterProvided,
    };
    let static_hosts = match &backend.data {
        BackendData::Static { hosts } => hosts
            .iter()
            .map(|h| format!("{}:{}", h.host, h.port))
            .collect(),
        _ => Vec::new(),
    };
    let dynamic_forward_proxy = match &backend.data {
        BackendData::DynamicForwardProxy { tls } => Some(DfpClusterConfig {
            dns_cache_name: DFP_DNS_CACHE_NAME.to_string(),
            tls: *tls,
        }),
        _ => None,
    };
    let inference_extension = match &backend.data {
        BackendData::InferencePool(pool) => pool.extension.as_ref().map(|ext| {
            let port = ext.port.unwrap_or_default();
            format!("{}.{}.svc:{port}", ext.name, backend.source.namespace)
        }),
        _ => None,
    };

    let cluster = ClusterResource {
        name: backend.cluster_name(),
        discovery,
        lb_policy: policy.load_balancer.unwrap_or(LoadBalancer::RoundRobin),
        connect_timeout_ms: policy
            .connect_timeout
            .map(translator::millis)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
        tls: policy.tls.as_ref().map(|tls| UpstreamTlsConfig {
            sni: tls.sni.clone(),
            mutual_requested: tls.mode == Some(TlsMode::Mutual),
            client_certificate: None,
        }),
        per_connection_buffer_limit: policy.per_connection_buffer_limit,
        static_hosts,
        dynamic_forward_proxy,
        inference_extension,
    };

    ClusterIr {
        backend: backend.source.clone(),
        cluster,
        errors: backend.errors.clone(),
    }
}
