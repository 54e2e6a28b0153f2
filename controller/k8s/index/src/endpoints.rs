use crate::{backends::Backends, inputs::Inputs};
use kube::ResourceExt;
use std::collections::BTreeMap;
use trellis_controller_collections::{object_key, Collection, HandlerContext, Index};
use trellis_controller_core::ir::{BackendData, Endpoint, EndpointsForBackend, Locality};
use trellis_controller_k8s_api::Pod;

pub const REGION_LABEL: &str = "topology.kubernetes.io/region";
pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";

/// Derives the endpoints of every backend object.
///
/// Selector-based backends read pods through an index keyed by
/// `namespace/label=value`, so a pod gaining or losing a selected label
/// recomputes only the backends that select on that label.
pub fn endpoints(inputs: &Inputs, backends: &Backends) -> Collection<EndpointsForBackend> {
    let pods_by_label = inputs.pods.index("pods-by-label", |pod| {
        let namespace = pod.namespace().unwrap_or_default();
        pod.labels()
            .iter()
            .map(|(k, v)| label_key(&namespace, k, v))
            .collect()
    });

    backends
        .objects
        .derive_one("endpoints", move |ctx, backend| {
            let endpoints = match &backend.data {
                BackendData::Service {
                    selector,
                    target_port,
                } => selected_endpoints(
                    ctx,
                    &pods_by_label,
                    &backend.source.namespace,
                    selector,
                    *target_port,
                ),
                BackendData::InferencePool(pool) => selected_endpoints(
                    ctx,
                    &pods_by_label,
                    &backend.source.namespace,
                    &pool.selector,
                    pool.target_port,
                ),
                BackendData::Static { hosts } => hosts
                    .iter()
                    .map(|h| Endpoint {
                        address: h.host.clone(),
                        port: h.port,
                        locality: Locality::default(),
                    })
                    .collect(),
                BackendData::DynamicForwardProxy { .. } => return None,
            };
            Some(EndpointsForBackend {
                cluster_name: backend.cluster_name(),
                backend: backend.source.clone(),
                endpoints,
            })
        })
}

fn label_key(namespace: &str, key: &str, value: &str) -> String {
    object_key(namespace, &format!("{key}={value}"))
}

fn selected_endpoints(
    ctx: &mut HandlerContext<'_>,
    pods_by_label: &Index<Pod>,
    namespace: &str,
    selector: &BTreeMap<String, String>,
    port: u16,
) -> Vec<Endpoint> {
    // An empty selector selects nothing; such services are managed
    // externally.
    let Some((key, value)) = selector.iter().next() else {
        return Vec::new();
    };
    if port == 0 {
        return Vec::new();
    }

    let mut endpoints = ctx
        .fetch_indexed(pods_by_label, &label_key(namespace, key, value))
        .iter()
        .filter(|pod| {
            let labels = pod.labels();
            selector.iter().all(|(k, v)| labels.get(k) == Some(v))
        })
        .filter(|pod| is_ready(pod))
        .filter_map(|pod| {
            let address = pod.status.as_ref()?.pod_ip.clone()?;
            Some(Endpoint {
                address,
                port,
                locality: pod_locality(pod),
            })
        })
        .collect::<Vec<_>>();
    endpoints.sort();
    endpoints
}

fn is_ready(pod: &Pod) -> bool {
    pod.status
        .iter()
        .flat_map(|status| status.conditions.iter().flatten())
        .any(|c| c.type_ == "Ready" && c.status == "True")
}

pub(crate) fn pod_locality(pod: &Pod) -> Locality {
    let labels = pod.labels();
    Locality {
        region: labels.get(REGION_LABEL).cloned().unwrap_or_default(),
        zone: labels.get(ZONE_LABEL).cloned().unwrap_or_default(),
    }
}
