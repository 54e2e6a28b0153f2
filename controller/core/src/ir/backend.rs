use crate::{
    ir::BackendPolicyIr, merge::MergeOrigins, proxy::ClusterResource, ObjectSource,
};
use std::collections::BTreeMap;
use trellis_controller_collections::ResourceName;

/// A routable backend: one port of a Service, a Backend resource, or an
/// InferencePool.
#[derive(Clone, Debug, PartialEq)]
pub struct BackendObjectIr {
    pub source: ObjectSource,
    pub port: u16,
    pub data: BackendData,
    pub policy: BackendPolicyIr,
    pub origins: MergeOrigins,
    pub errors: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BackendData {
    Service {
        selector: BTreeMap<String, String>,
        target_port: u16,
    },
    Static {
        hosts: Vec<StaticHost>,
    },
    DynamicForwardProxy {
        tls: bool,
    },
    InferencePool(InferencePoolIr),
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct StaticHost {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InferencePoolIr {
    pub selector: BTreeMap<String, String>,
    pub target_port: u16,
    pub extension: Option<ExtensionRef>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionRef {
    pub name: String,
    pub port: Option<u16>,
}

/// Resolved addresses for a backend.
#[derive(Clone, Debug, PartialEq)]
pub struct EndpointsForBackend {
    pub cluster_name: String,
    pub backend: ObjectSource,
    pub endpoints: Vec<Endpoint>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
    pub locality: Locality,
}

/// Topology of an endpoint or a connected client. Empty strings are unknown.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct Locality {
    pub region: String,
    pub zone: String,
}

/// A client-agnostic proxy cluster for a backend.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterIr {
    pub backend: ObjectSource,
    pub cluster: ClusterResource,
    pub errors: Vec<String>,
}

/// Formats the `kind~namespace~name~port` name shared by a backend's
/// cluster and endpoints.
pub fn cluster_name(source: &ObjectSource, port: u16) -> String {
    format!(
        "{}~{}~{}~{port}",
        source.kind.to_ascii_lowercase(),
        source.namespace,
        source.name
    )
}

/// Endpoints in the client's zone are preferred, then those in its region.
pub fn locality_priority(client: &Locality, endpoint: &Locality) -> u32 {
    if client.region.is_empty() || client.region != endpoint.region {
        return 2;
    }
    if !client.zone.is_empty() && client.zone == endpoint.zone {
        return 0;
    }
    1
}

/// Checks the parts of an InferencePool spec that cannot be expressed in the
/// proxy configuration.
pub fn validate_pool(
    selector: &BTreeMap<String, String>,
    target_port: i32,
    extension_name: Option<&str>,
) -> Vec<String> {
    let mut errors = Vec::new();
    if selector.is_empty() {
        errors.push("selector must not be empty".to_string());
    }
    if !(1..=65535).contains(&target_port) {
        errors.push(format!(
            "targetPortNumber {target_port} is outside the range 1-65535"
        ));
    }
    if let Some(name) = extension_name {
        if name.is_empty() {
            errors.push("extensionRef must specify a name".to_string());
        }
    }
    errors
}

// === impl BackendObjectIr ===

impl BackendObjectIr {
    pub fn cluster_name(&self) -> String {
        cluster_name(&self.source, self.port)
    }

    pub fn is_dynamic_forward_proxy(&self) -> bool {
        matches!(self.data, BackendData::DynamicForwardProxy { .. })
    }
}

impl ResourceName for BackendObjectIr {
    fn resource_name(&self) -> String {
        self.cluster_name()
    }
}

impl ResourceName for EndpointsForBackend {
    fn resource_name(&self) -> String {
        self.cluster_name.clone()
    }
}

impl ResourceName for ClusterIr {
    fn resource_name(&self) -> String {
        self.cluster.name.clone()
    }
}
