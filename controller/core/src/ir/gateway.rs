use crate::{
    ir::{ListenerPolicyIr, RouteIr, TrafficPolicyIr},
    merge::MergeOrigins,
    ObjectSource,
};
use std::sync::Arc;
use trellis_controller_collections::ResourceName;

#[derive(Clone, Debug, PartialEq)]
pub struct GatewayIr {
    pub source: ObjectSource,
    pub generation: Option<i64>,
    pub class_name: String,
    /// The `controller~namespace~name` role served by proxies for this
    /// gateway.
    pub role: String,
    pub listeners: Vec<ListenerIr>,
    pub errors: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListenerIr {
    pub name: String,
    pub port: u16,
    pub protocol: ListenerProtocol,
    pub hostname: Option<String>,
    pub policy: ListenerPolicyIr,
    pub policy_origins: MergeOrigins,
    pub traffic_policy: TrafficPolicyIr,
    pub traffic_origins: MergeOrigins,
    pub routes: Vec<Arc<RouteIr>>,
    pub errors: Vec<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ListenerProtocol {
    Http,
    Https,
    Unsupported,
}

// === impl GatewayIr ===

impl ResourceName for GatewayIr {
    fn resource_name(&self) -> String {
        self.source.key()
    }
}

impl GatewayIr {
    /// Indicates whether the route is attached to any listener.
    pub fn attaches(&self, route: &ObjectSource) -> bool {
        self.listeners
            .iter()
            .any(|l| l.routes.iter().any(|r| r.source == *route))
    }

    pub fn listener(&self, name: &str) -> Option<&ListenerIr> {
        self.listeners.iter().find(|l| l.name == name)
    }
}

// === impl ListenerProtocol ===

impl ListenerProtocol {
    pub fn parse(protocol: &str) -> Self {
        match protocol {
            "HTTP" => Self::Http,
            "HTTPS" => Self::Https,
            _ => Self::Unsupported,
        }
    }
}
