use crate::{
    merge::AttachedPolicyRef, ObjectSource, CORE_GROUP, GATEWAY_API_GROUP, INFERENCE_API_GROUP,
    TRELLIS_API_GROUP,
};
use chrono::{offset::Utc, DateTime};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};
use trellis_controller_collections::ResourceName;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyKind {
    Traffic,
    BackendConfig,
    Listener,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PolicyIr {
    Traffic(TrafficPolicyIr),
    BackendConfig(BackendPolicyIr),
    Listener(ListenerPolicyIr),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PolicyTargetRef {
    pub group: String,
    pub kind: String,
    pub name: String,
    pub section_name: Option<String>,
}

/// A policy resource translated to IR, along with its attachment metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyWrapper {
    pub source: ObjectSource,
    pub generation: Option<i64>,
    pub weight: i32,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub target_refs: Vec<PolicyTargetRef>,
    pub policy: PolicyIr,
    pub errors: Vec<String>,
}

/// A policy attached to a specific target, optionally scoped to a section
/// (listener or rule name) of it.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyAtt {
    pub policy: Arc<PolicyWrapper>,
    pub section: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrafficPolicyIr {
    pub timeout: Option<Duration>,
    pub retry: Option<RetryIr>,
    pub request_headers: Option<HeaderModifierIr>,
    pub rate_limit: Option<LocalRateLimitIr>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RetryIr {
    pub attempts: Option<u32>,
    pub per_try_timeout: Option<Duration>,
    pub retry_on: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HeaderModifierIr {
    pub set: BTreeMap<String, String>,
    pub add: BTreeMap<String, String>,
    pub remove: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LocalRateLimitIr {
    pub max_tokens: u32,
    pub tokens_per_fill: u32,
    pub fill_interval: Duration,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackendPolicyIr {
    pub connect_timeout: Option<Duration>,
    pub load_balancer: Option<LoadBalancer>,
    pub tls: Option<UpstreamTls>,
    pub per_connection_buffer_limit: Option<u32>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub enum LoadBalancer {
    RoundRobin,
    LeastRequest,
    Random,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpstreamTls {
    pub sni: Option<String>,
    pub mode: Option<TlsMode>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TlsMode {
    Simple,
    Mutual,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListenerPolicyIr {
    pub default: ListenerSettings,
    pub per_port: BTreeMap<u16, ListenerSettings>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListenerSettings {
    pub per_connection_buffer_limit: Option<u32>,
    pub idle_timeout: Option<Duration>,
    pub proxy_protocol: Option<bool>,
}

// === impl PolicyKind ===

impl PolicyKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Traffic => "TrafficPolicy",
            Self::BackendConfig => "BackendConfigPolicy",
            Self::Listener => "ListenerPolicy",
        }
    }

    /// Indicates whether policies of this kind may target `group`/`kind`.
    pub fn allows_target(&self, group: &str, kind: &str) -> bool {
        let is = |g: &str, k: &str| group.eq_ignore_ascii_case(g) && kind.eq_ignore_ascii_case(k);
        match self {
            Self::Traffic => is(GATEWAY_API_GROUP, "Gateway") || is(GATEWAY_API_GROUP, "HTTPRoute"),
            Self::BackendConfig => {
                is(CORE_GROUP, "Service")
                    || is(TRELLIS_API_GROUP, "Backend")
                    || is(INFERENCE_API_GROUP, "InferencePool")
            }
            Self::Listener => is(GATEWAY_API_GROUP, "Gateway"),
        }
    }
}

// === impl PolicyIr ===

impl PolicyIr {
    pub fn kind(&self) -> PolicyKind {
        match self {
            Self::Traffic(_) => PolicyKind::Traffic,
            Self::BackendConfig(_) => PolicyKind::BackendConfig,
            Self::Listener(_) => PolicyKind::Listener,
        }
    }

    pub fn as_traffic(&self) -> Option<&TrafficPolicyIr> {
        match self {
            Self::Traffic(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_backend_config(&self) -> Option<&BackendPolicyIr> {
        match self {
            Self::BackendConfig(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_listener(&self) -> Option<&ListenerPolicyIr> {
        match self {
            Self::Listener(p) => Some(p),
            _ => None,
        }
    }
}

// === impl PolicyWrapper ===

impl ResourceName for PolicyWrapper {
    fn resource_name(&self) -> String {
        self.source.to_string()
    }
}

impl PolicyWrapper {
    /// The index key under which a target is looked up.
    pub fn target_key(group: &str, kind: &str, namespace: &str, name: &str) -> String {
        format!(
            "{}/{}/{namespace}/{name}",
            group.to_ascii_lowercase(),
            kind.to_ascii_lowercase()
        )
    }

    /// Index keys for every target this policy names. Targets are always
    /// local to the policy's namespace.
    pub fn target_keys(&self) -> Vec<String> {
        let mut keys = self
            .target_refs
            .iter()
            .map(|t| Self::target_key(&t.group, &t.kind, &self.source.namespace, &t.name))
            .collect::<Vec<_>>();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Returns an attachment for each target ref that names `target`.
    pub fn attachments_to(self: &Arc<Self>, target: &ObjectSource) -> Vec<PolicyAtt> {
        if self.source.namespace != target.namespace {
            return Vec::new();
        }
        self.target_refs
            .iter()
            .filter(|t| t.name == target.name && target.is_kind(&t.group, &t.kind))
            .map(|t| PolicyAtt {
                policy: self.clone(),
                section: t.section_name.clone(),
            })
            .collect()
    }
}

// === impl PolicyAtt ===

impl PolicyAtt {
    pub fn origin(&self) -> AttachedPolicyRef {
        AttachedPolicyRef {
            source: self.policy.source.clone(),
            weight: self.policy.weight,
            section: self.section.clone(),
        }
    }

    /// Indicates whether the attachment applies to the given section of its
    /// target. Whole-object attachments apply to every section.
    pub fn applies_to_section(&self, section: Option<&str>) -> bool {
        match (self.section.as_deref(), section) {
            (None, _) => true,
            (Some(a), Some(b)) => a == b,
            (Some(_), None) => false,
        }
    }
}

// === impl ListenerPolicyIr ===

impl ListenerPolicyIr {
    /// Resolves the effective settings for a port: per-port values take
    /// precedence over the defaults.
    pub fn settings_for(&self, port: u16) -> ListenerSettings {
        let mut settings = self.default.clone();
        if let Some(port) = self.per_port.get(&port) {
            if port.per_connection_buffer_limit.is_some() {
                settings.per_connection_buffer_limit = port.per_connection_buffer_limit;
            }
            if port.idle_timeout.is_some() {
                settings.idle_timeout = port.idle_timeout;
            }
            if port.proxy_protocol.is_some() {
                settings.proxy_protocol = port.proxy_protocol;
            }
        }
        settings
    }
}
