use crate::{
    conditions::reasons,
    ir::TrafficPolicyIr,
    merge::{MergeOrigins, MergeStrategy},
    ObjectSource,
};
use chrono::{offset::Utc, DateTime};
use std::time::Duration;
use trellis_controller_collections::ResourceName;

#[derive(Clone, Debug, PartialEq)]
pub struct RouteIr {
    pub source: ObjectSource,
    pub generation: Option<i64>,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub parents: Vec<ParentRefIr>,
    pub hostnames: Vec<String>,
    pub rules: Vec<RouteRuleIr>,
    pub merge_strategy: MergeStrategy,
}

/// A parent reference with defaults applied.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ParentRefIr {
    pub gateway: ObjectSource,
    pub section_name: Option<String>,
    pub port: Option<u16>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RouteRuleIr {
    pub name: Option<String>,
    pub matches: Vec<HttpRouteMatch>,
    pub backends: Vec<BackendRefIr>,
    pub timeout: Option<Duration>,
    pub policy: TrafficPolicyIr,
    pub origins: MergeOrigins,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BackendRefIr {
    Resolved {
        backend: ObjectSource,
        cluster_name: String,
        weight: u32,
        dynamic_forward_proxy: bool,
    },
    Error {
        backend: ObjectSource,
        weight: u32,
        error: BackendRefError,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendRefError {
    pub reason: &'static str,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteMatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathMatch>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderMatch>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub query_params: Vec<QueryParamMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PathMatch {
    Exact(String),
    Prefix(String),
    Regex(String),
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HeaderMatch {
    Exact(String, String),
    Regex(String, String),
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryParamMatch {
    Exact(String, String),
    Regex(String, String),
}

// === impl RouteIr ===

impl ResourceName for RouteIr {
    fn resource_name(&self) -> String {
        self.source.key()
    }
}

impl RouteIr {
    pub fn backend_errors(&self) -> impl Iterator<Item = &BackendRefError> + '_ {
        self.rules
            .iter()
            .flat_map(|rule| rule.backends.iter())
            .filter_map(|backend| match backend {
                BackendRefIr::Error { error, .. } => Some(error),
                BackendRefIr::Resolved { .. } => None,
            })
    }

    /// The parent references naming `gateway`.
    pub fn parents_for<'r>(
        &'r self,
        gateway: &'r ObjectSource,
    ) -> impl Iterator<Item = &'r ParentRefIr> + 'r {
        self.parents.iter().filter(move |p| p.gateway == *gateway)
    }
}

// === impl BackendRefError ===

impl BackendRefError {
    pub fn not_found(backend: &ObjectSource) -> Self {
        Self {
            reason: reasons::BACKEND_NOT_FOUND,
            message: format!(
                "backend {}/{} not found",
                backend.namespace, backend.name
            ),
        }
    }

    pub fn not_permitted(backend: &ObjectSource) -> Self {
        Self {
            reason: reasons::REF_NOT_PERMITTED,
            message: format!(
                "reference to {} {}/{} not permitted by any ReferenceGrant",
                backend.kind, backend.namespace, backend.name
            ),
        }
    }

    pub fn invalid_kind(backend: &ObjectSource) -> Self {
        let group = if backend.group.is_empty() {
            "core"
        } else {
            &backend.group
        };
        Self {
            reason: reasons::INVALID_KIND,
            message: format!("unsupported backend kind {group}/{}", backend.kind),
        }
    }

    pub fn missing_port(backend: &ObjectSource) -> Self {
        Self {
            reason: reasons::BACKEND_NOT_FOUND,
            message: format!(
                "backend {}/{} requires a port",
                backend.namespace, backend.name
            ),
        }
    }
}
