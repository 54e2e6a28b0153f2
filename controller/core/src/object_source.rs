use crate::{CORE_GROUP, GATEWAY_API_GROUP, INFERENCE_API_GROUP, TRELLIS_API_GROUP};
use std::fmt;

/// Identifies a Kubernetes object by group, kind, namespace and name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct ObjectSource {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectSource {
    pub fn new(
        group: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn gateway(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(GATEWAY_API_GROUP, "Gateway", namespace, name)
    }

    pub fn http_route(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(GATEWAY_API_GROUP, "HTTPRoute", namespace, name)
    }

    pub fn service(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(CORE_GROUP, "Service", namespace, name)
    }

    pub fn backend(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(TRELLIS_API_GROUP, "Backend", namespace, name)
    }

    pub fn inference_pool(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(INFERENCE_API_GROUP, "InferencePool", namespace, name)
    }

    pub fn is_kind(&self, group: &str, kind: &str) -> bool {
        self.group.eq_ignore_ascii_case(group) && self.kind.eq_ignore_ascii_case(kind)
    }

    /// The `namespace/name` key under which the object is stored.
    pub fn key(&self) -> String {
        trellis_controller_collections::object_key(&self.namespace, &self.name)
    }
}

impl fmt::Display for ObjectSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let group = if self.group.is_empty() {
            "core"
        } else {
            &self.group
        };
        write!(f, "{group}/{}/{}/{}", self.kind, self.namespace, self.name)
    }
}
