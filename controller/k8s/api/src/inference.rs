use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use std::collections::BTreeMap;

/// A pool of model-serving pods fronted by an endpoint-picker extension.
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "inference.networking.x-k8s.io",
    version = "v1alpha2",
    kind = "InferencePool",
    status = "InferencePoolStatus",
    namespaced,
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct InferencePoolSpec {
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    pub target_port_number: i32,
    pub extension_ref: Option<ExtensionReference>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionReference {
    pub group: Option<String>,
    pub kind: Option<String>,
    #[serde(default)]
    pub name: String,
    pub port_number: Option<i32>,
    pub failure_mode: Option<String>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct InferencePoolStatus {
    #[serde(default)]
    pub parent: Vec<PoolParentStatus>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct PoolParentStatus {
    pub parent_ref: PoolParentReference,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct PoolParentReference {
    pub group: Option<String>,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_ref_name_defaults_to_empty() {
        let spec = serde_json::from_value::<InferencePoolSpec>(serde_json::json!({
            "selector": { "app": "vllm" },
            "targetPortNumber": 8000,
            "extensionRef": { "portNumber": 9002 },
        }))
        .expect("pool spec must parse");
        let ext = spec.extension_ref.expect("extension ref must be set");
        assert_eq!(ext.name, "");
        assert_eq!(ext.port_number, Some(9002));
        assert_eq!(spec.target_port_number, 8000);
    }
}
