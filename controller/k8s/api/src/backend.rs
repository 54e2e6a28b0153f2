use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;

/// A backend that is not a Kubernetes Service: a fixed set of hosts or a
/// dynamic forward proxy.
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
    group = "trellis.dev",
    version = "v1alpha1",
    kind = "Backend",
    status = "BackendStatus",
    namespaced,
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct BackendSpec {
    #[serde(rename = "type")]
    pub type_: BackendType,
    pub r#static: Option<StaticBackend>,
    pub dynamic_forward_proxy: Option<DynamicForwardProxyBackend>,
}

#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
pub enum BackendType {
    #[default]
    Static,
    DynamicForwardProxy,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct StaticBackend {
    pub hosts: Vec<Host>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub host: String,
    pub port: u16,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct DynamicForwardProxyBackend {
    pub enable_tls: Option<bool>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
