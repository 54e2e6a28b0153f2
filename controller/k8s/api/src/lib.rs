#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod backend;
pub mod duration;
pub mod inference;
pub mod policy;

pub use self::{
    backend::{Backend, BackendSpec, BackendStatus},
    gateway::{
        gateways::{Gateway, GatewaySpec, GatewayStatus},
        httproutes::{
            HTTPRoute as HttpRoute, HTTPRouteSpec as HttpRouteSpec,
            HTTPRouteStatus as HttpRouteStatus,
        },
        referencegrants::{ReferenceGrant, ReferenceGrantSpec},
    },
    inference::{InferencePool, InferencePoolSpec, InferencePoolStatus},
    policy::{
        BackendConfigPolicy, ListenerPolicy, LocalPolicyTargetReference, ParentReference,
        PolicyStatus, TrafficPolicy,
    },
};
/// Gateway API resources. Rule names are only part of the experimental
/// HTTPRoute schema, so the experimental channel is used throughout.
pub use gateway_api::apis::experimental as gateway;
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{Pod, Service},
    },
    apimachinery,
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    NamespaceResourceScope,
};
pub use kube::api::{ObjectMeta, ResourceExt};

/// A namespaced resource with a status subresource this controller writes.
pub trait HasStatus:
    kube::Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + std::fmt::Debug
    + serde::de::DeserializeOwned
    + serde::Serialize
    + Send
    + Sync
    + 'static
{
    type Status: Clone
        + std::fmt::Debug
        + PartialEq
        + serde::de::DeserializeOwned
        + serde::Serialize
        + Send
        + Sync
        + 'static;

    /// The kind as written in manifests.
    const KIND: &'static str;

    fn status(&self) -> Option<&Self::Status>;
}

macro_rules! has_status {
    ($($kind:literal: $resource:ty => $status:ty),+ $(,)?) => {
        $(
            impl HasStatus for $resource {
                type Status = $status;
                const KIND: &'static str = $kind;

                fn status(&self) -> Option<&Self::Status> {
                    self.status.as_ref()
                }
            }
        )+
    };
}

has_status! {
    "Gateway": Gateway => GatewayStatus,
    "HTTPRoute": HttpRoute => HttpRouteStatus,
    "Backend": Backend => BackendStatus,
    "InferencePool": InferencePool => InferencePoolStatus,
    "TrafficPolicy": TrafficPolicy => PolicyStatus,
    "BackendConfigPolicy": BackendConfigPolicy => PolicyStatus,
    "ListenerPolicy": ListenerPolicy => PolicyStatus,
}
