//! Intermediate representation produced from Kubernetes resources and
//! consumed by the proxy translator and status reports.
//!
//! IR values are immutable once built. Problems with user input are carried
//! as errors on the IR rather than failing the computation.

mod backend;
mod gateway;
mod policy;
mod route;

pub use self::{
    backend::{
        cluster_name, locality_priority, validate_pool, BackendData, BackendObjectIr, ClusterIr,
        Endpoint, EndpointsForBackend, ExtensionRef, InferencePoolIr, Locality, StaticHost,
    },
    gateway::{GatewayIr, ListenerIr, ListenerProtocol},
    policy::{
        BackendPolicyIr, HeaderModifierIr, ListenerPolicyIr, ListenerSettings, LoadBalancer,
        LocalRateLimitIr, PolicyAtt, PolicyIr, PolicyKind, PolicyTargetRef, PolicyWrapper,
        RetryIr, TlsMode, TrafficPolicyIr, UpstreamTls,
    },
    route::{
        BackendRefError, BackendRefIr, HeaderMatch, HttpRouteMatch, ParentRefIr, PathMatch,
        QueryParamMatch, RouteIr, RouteRuleIr,
    },
};
