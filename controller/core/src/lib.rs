#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod conditions;
pub mod ir;
pub mod merge;
mod object_source;
pub mod proxy;


pub use self::object_source::ObjectSource;

pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";
pub const TRELLIS_API_GROUP: &str = "trellis.dev";
pub const INFERENCE_API_GROUP: &str = "inference.networking.x-k8s.io";

/// The group of core Kubernetes kinds, such as `Service`.
pub const CORE_GROUP: &str = "";

pub const DEFAULT_CONTROLLER_NAME: &str = "trellis.dev/gateway-controller";
