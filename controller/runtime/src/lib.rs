#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use trellis_controller_collections as collections;
pub use trellis_controller_core as core;
pub use trellis_controller_k8s_api as k8s;
pub use trellis_controller_k8s_index as index;
pub use trellis_controller_k8s_status as status;
pub use trellis_controller_xds as xds;

mod args;
mod lease;

pub use self::{args::Args, xds::XdsServer};
