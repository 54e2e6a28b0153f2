#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! An incremental, dependency-tracking collection engine.
//!
//! Leaf collections are written directly (typically from Kubernetes watches).
//! Derived collections are computed from an input collection by a transform
//! that may read other collections through a [`HandlerContext`]; every read
//! records a dependency edge so that only the affected items are recomputed
//! when an input changes. Writes that do not change a value are suppressed,
//! so unchanged results never propagate downstream.

mod collection;
mod context;
mod derived;
mod index;
mod join;
mod registration;


pub use self::{
    collection::{Collection, CollectionId, Event, EventKind, WeakCollection},
    context::HandlerContext,
    index::Index,
    registration::Registration,
};

/// Provides the stable key under which a derived item is stored.
pub trait ResourceName {
    fn resource_name(&self) -> String;
}

/// Builds the `namespace/name` key used by collections of namespaced objects.
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}
