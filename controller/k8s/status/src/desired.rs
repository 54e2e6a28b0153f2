use trellis_controller_collections::{object_key, ResourceName};
use trellis_controller_core::ObjectSource;

/// The status this controller wants an object to have.
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredStatus<S> {
    pub namespace: String,
    pub name: String,
    pub status: S,
}

impl<S> DesiredStatus<S> {
    pub fn new(source: &ObjectSource, status: S) -> Self {
        Self {
            namespace: source.namespace.clone(),
            name: source.name.clone(),
            status,
        }
    }

    pub fn key(&self) -> String {
        object_key(&self.namespace, &self.name)
    }
}

impl<S> ResourceName for DesiredStatus<S> {
    fn resource_name(&self) -> String {
        self.key()
    }
}
