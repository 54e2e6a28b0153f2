//! Versioned resource sets distributed to proxies.
//!
//! A set's version is the XOR of its members' content hashes, so adding,
//! removing or replacing one member updates the version without rehashing
//! the rest, and equal member sets always produce equal versions.

use std::{
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
    sync::{Arc, OnceLock},
};
use trellis_controller_collections::ResourceName;
use trellis_controller_core::proxy::{
    self, ClusterResource, EndpointResource, ListenerResource, RouteConfigResource,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    Listener,
    RouteConfig,
    Cluster,
    Endpoint,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resource {
    Listener(Arc<ListenerResource>),
    RouteConfig(Arc<RouteConfigResource>),
    Cluster(Arc<ClusterResource>),
    Endpoint(Arc<EndpointResource>),
}

/// One resource type's members, keyed by name.
#[derive(Clone, Debug, Default)]
pub struct VersionedResources {
    version: u64,
    items: BTreeMap<String, (u64, Resource)>,
}

/// The resources served to one client.
#[derive(Debug, Default)]
pub struct Snapshot {
    resources: BTreeMap<ResourceType, VersionedResources>,
    versions: OnceLock<BTreeMap<ResourceType, BTreeMap<String, String>>>,
}

/// A composed snapshot along with the client it was built for.
#[derive(Clone, Debug, PartialEq)]
pub struct XdsSnapWrapper {
    pub proxy_key: String,
    pub role: String,
    pub snapshot: Arc<Snapshot>,
    pub errors: Vec<String>,
}

/// Hashes a resource's name and serialized content.
///
/// # Panics
///
/// Proxy descriptors contain only strings, integers and maps with string
/// keys, so encoding them cannot fail.
pub fn content_hash<T: serde::Serialize>(name: &str, resource: &T) -> u64 {
    let encoded =
        serde_json::to_vec(resource).expect("proxy resources must serialize deterministically");
    let mut hasher = proxy::stable_hasher();
    name.hash(&mut hasher);
    encoded.hash(&mut hasher);
    hasher.finish()
}

// === impl ResourceType ===

impl ResourceType {
    pub const ALL: [Self; 4] = [
        Self::Listener,
        Self::RouteConfig,
        Self::Cluster,
        Self::Endpoint,
    ];

    pub fn type_url(&self) -> &'static str {
        match self {
            Self::Listener => "type.googleapis.com/envoy.config.listener.v3.Listener",
            Self::RouteConfig => "type.googleapis.com/envoy.config.route.v3.RouteConfiguration",
            Self::Cluster => "type.googleapis.com/envoy.config.cluster.v3.Cluster",
            Self::Endpoint => {
                "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment"
            }
        }
    }

    /// The label value under which resource counts are recorded.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listener => "listener",
            Self::RouteConfig => "route",
            Self::Cluster => "cluster",
            Self::Endpoint => "endpoint",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Resource ===

impl Resource {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Self::Listener(_) => ResourceType::Listener,
            Self::RouteConfig(_) => ResourceType::RouteConfig,
            Self::Cluster(_) => ResourceType::Cluster,
            Self::Endpoint(_) => ResourceType::Endpoint,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Listener(r) => &r.name,
            Self::RouteConfig(r) => &r.name,
            Self::Cluster(r) => &r.name,
            Self::Endpoint(r) => &r.cluster_name,
        }
    }

    fn content_hash(&self) -> u64 {
        match self {
            Self::Listener(r) => content_hash(&r.name, r.as_ref()),
            Self::RouteConfig(r) => content_hash(&r.name, r.as_ref()),
            Self::Cluster(r) => content_hash(&r.name, r.as_ref()),
            Self::Endpoint(r) => content_hash(&r.cluster_name, r.as_ref()),
        }
    }
}

// === impl VersionedResources ===

impl VersionedResources {
    /// Adds or replaces a member, returning the one it replaced.
    pub fn insert(&mut self, resource: Resource) -> Option<Resource> {
        let hash = resource.content_hash();
        self.version ^= hash;
        let previous = self
            .items
            .insert(resource.name().to_string(), (hash, resource));
        let (old_hash, old) = previous?;
        self.version ^= old_hash;
        Some(old)
    }

    pub fn remove(&mut self, name: &str) -> Option<Resource> {
        let (hash, resource) = self.items.remove(name)?;
        self.version ^= hash;
        Some(resource)
    }

    pub fn version(&self) -> String {
        format!("{:016x}", self.version)
    }

    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.items.get(name).map(|(_, r)| r)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> + '_ {
        self.items.values().map(|(_, r)| r)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<Resource> for VersionedResources {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        let mut resources = Self::default();
        for resource in iter {
            resources.insert(resource);
        }
        resources
    }
}

impl PartialEq for VersionedResources {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(&other.items)
                .all(|((a, (ha, _)), (b, (hb, _)))| a == b && ha == hb)
    }
}

// === impl Snapshot ===

impl Snapshot {
    pub fn new(resources: impl IntoIterator<Item = Resource>) -> Self {
        let mut by_type = BTreeMap::<ResourceType, VersionedResources>::new();
        for resource in resources {
            by_type
                .entry(resource.resource_type())
                .or_default()
                .insert(resource);
        }
        Self {
            resources: by_type,
            versions: OnceLock::new(),
        }
    }

    pub fn get_resources(&self, type_: ResourceType) -> Option<&VersionedResources> {
        self.resources.get(&type_)
    }

    /// The combined version of a resource type. Empty types have the version
    /// of the empty set.
    pub fn get_version(&self, type_: ResourceType) -> String {
        self.resources
            .get(&type_)
            .map(VersionedResources::version)
            .unwrap_or_else(|| VersionedResources::default().version())
    }

    /// Per-resource versions by type, computed on first use.
    pub fn version_map(&self) -> &BTreeMap<ResourceType, BTreeMap<String, String>> {
        self.versions.get_or_init(|| {
            self.resources
                .iter()
                .map(|(type_, resources)| {
                    let versions = resources
                        .items
                        .iter()
                        .map(|(name, (hash, _))| (name.clone(), format!("{hash:016x}")))
                        .collect();
                    (*type_, versions)
                })
                .collect()
        })
    }

    /// The number of resources of a type.
    pub fn count(&self, type_: ResourceType) -> usize {
        self.resources.get(&type_).map_or(0, VersionedResources::len)
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.resources == other.resources
    }
}

// === impl XdsSnapWrapper ===

impl ResourceName for XdsSnapWrapper {
    fn resource_name(&self) -> String {
        self.proxy_key.clone()
    }
}
