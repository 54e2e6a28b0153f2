use crate::snapshot::{ResourceType, Snapshot};
use parking_lot::Mutex;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{family::Family, gauge::Gauge},
    registry::Registry,
};
use std::sync::Arc;
use trellis_controller_core::proxy;

/// Records the number of resources of each type served to each connected
/// client. Clients of one gateway that differ in their labels or locality
/// get distinct series.
#[derive(Clone, Debug)]
pub enum SnapshotMetrics {
    Prometheus(Arc<ResourceGauges>),
    Noop,
}

#[derive(Debug)]
pub struct ResourceGauges {
    resources: Family<ResourceLabels, Gauge>,
    lock: Mutex<()>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ResourceLabels {
    client: String,
    namespace: String,
    name: String,
    resource: &'static str,
}

// === impl SnapshotMetrics ===

impl SnapshotMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let resources = Family::<ResourceLabels, Gauge>::default();
        reg.register(
            "snapshot_resources",
            "The number of resources of each type in the latest snapshot served to a client",
            resources.clone(),
        );
        Self::Prometheus(Arc::new(ResourceGauges {
            resources,
            lock: Mutex::new(()),
        }))
    }

    pub(crate) fn record(&self, client: &str, snapshot: &Snapshot) {
        if let Self::Prometheus(gauges) = self {
            gauges.set(client, |type_| snapshot.count(type_));
        }
    }

    /// Drops the series of a client that is no longer connected.
    pub(crate) fn clear(&self, client: &str) {
        if let Self::Prometheus(gauges) = self {
            gauges.remove(client);
        }
    }

    /// The recorded count for a client key and resource type. Cleared
    /// clients read as zero.
    pub fn get(&self, client: &str, type_: ResourceType) -> Option<i64> {
        match self {
            Self::Prometheus(gauges) => {
                Some(gauges.resources.get_or_create(&labels(client, type_)).get())
            }
            Self::Noop => None,
        }
    }
}

// === impl ResourceGauges ===

impl ResourceGauges {
    fn set(&self, client: &str, count: impl Fn(ResourceType) -> usize) {
        let _guard = self.lock.lock();
        for type_ in ResourceType::ALL {
            let n = i64::try_from(count(type_)).unwrap_or(i64::MAX);
            self.resources.get_or_create(&labels(client, type_)).set(n);
        }
    }

    fn remove(&self, client: &str) {
        let _guard = self.lock.lock();
        for type_ in ResourceType::ALL {
            self.resources.remove(&labels(client, type_));
        }
    }
}

/// Client keys are `role~hash`; the gateway's namespace and name come from
/// the role.
fn labels(client: &str, type_: ResourceType) -> ResourceLabels {
    let role = client.rsplit_once('~').map_or(client, |(role, _)| role);
    let (namespace, name) = match proxy::split_role(role) {
        Some((_, namespace, name)) => (namespace.to_string(), name.to_string()),
        None => (String::new(), role.to_string()),
    };
    ResourceLabels {
        client: client.to_string(),
        namespace,
        name,
        resource: type_.as_str(),
    }
}
