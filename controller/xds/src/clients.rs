use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    hash::{Hash, Hasher},
    sync::Arc,
};
use trellis_controller_collections::{Collection, ResourceName};
use trellis_controller_core::{ir::Locality, proxy};

/// One connected proxy instance: its role plus the attributes that make its
/// configuration differ from other proxies of the same role.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniquelyConnectedClient {
    pub role: String,
    pub labels: BTreeMap<String, String>,
    pub locality: Locality,
    pub namespace: String,
    key: String,
}

/// Tracks connected clients. Clients with identical descriptors share one
/// entry, which is removed when the last handle is dropped.
#[derive(Clone, Debug)]
pub struct ConnectedClients {
    clients: Collection<UniquelyConnectedClient>,
    refs: Arc<Mutex<HashMap<String, usize>>>,
}

/// Keeps a client registered while held.
#[derive(Debug)]
pub struct ClientHandle {
    key: String,
    registry: ConnectedClients,
}

// === impl UniquelyConnectedClient ===

impl UniquelyConnectedClient {
    pub fn new(
        role: impl Into<String>,
        labels: BTreeMap<String, String>,
        locality: Locality,
        namespace: impl Into<String>,
    ) -> Self {
        let role = role.into();
        let namespace = namespace.into();
        let mut hasher = proxy::stable_hasher();
        labels.hash(&mut hasher);
        locality.hash(&mut hasher);
        namespace.hash(&mut hasher);
        let key = format!("{role}~{:016x}", hasher.finish());
        Self {
            role,
            labels,
            locality,
            namespace,
            key,
        }
    }

    /// The `role~hash` key identifying this client's configuration.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl ResourceName for UniquelyConnectedClient {
    fn resource_name(&self) -> String {
        self.key.clone()
    }
}

// === impl ConnectedClients ===

impl Default for ConnectedClients {
    fn default() -> Self {
        let clients = Collection::new("connected-clients");
        // Clients are only ever known through connections; there is no
        // initial listing to wait for.
        clients.mark_synced();
        Self {
            clients,
            refs: Default::default(),
        }
    }
}

impl ConnectedClients {
    pub fn collection(&self) -> &Collection<UniquelyConnectedClient> {
        &self.clients
    }

    pub fn connect(&self, client: UniquelyConnectedClient) -> ClientHandle {
        let key = client.key.clone();
        let mut refs = self.refs.lock();
        let count = refs.entry(key.clone()).or_default();
        *count += 1;
        if *count == 1 {
            tracing::debug!(client = %key, "Client connected");
            self.clients.insert(key.clone(), client);
        }
        ClientHandle {
            key,
            registry: self.clone(),
        }
    }

    fn release(&self, key: &str) {
        let mut refs = self.refs.lock();
        let Some(count) = refs.get_mut(key) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            refs.remove(key);
            tracing::debug!(client = %key, "Client disconnected");
            self.clients.remove(key);
        }
    }
}

// === impl ClientHandle ===

impl ClientHandle {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}
