use crate::snapshot::Snapshot;
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;

/// Serves composed snapshots to connected proxies.
pub trait SnapshotCache: Send + Sync + 'static {
    fn set_snapshot(&self, key: &str, snapshot: Arc<Snapshot>);

    fn clear_snapshot(&self, key: &str);

    fn get_snapshot(&self, key: &str) -> Option<Arc<Snapshot>>;
}

/// Holds the latest snapshot for each proxy key. Servers subscribe to a key
/// and are notified whenever its snapshot changes.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    snapshots: RwLock<HashMap<String, watch::Sender<Option<Arc<Snapshot>>>>>,
}

impl InMemoryCache {
    pub fn subscribe(&self, key: &str) -> watch::Receiver<Option<Arc<Snapshot>>> {
        if let Some(tx) = self.snapshots.read().get(key) {
            return tx.subscribe();
        }
        self.snapshots
            .write()
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    pub fn len(&self) -> usize {
        self.snapshots
            .read()
            .values()
            .filter(|tx| tx.borrow().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotCache for InMemoryCache {
    fn set_snapshot(&self, key: &str, snapshot: Arc<Snapshot>) {
        let mut snapshots = self.snapshots.write();
        match snapshots.get(key) {
            Some(tx) => {
                tx.send_replace(Some(snapshot));
            }
            None => {
                snapshots.insert(key.to_string(), watch::channel(Some(snapshot)).0);
            }
        }
    }

    fn clear_snapshot(&self, key: &str) {
        let mut snapshots = self.snapshots.write();
        let Some(tx) = snapshots.get(key) else {
            return;
        };
        if tx.receiver_count() == 0 {
            snapshots.remove(key);
        } else {
            tx.send_replace(None);
        }
    }

    fn get_snapshot(&self, key: &str) -> Option<Arc<Snapshot>> {
        self.snapshots.read().get(key)?.borrow().clone()
    }
}
