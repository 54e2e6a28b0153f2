use crate::collection::{Collection, CollectionId};
use std::{fmt, sync::Arc};

/// A secondary index over a collection, mapping derived keys to the items
/// that produce them.
pub struct Index<T> {
    id: CollectionId,
    name: Arc<str>,
    collection: Collection<T>,
}

// === impl Collection ===

impl<T: Send + Sync + 'static> Collection<T> {
    /// Creates an index maintained on every write to this collection. The
    /// extractor runs while the collection is locked and must not read other
    /// collections.
    pub fn index<F>(&self, name: impl Into<String>, extract: F) -> Index<T>
    where
        F: Fn(&T) -> Vec<String> + Send + Sync + 'static,
    {
        let id = self.add_index(Arc::new(extract));
        Index {
            id,
            name: name.into().into(),
            collection: self.clone(),
        }
    }
}

// === impl Index ===

impl<T> Clone for Index<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            collection: self.collection.clone(),
        }
    }
}

impl<T> fmt::Debug for Index<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index").field("name", &self.name).finish()
    }
}

impl<T: Send + Sync + 'static> Index<T> {
    pub fn id(&self) -> CollectionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self) -> &Collection<T> {
        &self.collection
    }

    /// Returns the items indexed under `key`, ordered by item key.
    pub fn lookup(&self, key: &str) -> Vec<Arc<T>> {
        let state = self.collection.inner.state.read();
        let Some(keys) = state
            .indexes
            .get(&self.id)
            .and_then(|index| index.entries.get(key))
        else {
            return Vec::new();
        };
        let mut keys = keys.iter().collect::<Vec<_>>();
        keys.sort();
        keys.into_iter()
            .filter_map(|k| state.items.get(k).cloned())
            .collect()
    }

    /// Returns every index key that currently has at least one item.
    pub fn keys(&self) -> Vec<String> {
        let state = self.collection.inner.state.read();
        let mut keys = state
            .indexes
            .get(&self.id)
            .map(|index| index.entries.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}
