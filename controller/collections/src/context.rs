use crate::{
    collection::{Collection, CollectionId, DependencyWatcher},
    index::Index,
};
use ahash::AHashSet as HashSet;
use std::sync::{Arc, Weak};

/// The scope of a dependency edge within one collection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum DepKey {
    All,
    Key(String),
    Index(CollectionId, String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Dependency {
    pub(crate) collection: CollectionId,
    pub(crate) key: DepKey,
}

/// Passed to a derivation's transform. Reads made through the context are
/// recorded so the item is recomputed when what it read changes.
pub struct HandlerContext<'a> {
    owner: CollectionId,
    watcher: &'a Weak<dyn DependencyWatcher>,
    dependencies: HashSet<Dependency>,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(owner: CollectionId, watcher: &'a Weak<dyn DependencyWatcher>) -> Self {
        Self {
            owner,
            watcher,
            dependencies: HashSet::new(),
        }
    }

    /// Reads every item of `collection`; any change to it triggers a
    /// recompute.
    pub fn fetch<T: Send + Sync + 'static>(&mut self, collection: &Collection<T>) -> Vec<Arc<T>> {
        self.depend(collection, DepKey::All);
        collection.list()
    }

    pub fn fetch_one<T: Send + Sync + 'static>(
        &mut self,
        collection: &Collection<T>,
        key: &str,
    ) -> Option<Arc<T>> {
        self.depend(collection, DepKey::Key(key.to_string()));
        collection.get(key)
    }

    pub fn fetch_indexed<T: Send + Sync + 'static>(
        &mut self,
        index: &Index<T>,
        key: &str,
    ) -> Vec<Arc<T>> {
        self.depend(
            index.collection(),
            DepKey::Index(index.id(), key.to_string()),
        );
        index.lookup(key)
    }

    fn depend<T: Send + Sync + 'static>(&mut self, collection: &Collection<T>, key: DepKey) {
        // The watch is in place before the read so no change can slip between.
        collection.watch(self.owner, self.watcher);
        self.dependencies.insert(Dependency {
            collection: collection.id(),
            key,
        });
    }

    pub(crate) fn into_dependencies(self) -> HashSet<Dependency> {
        self.dependencies
    }
}
