use crate::{context::DepKey, registration::Registration};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};
use tokio::sync::watch;

/// Identifies a collection or a secondary index within the process.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionId(u64);

/// A batch entry delivered to registered handlers.
#[derive(Debug)]
pub struct Event<T> {
    pub key: String,
    pub old: Option<Arc<T>>,
    pub new: Option<Arc<T>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    Add,
    Update,
    Delete,
}

/// A keyed set of immutable, shared values.
///
/// Cloning a `Collection` produces another handle to the same storage.
pub struct Collection<T> {
    pub(crate) inner: Arc<Inner<T>>,
}

/// A handle that does not keep the collection's storage alive, for use in
/// handlers registered on the collection itself.
pub struct WeakCollection<T> {
    inner: Weak<Inner<T>>,
}

pub(crate) type Handler<T> = Arc<dyn Fn(&[Event<T>]) + Send + Sync>;
pub(crate) type Extractor<T> = Arc<dyn Fn(&T) -> Vec<String> + Send + Sync>;

/// Receives notice that a collection some derivation read from has changed.
pub(crate) trait DependencyWatcher: Send + Sync {
    fn dependencies_changed(&self, source: CollectionId, touched: &HashSet<DepKey>);
}

pub(crate) trait SyncSource: Send + Sync {
    fn has_synced(&self) -> bool;

    /// Collects the sync flags of this collection and everything upstream.
    fn sync_receivers(&self, receivers: &mut Vec<watch::Receiver<bool>>);
}

pub(crate) enum Write<T> {
    Upsert(String, Arc<T>),
    Remove(String),
}

/// Events committed to storage but not yet delivered.
pub(crate) struct Pending<T> {
    inner: Arc<Inner<T>>,
    events: Vec<Event<T>>,
    extractors: Vec<(CollectionId, Extractor<T>)>,
}

pub(crate) struct Inner<T> {
    id: CollectionId,
    name: String,
    pub(crate) state: RwLock<State<T>>,
    /// Held from commit until every handler has seen the resulting events,
    /// so that handlers observe batches in commit order.
    delivery: ReentrantMutex<()>,
    subscribers: Mutex<Subscribers<T>>,
    synced: watch::Sender<bool>,
    upstream: Mutex<Vec<Weak<dyn SyncSource>>>,
}

pub(crate) struct State<T> {
    pub(crate) items: HashMap<String, Arc<T>>,
    pub(crate) indexes: HashMap<CollectionId, IndexState<T>>,
}

pub(crate) struct IndexState<T> {
    extract: Extractor<T>,
    pub(crate) entries: HashMap<String, HashSet<String>>,
}

struct Subscribers<T> {
    next_id: u64,
    handlers: Vec<(u64, Handler<T>)>,
    watchers: Vec<(CollectionId, Weak<dyn DependencyWatcher>)>,
}

// === impl CollectionId ===

impl CollectionId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

// === impl Event ===

impl<T> Event<T> {
    pub fn kind(&self) -> EventKind {
        match (&self.old, &self.new) {
            (None, Some(_)) => EventKind::Add,
            (Some(_), Some(_)) => EventKind::Update,
            _ => EventKind::Delete,
        }
    }

    /// The new value, or the removed value for deletes.
    pub fn latest(&self) -> Option<&Arc<T>> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            old: self.old.clone(),
            new: self.new.clone(),
        }
    }
}

// === impl Collection ===

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.inner.name)
            .field("len", &self.len())
            .finish()
    }
}

impl<T: Send + Sync + 'static> Collection<T> {
    pub fn new(name: impl Into<String>) -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                id: CollectionId::next(),
                name: name.into(),
                state: RwLock::new(State {
                    items: HashMap::new(),
                    indexes: HashMap::new(),
                }),
                delivery: ReentrantMutex::new(()),
                subscribers: Mutex::new(Subscribers {
                    next_id: 0,
                    handlers: Vec::new(),
                    watchers: Vec::new(),
                }),
                synced,
                upstream: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> CollectionId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn downgrade(&self) -> WeakCollection<T> {
        WeakCollection {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.inner.get(key)
    }

    /// Returns every item, ordered by key.
    pub fn list(&self) -> Vec<Arc<T>> {
        let state = self.inner.state.read();
        let mut items = state.items.iter().collect::<Vec<_>>();
        items.sort_by(|(a, _), (b, _)| a.cmp(b));
        items.into_iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys = self
            .inner
            .state
            .read()
            .items
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.state.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks this collection's own contents as complete. A collection is only
    /// reported as synced once everything upstream of it is synced as well.
    pub fn mark_synced(&self) {
        self.inner.synced.send_replace(true);
    }

    pub fn has_synced(&self) -> bool {
        self.inner.has_synced()
    }

    /// Completes once this collection and everything upstream of it has
    /// synced. Collections dropped while waiting are treated as synced.
    pub async fn wait_until_synced(&self) {
        let mut receivers = Vec::new();
        self.inner.sync_receivers(&mut receivers);
        for mut rx in receivers {
            let _ = rx.wait_for(|synced| *synced).await;
        }
    }

    /// Subscribes to batches of changes made after registration.
    pub fn register<F>(&self, handler: F) -> Registration
    where
        F: Fn(&[Event<T>]) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(handler), false)
    }

    /// Subscribes to changes, first replaying the current contents as adds.
    pub fn register_with_initial<F>(&self, handler: F) -> Registration
    where
        F: Fn(&[Event<T>]) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(handler), true)
    }

    fn subscribe(&self, handler: Handler<T>, initial: bool) -> Registration {
        // No batch may be delivered between registration and the replay.
        let _delivery = self.inner.delivery.lock();
        let id = {
            let mut subs = self.inner.subscribers.lock();
            let id = subs.next_id;
            subs.next_id += 1;
            subs.handlers.push((id, handler.clone()));
            id
        };

        if initial {
            let events = {
                let state = self.inner.state.read();
                let mut events = state
                    .items
                    .iter()
                    .map(|(key, item)| Event {
                        key: key.clone(),
                        old: None,
                        new: Some(item.clone()),
                    })
                    .collect::<Vec<_>>();
                events.sort_by(|a, b| a.key.cmp(&b.key));
                events
            };
            if !events.is_empty() {
                handler(&events);
            }
        }

        let inner = Arc::downgrade(&self.inner);
        Registration::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner
                    .subscribers
                    .lock()
                    .handlers
                    .retain(|(handler_id, _)| *handler_id != id);
            }
        })
    }

    pub(crate) fn add_upstream<U: Send + Sync + 'static>(&self, upstream: &Collection<U>) {
        let upstream: Weak<dyn SyncSource> = Arc::downgrade(&upstream.inner) as Weak<Inner<U>>;
        self.inner.upstream.lock().push(upstream);
    }

    /// Records that `owner` must be told about changes to this collection.
    pub(crate) fn watch(&self, owner: CollectionId, watcher: &Weak<dyn DependencyWatcher>) {
        let mut subs = self.inner.subscribers.lock();
        if subs.watchers.iter().any(|(id, _)| *id == owner) {
            return;
        }
        subs.watchers.retain(|(_, w)| w.strong_count() > 0);
        subs.watchers.push((owner, watcher.clone()));
    }

    pub(crate) fn add_index(&self, extract: Extractor<T>) -> CollectionId {
        let id = CollectionId::next();
        let mut state = self.inner.state.write();
        let mut entries = HashMap::<String, HashSet<String>>::new();
        for (key, item) in state.items.iter() {
            for index_key in extract(item.as_ref()) {
                entries.entry(index_key).or_default().insert(key.clone());
            }
        }
        state.indexes.insert(id, IndexState { extract, entries });
        id
    }
}

impl<T: PartialEq + Send + Sync + 'static> Collection<T> {
    pub fn insert(&self, key: impl Into<String>, value: T) {
        self.write(vec![Write::Upsert(key.into(), Arc::new(value))]);
    }

    pub fn remove(&self, key: &str) {
        self.write(vec![Write::Remove(key.to_string())]);
    }

    /// Replaces the collection's contents, removing keys that are absent
    /// from `items`.
    pub fn reset(&self, items: impl IntoIterator<Item = (String, T)>) {
        let mut writes = Vec::new();
        let mut keep = HashSet::new();
        for (key, value) in items {
            keep.insert(key.clone());
            writes.push(Write::Upsert(key, Arc::new(value)));
        }
        for key in self.keys() {
            if !keep.contains(&key) {
                writes.push(Write::Remove(key));
            }
        }
        self.write(writes);
    }

    /// Commits writes and delivers the resulting events before any later
    /// write to this collection is committed.
    pub(crate) fn write(&self, writes: Vec<Write<T>>) {
        self.write_with(move || writes);
    }

    /// Like [`Collection::write`], but computes the writes while holding this
    /// collection's delivery lock so they can reflect the latest inputs.
    pub(crate) fn write_with(&self, writes: impl FnOnce() -> Vec<Write<T>>) {
        let _delivery = self.inner.delivery.lock();
        self.commit(writes()).notify();
    }

    /// Applies writes to storage, returning the events they produced. Values
    /// equal to what is already stored produce no event.
    fn commit(&self, writes: Vec<Write<T>>) -> Pending<T> {
        let mut state = self.inner.state.write();
        let mut events = Vec::new();
        for write in writes {
            match write {
                Write::Upsert(key, new) => {
                    if let Some(old) = state.items.get(&key) {
                        if **old == *new {
                            continue;
                        }
                    }
                    let old = state.items.insert(key.clone(), new.clone());
                    if let Some(old) = old.as_ref() {
                        state.unindex(&key, old);
                    }
                    state.index(&key, &new);
                    events.push(Event {
                        key,
                        old,
                        new: Some(new),
                    });
                }
                Write::Remove(key) => {
                    if let Some(old) = state.items.remove(&key) {
                        state.unindex(&key, &old);
                        events.push(Event {
                            key,
                            old: Some(old),
                            new: None,
                        });
                    }
                }
            }
        }

        let extractors = if events.is_empty() {
            Vec::new()
        } else {
            state
                .indexes
                .iter()
                .map(|(id, index)| (*id, index.extract.clone()))
                .collect()
        };
        Pending {
            inner: self.inner.clone(),
            events,
            extractors,
        }
    }
}

// === impl Inner ===

impl<T> Inner<T> {
    pub(crate) fn get(&self, key: &str) -> Option<Arc<T>> {
        self.state.read().items.get(key).cloned()
    }
}

impl<T: Send + Sync> SyncSource for Inner<T> {
    fn has_synced(&self) -> bool {
        if !*self.synced.borrow() {
            return false;
        }
        let upstream = self.upstream.lock().clone();
        upstream
            .iter()
            .all(|up| up.upgrade().map_or(true, |up| up.has_synced()))
    }

    fn sync_receivers(&self, receivers: &mut Vec<watch::Receiver<bool>>) {
        receivers.push(self.synced.subscribe());
        let upstream = self.upstream.lock().clone();
        for up in upstream.iter().filter_map(Weak::upgrade) {
            up.sync_receivers(receivers);
        }
    }
}

// === impl WeakCollection ===

impl<T> Clone for WeakCollection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for WeakCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakCollection").finish_non_exhaustive()
    }
}

impl<T> WeakCollection<T> {
    pub fn upgrade(&self) -> Option<Collection<T>> {
        self.inner.upgrade().map(|inner| Collection { inner })
    }
}

// === impl State ===

impl<T> State<T> {
    fn index(&mut self, key: &str, item: &T) {
        for index in self.indexes.values_mut() {
            for index_key in (index.extract)(item) {
                index
                    .entries
                    .entry(index_key)
                    .or_default()
                    .insert(key.to_string());
            }
        }
    }

    fn unindex(&mut self, key: &str, item: &T) {
        for index in self.indexes.values_mut() {
            for index_key in (index.extract)(item) {
                if let Some(keys) = index.entries.get_mut(&index_key) {
                    keys.remove(key);
                    if keys.is_empty() {
                        index.entries.remove(&index_key);
                    }
                }
            }
        }
    }
}

// === impl Pending ===

impl<T: Send + Sync + 'static> Pending<T> {
    /// Delivers events to handlers and dependent derivations. Only the
    /// delivery lock is held while handlers run; callers must hold it from
    /// the commit that produced these events.
    pub(crate) fn notify(self) {
        if self.events.is_empty() {
            return;
        }

        let (handlers, watchers) = {
            let subs = self.inner.subscribers.lock();
            let handlers = subs
                .handlers
                .iter()
                .map(|(_, h)| h.clone())
                .collect::<Vec<_>>();
            let watchers = subs
                .watchers
                .iter()
                .map(|(_, w)| w.clone())
                .collect::<Vec<_>>();
            (handlers, watchers)
        };

        tracing::trace!(
            collection = %self.inner.name,
            events = self.events.len(),
            handlers = handlers.len(),
            "Notifying"
        );

        for handler in &handlers {
            handler(&self.events);
        }

        if watchers.is_empty() {
            return;
        }
        let touched = self.touched();
        for watcher in watchers {
            if let Some(watcher) = watcher.upgrade() {
                watcher.dependencies_changed(self.inner.id, &touched);
            }
        }
    }

    fn touched(&self) -> HashSet<DepKey> {
        let mut touched = HashSet::new();
        touched.insert(DepKey::All);
        for event in &self.events {
            touched.insert(DepKey::Key(event.key.clone()));
            for (id, extract) in &self.extractors {
                for item in event.old.iter().chain(event.new.iter()) {
                    for index_key in extract(item.as_ref()) {
                        touched.insert(DepKey::Index(*id, index_key));
                    }
                }
            }
        }
        touched
    }
}
