use crate::{
    collection::{Collection, CollectionId, DependencyWatcher, Inner, Write},
    context::{DepKey, Dependency, HandlerContext},
    ResourceName,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

type Transform<I, O> = Box<dyn Fn(&mut HandlerContext<'_>, &I) -> Vec<O> + Send + Sync>;

/// Maintains an output collection from an input collection and whatever the
/// transform reads along the way.
///
/// The input's handler owns the derivation; dependency watchers only hold
/// weak references to it.
struct Derived<I, O> {
    input: Weak<Inner<I>>,
    output: Collection<O>,
    transform: Transform<I, O>,
    state: Mutex<DerivedState>,
    this: Weak<Self>,
}

#[derive(Default)]
struct DerivedState {
    /// Output keys produced by each input key.
    outputs: HashMap<String, HashSet<String>>,
    /// Dependencies read while computing each input key.
    dependencies: HashMap<String, HashSet<Dependency>>,
    /// Reverse of `dependencies`.
    dependents: HashMap<Dependency, HashSet<String>>,
}

// === impl Collection ===

impl<I: Send + Sync + 'static> Collection<I> {
    /// Derives a collection holding at most one output per input item.
    pub fn derive_one<O, F>(&self, name: impl Into<String>, transform: F) -> Collection<O>
    where
        O: ResourceName + PartialEq + Send + Sync + 'static,
        F: Fn(&mut HandlerContext<'_>, &I) -> Option<O> + Send + Sync + 'static,
    {
        self.derive_many(name, move |ctx, item| {
            transform(ctx, item).into_iter().collect()
        })
    }

    /// Derives a collection holding any number of outputs per input item.
    pub fn derive_many<O, F>(&self, name: impl Into<String>, transform: F) -> Collection<O>
    where
        O: ResourceName + PartialEq + Send + Sync + 'static,
        F: Fn(&mut HandlerContext<'_>, &I) -> Vec<O> + Send + Sync + 'static,
    {
        let output = Collection::new(name);
        output.add_upstream(self);

        let derived = Arc::new_cyclic(|this| Derived {
            input: Arc::downgrade(&self.inner),
            output: output.clone(),
            transform: Box::new(transform),
            state: Mutex::default(),
            this: this.clone(),
        });
        let _registration = self.register_with_initial(move |events| {
            derived.recompute(events.iter().map(|e| e.key.clone()).collect());
        });

        output.mark_synced();
        output
    }
}

// === impl Derived ===

impl<I, O> Derived<I, O>
where
    I: Send + Sync + 'static,
    O: ResourceName + PartialEq + Send + Sync + 'static,
{
    fn recompute(&self, mut keys: Vec<String>) {
        let Some(input) = self.input.upgrade() else {
            return;
        };
        keys.sort();
        keys.dedup();

        let watcher: Weak<dyn DependencyWatcher> = self.this.clone();
        // Concurrent recomputes of this derivation are ordered by the
        // output's delivery lock, so each reads the input as it stands when
        // its turn comes and downstream handlers see results in that order.
        self.output.write_with(|| {
            let mut state = self.state.lock();
            let mut writes = Vec::new();
            for key in keys {
                let (outputs, dependencies) = match input.get(&key) {
                    Some(item) => {
                        let mut ctx = HandlerContext::new(self.output.id(), &watcher);
                        let outputs = (self.transform)(&mut ctx, item.as_ref());
                        (outputs, ctx.into_dependencies())
                    }
                    None => (Vec::new(), HashSet::new()),
                };
                state.set_dependencies(&key, dependencies);

                let mut produced = HashSet::with_capacity(outputs.len());
                for output in outputs {
                    let name = output.resource_name();
                    produced.insert(name.clone());
                    writes.push(Write::Upsert(name, Arc::new(output)));
                }
                let previous = if produced.is_empty() {
                    state.outputs.remove(&key)
                } else {
                    state.outputs.insert(key.clone(), produced.clone())
                };
                for stale in previous.iter().flatten() {
                    if !produced.contains(stale) {
                        writes.push(Write::Remove(stale.clone()));
                    }
                }
            }
            writes
        });
    }
}

impl<I, O> DependencyWatcher for Derived<I, O>
where
    I: Send + Sync + 'static,
    O: ResourceName + PartialEq + Send + Sync + 'static,
{
    fn dependencies_changed(&self, source: CollectionId, touched: &HashSet<DepKey>) {
        let keys = {
            let state = self.state.lock();
            touched
                .iter()
                .filter_map(|key| {
                    state.dependents.get(&Dependency {
                        collection: source,
                        key: key.clone(),
                    })
                })
                .flatten()
                .cloned()
                .collect::<HashSet<_>>()
        };
        if keys.is_empty() {
            return;
        }
        tracing::trace!(
            collection = %self.output.name(),
            items = keys.len(),
            "Dependencies changed"
        );
        self.recompute(keys.into_iter().collect());
    }
}

// === impl DerivedState ===

impl DerivedState {
    fn set_dependencies(&mut self, key: &str, dependencies: HashSet<Dependency>) {
        if let Some(previous) = self.dependencies.remove(key) {
            for dep in previous {
                if let Some(keys) = self.dependents.get_mut(&dep) {
                    keys.remove(key);
                    if keys.is_empty() {
                        self.dependents.remove(&dep);
                    }
                }
            }
        }
        if dependencies.is_empty() {
            return;
        }
        for dep in &dependencies {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.dependencies.insert(key.to_string(), dependencies);
    }
}
