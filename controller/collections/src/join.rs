use crate::collection::{Collection, Write};
use std::sync::Arc;

impl<T: PartialEq + Send + Sync + 'static> Collection<T> {
    /// Merges several collections of the same type into one. Keys must not
    /// collide across sources.
    pub fn join(name: impl Into<String>, sources: &[Collection<T>]) -> Self {
        let output = Collection::new(name);
        for source in sources {
            output.add_upstream(source);
            let out = output.clone();
            let source_inner = Arc::downgrade(&source.inner);
            let _registration = source.register_with_initial(move |events| {
                let Some(source) = source_inner.upgrade() else {
                    return;
                };
                out.write_with(|| {
                    events
                        .iter()
                        .map(|event| match source.get(&event.key) {
                            Some(item) => Write::Upsert(event.key.clone(), item),
                            None => Write::Remove(event.key.clone()),
                        })
                        .collect()
                });
            });
        }
        output.mark_synced();
        output
    }
}
