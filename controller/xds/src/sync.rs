use crate::{cache::SnapshotCache, metrics::SnapshotMetrics, snapshot::XdsSnapWrapper};
use std::sync::Arc;
use trellis_controller_collections::{Collection, Registration};

/// Pushes every composed snapshot into `cache`, replaying the snapshots that
/// already exist before following changes.
///
/// Each event is resolved against the collection's current contents, so the
/// cache always converges on what is stored even if a batch describes a
/// value that has since been replaced.
pub fn sync_to_cache(
    snapshots: &Collection<XdsSnapWrapper>,
    cache: Arc<dyn SnapshotCache>,
    metrics: SnapshotMetrics,
) -> Registration {
    let current = snapshots.downgrade();
    snapshots.register_with_initial(move |events| {
        let Some(current) = current.upgrade() else {
            return;
        };
        for event in events {
            match current.get(&event.key) {
                None => {
                    tracing::debug!(proxy = %event.key, "Clearing snapshot");
                    cache.clear_snapshot(&event.key);
                    metrics.clear(&event.key);
                }
                Some(wrapper) => {
                    if !wrapper.errors.is_empty() {
                        tracing::debug!(
                            proxy = %event.key,
                            errors = ?wrapper.errors,
                            "Snapshot generated with translation errors"
                        );
                    }
                    tracing::debug!(proxy = %event.key, "Updating snapshot");
                    cache.set_snapshot(&event.key, wrapper.snapshot.clone());
                    metrics.record(&event.key, &wrapper.snapshot);
                }
            }
        }
    })
}
