use crate::{
    client::{StatusClient, WriteError},
    metrics::ControllerMetrics,
    reconcile::ReconcilableStatus,
    retry::RetryPolicy,
    DesiredStatus,
};
use ahash::AHashMap as HashMap;
use chrono::Utc;
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::MissedTickBehavior,
};
use trellis_controller_collections::{Collection, Event, Registration};
use trellis_controller_k8s_api::{HasStatus, Time};

/// Where a resource's status write stands.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WriteState {
    /// Not yet written, or the last write failed.
    Unwritten,
    /// Waiting for the worker.
    Queued,
    /// The live status matches the desired status.
    Written,
    /// Another writer modified the resource. The write is retried on the
    /// next resync.
    Conflict,
}

/// Writes the desired statuses of one resource kind to the API server.
///
/// While attached, every change to the desired collection enqueues the
/// changed key. A single worker re-reads the desired and live status for each
/// key and replaces the live status only when the two differ.
pub struct StatusSyncer<K: HasStatus> {
    kind: &'static str,
    controller_name: Arc<str>,
    desired: Collection<DesiredStatus<K::Status>>,
    client: Arc<dyn StatusClient<K>>,
    retry: RetryPolicy,
    metrics: ControllerMetrics,
    shared: Arc<Shared>,
}

struct Shared {
    states: Mutex<HashMap<String, WriteState>>,
    tx: mpsc::Sender<Queued>,
    rx: Mutex<Option<mpsc::Receiver<Queued>>>,
    /// Incremented on detach so that keys queued while attached are
    /// discarded.
    epoch: AtomicU64,
    registration: Mutex<Option<Registration>>,
}

#[derive(Debug)]
struct Queued {
    epoch: u64,
    key: String,
}

enum Outcome {
    Skipped,
    Written,
    Cleared,
}

// === impl StatusSyncer ===

impl<K: HasStatus> Clone for StatusSyncer<K> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            controller_name: self.controller_name.clone(),
            desired: self.desired.clone(),
            client: self.client.clone(),
            retry: self.retry,
            metrics: self.metrics.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<K: HasStatus> std::fmt::Debug for StatusSyncer<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusSyncer")
            .field("kind", &self.kind)
            .field("desired", &self.desired)
            .field("attached", &self.shared.registration.lock().is_some())
            .finish()
    }
}

impl<K> StatusSyncer<K>
where
    K: HasStatus,
    K::Status: ReconcilableStatus,
{
    pub fn new(
        controller_name: impl Into<Arc<str>>,
        desired: Collection<DesiredStatus<K::Status>>,
        client: Arc<dyn StatusClient<K>>,
        retry: RetryPolicy,
        metrics: ControllerMetrics,
        queue_size: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        Self {
            kind: K::KIND,
            controller_name: controller_name.into(),
            desired,
            client,
            retry,
            metrics,
            shared: Arc::new(Shared {
                states: Mutex::new(HashMap::default()),
                tx,
                rx: Mutex::new(Some(rx)),
                epoch: AtomicU64::new(0),
                registration: Mutex::new(None),
            }),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn is_attached(&self) -> bool {
        self.shared.registration.lock().is_some()
    }

    pub fn state(&self, key: &str) -> Option<WriteState> {
        self.shared.states.lock().get(key).copied()
    }

    /// Starts queueing writes, beginning with every status currently desired.
    pub fn attach(&self) {
        let mut registration = self.shared.registration.lock();
        if registration.is_some() {
            return;
        }
        tracing::info!(kind = self.kind, "Attaching status writer");

        let epoch = self.shared.epoch.load(Ordering::Acquire);
        let shared = self.shared.clone();
        let kind = self.kind;
        *registration = Some(self.desired.register_with_initial(
            move |events: &[Event<DesiredStatus<K::Status>>]| {
                for event in events {
                    shared.enqueue(kind, epoch, &event.key);
                }
            },
        ));
    }

    /// Stops queueing writes. Writes already in flight complete; keys that
    /// are queued are dropped.
    pub fn detach(&self) {
        let registration = {
            let mut registration = self.shared.registration.lock();
            let Some(registration) = registration.take() else {
                return;
            };
            self.shared.epoch.fetch_add(1, Ordering::AcqRel);
            registration
        };
        tracing::info!(kind = self.kind, "Detaching status writer");
        registration.unregister();

        let mut states = self.shared.states.lock();
        for state in states.values_mut() {
            if *state == WriteState::Queued {
                *state = WriteState::Unwritten;
            }
        }
    }

    /// Processes queued keys until the process exits. Keys whose last write
    /// did not land are re-queued every `resync` interval while attached.
    pub async fn run(self, resync: Duration) {
        let Some(mut rx) = self.shared.rx.lock().take() else {
            tracing::warn!(kind = self.kind, "Status writer is already running");
            return;
        };

        let mut resync = tokio::time::interval(resync);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                queued = rx.recv() => match queued {
                    Some(queued) => self.handle(queued).await,
                    None => return,
                },
                _ = resync.tick() => self.resync(),
            }
        }
    }

    /// Processes every key currently queued.
    #[cfg(test)]
    pub(crate) async fn drain(&self) -> usize {
        let mut rx = self.shared.rx.lock().take().expect("writer must not be running");
        let mut processed = 0;
        while let Ok(queued) = rx.try_recv() {
            self.handle(queued).await;
            processed += 1;
        }
        *self.shared.rx.lock() = Some(rx);
        processed
    }

    /// Re-queues keys whose last write did not land.
    pub(crate) fn resync(&self) {
        if !self.is_attached() {
            return;
        }
        let epoch = self.shared.epoch.load(Ordering::Acquire);
        let pending = self
            .shared
            .states
            .lock()
            .iter()
            .filter(|(_, state)| matches!(state, WriteState::Unwritten | WriteState::Conflict))
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();
        if !pending.is_empty() {
            tracing::debug!(kind = self.kind, keys = pending.len(), "Resyncing");
        }
        for key in pending {
            self.shared.enqueue(self.kind, epoch, &key);
        }
    }

    async fn handle(&self, Queued { epoch, key }: Queued) {
        if epoch != self.shared.epoch.load(Ordering::Acquire) {
            tracing::trace!(kind = self.kind, %key, "Discarding write queued before detach");
            return;
        }
        // Changes that arrive while the write is in flight queue it again.
        self.shared
            .states
            .lock()
            .insert(key.clone(), WriteState::Unwritten);
        self.process(&key).await;
    }

    async fn process(&self, key: &str) {
        let Some((namespace, name)) = key.split_once('/') else {
            tracing::warn!(kind = self.kind, %key, "Ignoring malformed key");
            self.shared.states.lock().remove(key);
            return;
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.write(namespace, name, key).await {
                Ok(Outcome::Skipped) => {
                    tracing::trace!(kind = self.kind, %namespace, %name, "Status is current");
                    self.metrics.skipped(self.kind);
                    self.finish(key, Some(WriteState::Written));
                }
                Ok(Outcome::Written) => {
                    tracing::debug!(kind = self.kind, %namespace, %name, "Wrote status");
                    self.metrics.succeeded(self.kind);
                    self.finish(key, Some(WriteState::Written));
                }
                Ok(Outcome::Cleared) => {
                    tracing::debug!(kind = self.kind, %namespace, %name, "Cleared status");
                    self.metrics.succeeded(self.kind);
                    self.finish(key, None);
                }
                Err(WriteError::Conflict) => {
                    tracing::debug!(kind = self.kind, %namespace, %name, "Status write conflicted");
                    self.metrics.conflicted(self.kind);
                    self.finish(key, Some(WriteState::Conflict));
                }
                Err(WriteError::NotFound) => {
                    tracing::debug!(kind = self.kind, %namespace, %name, "Resource not found");
                    self.finish(key, None);
                }
                Err(WriteError::Other(error)) => match self.retry.backoff(attempt) {
                    Some(delay) => {
                        tracing::debug!(
                            kind = self.kind,
                            %namespace,
                            %name,
                            attempt,
                            ?delay,
                            %error,
                            "Retrying status write",
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    None => {
                        tracing::error!(
                            kind = self.kind,
                            %namespace,
                            %name,
                            attempts = attempt,
                            %error,
                            "Failed to write status",
                        );
                        self.metrics.failed(self.kind);
                        self.finish(key, Some(WriteState::Unwritten));
                    }
                },
            }
            return;
        }
    }

    async fn write(&self, namespace: &str, name: &str, key: &str) -> Result<Outcome, WriteError> {
        let desired = self.desired.get(key);
        let live = self.client.get(namespace, name).await?;
        let current = live.status();

        let now = Time(Utc::now());
        let status = desired
            .as_ref()
            .map(|d| d.status.clone())
            .unwrap_or_default()
            .reconcile_with(current, &self.controller_name, now);
        let unchanged = match current {
            Some(current) => current.semantically_eq(&status),
            None => K::Status::default().semantically_eq(&status),
        };
        if unchanged {
            return Ok(if desired.is_some() {
                Outcome::Skipped
            } else {
                Outcome::Cleared
            });
        }

        self.client.replace_status(&live, status).await?;
        Ok(if desired.is_some() {
            Outcome::Written
        } else {
            Outcome::Cleared
        })
    }

    /// Records the result of a write unless the key was queued again while
    /// the write was in flight. `None` forgets the key.
    fn finish(&self, key: &str, state: Option<WriteState>) {
        let mut states = self.shared.states.lock();
        if states.get(key) == Some(&WriteState::Queued) {
            return;
        }
        match state {
            Some(state) => {
                states.insert(key.to_string(), state);
            }
            None => {
                states.remove(key);
            }
        }
    }
}

// === impl Shared ===

impl Shared {
    fn enqueue(&self, kind: &'static str, epoch: u64, key: &str) {
        let mut states = self.states.lock();
        if states.get(key) == Some(&WriteState::Queued) {
            return;
        }
        let queued = Queued {
            epoch,
            key: key.to_string(),
        };
        match self.tx.try_send(queued) {
            Ok(()) => {
                states.insert(key.to_string(), WriteState::Queued);
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(kind, %key, "Status queue is full; deferring to resync");
                states.insert(key.to_string(), WriteState::Unwritten);
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
