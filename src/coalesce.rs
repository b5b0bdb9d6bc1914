//! Request coalescing.
//!
//! Concurrent requests for one [`CanonicalId`] share a single extraction and
//! transcode. The first requester to create the cache entry spawns the
//! operation; everyone else subscribes to its outcome, a [`Shared`] future
//! that every subscriber awaits independently.
//!
//! A spawned operation is never cancelled: requesters that go away only drop
//! their own subscription, and the entry still reaches Ready or Failed.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use packsound_common::{CanonicalId, MediaError, SourceRef};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error};

use crate::cache::{CacheEntry, CacheStore, EntryState, SlotStatus};
use crate::transcode::pipeline::Pipeline;

type Outcome = Result<CacheEntry, MediaError>;
type SharedOutcome = Shared<BoxFuture<'static, Outcome>>;

/// One extraction+transcode in progress.
struct InFlight {
    subscribers: AtomicUsize,
    outcome: SharedOutcome,
}

struct Inner {
    store: CacheStore,
    pipeline: Pipeline,
    in_flight: Mutex<HashMap<CanonicalId, Arc<InFlight>>>,
}

/// Result of the synchronous join step.
enum Joined {
    Done(Outcome),
    Waiting {
        outcome: SharedOutcome,
        status: watch::Receiver<SlotStatus>,
    },
}

/// Deduplicates resolution of identical sources.
#[derive(Clone)]
pub struct Coalescer {
    inner: Arc<Inner>,
}

impl Coalescer {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: pipeline.store().clone(),
                pipeline,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    /// Resolve `source` to a terminal entry: Ready, or the recorded failure.
    pub async fn resolve(&self, source: &SourceRef) -> Outcome {
        match self.join(source) {
            Joined::Done(outcome) => outcome,
            Joined::Waiting { outcome, .. } => outcome.await,
        }
    }

    /// Resolve `source` only until its bytes can be streamed (Writing or
    /// Ready).
    pub async fn acquire(&self, source: &SourceRef) -> Outcome {
        let (mut outcome, mut status) = match self.join(source) {
            Joined::Done(outcome) => return outcome,
            Joined::Waiting { outcome, status } => (outcome, status),
        };

        loop {
            let state = status.borrow_and_update().state.clone();
            match state {
                EntryState::Pending => {}
                EntryState::Writing | EntryState::Ready => {
                    return self.inner.store.get(&source.id).map_err(|e| {
                        e.as_media().cloned().unwrap_or(MediaError::NotFound)
                    });
                }
                EntryState::Failed(e) => return Err(e),
            }

            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() {
                        // Slot replaced or dropped; the outcome is authoritative.
                        return outcome.await;
                    }
                }
                result = &mut outcome => return result,
            }
        }
    }

    /// Number of operations currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Critical section: decide between a cached answer, joining an
    /// operation, or starting one. Never awaits.
    fn join(&self, source: &SourceRef) -> Joined {
        let store = &self.inner.store;
        let id = &source.id;
        let mut in_flight = self.inner.in_flight.lock();

        if let Some(op) = in_flight.get(id) {
            let n = op.subscribers.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(id = %id, subscribers = n, "joined in-flight operation");
            return match store.subscribe(id) {
                Ok(status) => Joined::Waiting {
                    outcome: op.outcome.clone(),
                    status,
                },
                Err(_) => Joined::Done(Err(MediaError::NotFound)),
            };
        }

        // Hashed ids can be served from cache but never resolved from scratch.
        if !source.is_resolvable() {
            return match store.get(id) {
                Ok(entry) => self.settle(entry),
                Err(_) => Joined::Done(Err(MediaError::NotFound)),
            };
        }

        let (mut entry, mut created) = store.lookup_or_create(id);
        if entry.failure_expired(Instant::now()) {
            match store.recreate_if_failed(id, Instant::now()) {
                Some(fresh) => {
                    debug!(id = %id, "negative cache expired, retrying");
                    entry = fresh;
                    created = true;
                }
                None => match store.get(id) {
                    Ok(current) => entry = current,
                    Err(_) => return Joined::Done(Err(MediaError::NotFound)),
                },
            }
        }

        // A Pending entry with no operation registered is ours to drive,
        // whether or not this call created it.
        if entry.state != EntryState::Pending {
            return self.settle(entry);
        }
        if !created {
            debug!(id = %id, "taking over unowned pending entry");
        }

        let status = match store.subscribe(id) {
            Ok(status) => status,
            Err(_) => return Joined::Done(Err(MediaError::NotFound)),
        };

        let outcome = self.spawn(source.clone());
        in_flight.insert(
            id.clone(),
            Arc::new(InFlight {
                subscribers: AtomicUsize::new(1),
                outcome: outcome.clone(),
            }),
        );
        debug!(id = %id, "started operation");
        Joined::Waiting { outcome, status }
    }

    /// Answer for an entry no operation of ours is driving.
    fn settle(&self, entry: CacheEntry) -> Joined {
        match entry.state {
            EntryState::Ready => Joined::Done(Ok(entry)),
            EntryState::Failed(e) => Joined::Done(Err(e)),
            EntryState::Pending | EntryState::Writing => {
                // Produced outside the coalescer; wait on the slot itself.
                let store = self.inner.store.clone();
                match store.subscribe(&entry.id) {
                    Ok(status) => {
                        let id = entry.id.clone();
                        let waiter = status.clone();
                        let outcome = async move { wait_terminal(&store, &id, waiter).await }
                            .boxed()
                            .shared();
                        Joined::Waiting { outcome, status }
                    }
                    Err(_) => Joined::Done(Err(MediaError::NotFound)),
                }
            }
        }
    }

    /// Spawn the operation for `source` on the runtime.
    ///
    /// Called with the in-flight lock held; the task's own removal blocks on
    /// that lock, so registration always happens first.
    fn spawn(&self, source: SourceRef) -> SharedOutcome {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let produced = AssertUnwindSafe(this.inner.pipeline.produce(&source))
                .catch_unwind()
                .await;
            let outcome = match produced {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(id = %source.id, "operation panicked");
                    let _ = this
                        .inner
                        .store
                        .mark_failed(&source.id, MediaError::TranscodeFailed);
                    Err(MediaError::TranscodeFailed)
                }
            };
            this.inner.in_flight.lock().remove(&source.id);
            outcome
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                error!(error = %e, "operation task failed");
                Err(MediaError::TranscodeFailed)
            })
        }
        .boxed()
        .shared()
    }
}

/// Wait until the slot for `id` is Ready or Failed.
async fn wait_terminal(
    store: &CacheStore,
    id: &CanonicalId,
    mut status: watch::Receiver<SlotStatus>,
) -> Outcome {
    loop {
        let state = status.borrow_and_update().state.clone();
        match state {
            EntryState::Ready => {
                return store
                    .get(id)
                    .map_err(|e| e.as_media().cloned().unwrap_or(MediaError::NotFound))
            }
            EntryState::Failed(e) => return Err(e),
            EntryState::Pending | EntryState::Writing => {}
        }
        if status.changed().await.is_err() {
            return Err(MediaError::NotFound);
        }
    }
}
