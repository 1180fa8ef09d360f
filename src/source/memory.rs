//! In-process revisioned key/value store.
//!
//! Implements the backend contract with the same semantics a remote store
//! offers: a global revision counter bumped on every write, watches that
//! replay history from a requested revision, and prefix matching on keys.
//! Fault injection hooks let callers drop watch streams or make the store
//! unreachable.
//!
//! History is kept until compacted, either explicitly with `compact` or by
//! a cap set with `with_history_limit`. Watches asked to replay from before
//! the oldest retained revision fail with `BackendError::Compacted`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::source::backend::{BackendError, BackendEvent, BackendWatch, EventKind, GetResponse, KvBackend};
use crate::source::types::Revision;

const LIVE_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
enum Signal {
    Event(BackendEvent),
    Disconnect(String),
}

#[derive(Debug, Default)]
struct Store {
    revision: u64,
    values: HashMap<String, Vec<u8>>,
    history: Vec<BackendEvent>,
    /// Oldest revision a watch may still replay from.
    oldest_retained: u64,
    history_limit: Option<usize>,
    unavailable: bool,
}

impl Store {
    fn record(&mut self, event: BackendEvent) {
        self.history.push(event);
        if let Some(limit) = self.history_limit {
            if self.history.len() > limit {
                let excess = self.history.len() - limit;
                self.history.drain(..excess);
                self.oldest_retained = self.history.first().map_or(self.revision + 1, |e| e.revision.0);
            }
        }
    }
}

/// A revisioned in-memory store usable as a [`KvBackend`].
#[derive(Debug)]
pub struct MemoryBackend {
    name: String,
    store: Mutex<Store>,
    live: broadcast::Sender<Signal>,
    closed: AtomicBool,
}

impl MemoryBackend {
    /// Create an empty store.
    pub fn new(name: impl Into<String>) -> Self {
        let (live, _) = broadcast::channel(LIVE_BUFFER);
        Self {
            name: name.into(),
            store: Mutex::new(Store::default()),
            live,
            closed: AtomicBool::new(false),
        }
    }

    /// Keep at most `limit` history entries, dropping the oldest first.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.store
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .history_limit = Some(limit);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write a value, returning the new store revision.
    pub fn put(&self, key: &str, value: impl Into<Vec<u8>>) -> Revision {
        let value = value.into();
        let mut store = self.lock();
        store.revision += 1;
        let event = BackendEvent {
            key: key.to_string(),
            value: value.clone(),
            revision: Revision(store.revision),
            kind: EventKind::Put,
        };
        store.values.insert(key.to_string(), value);
        store.record(event.clone());
        let _ = self.live.send(Signal::Event(event));
        Revision(store.revision)
    }

    /// Delete a key. Returns the new revision, or `None` if it did not exist.
    pub fn delete(&self, key: &str) -> Option<Revision> {
        let mut store = self.lock();
        store.values.remove(key)?;
        store.revision += 1;
        let event = BackendEvent {
            key: key.to_string(),
            value: Vec::new(),
            revision: Revision(store.revision),
            kind: EventKind::Delete,
        };
        store.record(event.clone());
        let _ = self.live.send(Signal::Event(event));
        Some(Revision(store.revision))
    }

    /// Current store revision.
    pub fn revision(&self) -> Revision {
        Revision(self.lock().revision)
    }

    /// Drop history below `revision`. Later watches from an older revision
    /// fail with `BackendError::Compacted`.
    pub fn compact(&self, revision: Revision) {
        let mut store = self.lock();
        let floor = revision.0.min(store.revision + 1);
        if floor <= store.oldest_retained {
            return;
        }
        store.history.retain(|e| e.revision.0 >= floor);
        store.oldest_retained = floor;
        tracing::debug!(store = %self.name, oldest = floor, "History compacted");
    }

    /// Number of history entries still available for replay.
    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }

    /// Break every open watch stream with the given reason.
    pub fn disconnect_watchers(&self, reason: &str) {
        let _ = self.live.send(Signal::Disconnect(reason.to_string()));
    }

    /// Make `get` and `watch` fail (or succeed again).
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    /// Number of open watch streams.
    pub fn watcher_count(&self) -> usize {
        self.live.receiver_count()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    fn endpoint(&self) -> String {
        format!("memory://{}", self.name)
    }

    async fn get(&self, key: &str) -> Result<GetResponse, BackendError> {
        let store = self.lock();
        if store.unavailable {
            return Err(BackendError::Unavailable(self.endpoint()));
        }
        Ok(GetResponse {
            value: store.values.get(key).cloned(),
            revision: Revision(store.revision),
        })
    }

    async fn watch(&self, key: &str, from: Revision) -> Result<BackendWatch, BackendError> {
        let (rx, replay, floor) = {
            let store = self.lock();
            if store.unavailable {
                return Err(BackendError::Unavailable(self.endpoint()));
            }
            if from.0 < store.oldest_retained {
                return Err(BackendError::Compacted {
                    requested: from,
                    oldest: Revision(store.oldest_retained),
                });
            }
            // Subscribe while holding the lock so no write falls between
            // the history replay and the live feed.
            let rx = self.live.subscribe();
            let replay: Vec<BackendEvent> = store
                .history
                .iter()
                .filter(|e| e.revision >= from && e.key.starts_with(key))
                .cloned()
                .collect();
            (rx, replay, Revision(store.revision))
        };

        let prefix = key.to_string();
        let replay = stream::iter(replay.into_iter().map(Ok));
        let live = stream::unfold(Some(rx), move |state| {
            let prefix = prefix.clone();
            async move {
                let mut rx = state?;
                loop {
                    match rx.recv().await {
                        Ok(Signal::Event(event)) => {
                            if event.revision > floor && event.key.starts_with(&prefix) {
                                return Some((Ok(event), Some(rx)));
                            }
                        }
                        Ok(Signal::Disconnect(reason)) => {
                            return Some((Err(BackendError::Disconnected(reason)), None));
                        }
                        Err(RecvError::Lagged(missed)) => {
                            let reason = format!("watcher fell behind by {} events", missed);
                            return Some((Err(BackendError::Disconnected(reason)), None));
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(replay.chain(live).boxed())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}
