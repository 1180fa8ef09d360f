//! Applies configuration changes to a named resource pool.
//!
//! # Responsibilities
//! - Drain a source's change stream in order
//! - Decode each change into a snapshot and reconcile the pool
//! - Stop on shutdown, on stream end, or on a watch failure
//!
//! # Design Decisions
//! - Undecodable changes are logged and skipped; the pool keeps serving
//! - A watch failure ends the loop; live resources stay as they are

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::loader::{Format, Snapshot};
use crate::pool::builder::ResourceBuilder;
use crate::pool::named::{NamedResourcePool, ReconcileReport};
use crate::source::stream::ChangeStream;
use crate::source::types::{ChangeEvent, WatchError};

/// Why a reconciler stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcilerExit {
    Shutdown,
    /// The source closed its channel without an error.
    StreamClosed,
    /// The watch failed; no further changes will arrive.
    WatchFailed(WatchError),
}

/// Feeds changes from one source into one pool.
pub struct Reconciler<B: ResourceBuilder> {
    pool: Arc<NamedResourcePool<B>>,
    format: Format,
    prefix: String,
}

impl<B: ResourceBuilder> Reconciler<B> {
    pub fn new(pool: Arc<NamedResourcePool<B>>, format: Format, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            format,
            prefix: prefix.into(),
        }
    }

    /// Decode one change and reconcile the pool against it.
    ///
    /// Returns `None` when the change could not be decoded.
    pub async fn apply(&self, event: &ChangeEvent) -> Option<ReconcileReport> {
        let snapshot = match Snapshot::decode(&event.value, self.format, &self.prefix) {
            Ok(snapshot) => snapshot.with_revision(event.revision),
            Err(e) => {
                tracing::warn!(
                    revision = %event.revision,
                    error = %e,
                    "Skipping undecodable configuration change"
                );
                return None;
            }
        };

        let report = self.pool.reconcile(&snapshot).await;
        tracing::info!(
            revision = %event.revision,
            added = report.added.len(),
            rebuilt = report.rebuilt.len(),
            unchanged = report.unchanged.len(),
            released = report.released.len(),
            retained = report.retained.len(),
            failed = report.failures.len(),
            "Configuration change applied"
        );
        Some(report)
    }

    /// Consume `stream` until shutdown, stream end, or watch failure.
    pub async fn run(
        self,
        mut stream: ChangeStream,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> ReconcilerExit {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Reconciler stopping");
                    return ReconcilerExit::Shutdown;
                }
                item = stream.next() => match item {
                    Some(Ok(event)) => {
                        self.apply(&event).await;
                    }
                    Some(Err(e)) => {
                        tracing::error!(
                            error = %e,
                            resources = self.pool.len(),
                            "Configuration watch failed; keeping current resources"
                        );
                        return ReconcilerExit::WatchFailed(e);
                    }
                    None => {
                        tracing::info!("Change stream closed");
                        return ReconcilerExit::StreamClosed;
                    }
                },
            }
        }
    }

    /// Run on a background task.
    pub fn spawn(
        self,
        stream: ChangeStream,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<ReconcilerExit> {
        tokio::spawn(self.run(stream, shutdown_rx))
    }
}
