//! Consumer side of a source's change channel.
//!
//! The watch loop publishes into a bounded broadcast channel. When the
//! consumer falls behind, the oldest buffered values are overwritten and the
//! consumer is told how many it missed; only the newest full value matters,
//! so that is logged and skipped. Values whose revision is not newer than
//! the last one handed out are discarded here as well.

use tokio::sync::broadcast::{self, error::RecvError};

use crate::observability::metrics;
use crate::source::types::{ChangeEvent, Revision, WatchError};

/// Item carried on the change channel. An `Err` is always the last item.
pub type WatchItem = Result<ChangeEvent, WatchError>;

/// Ordered stream of configuration changes from one source.
#[derive(Debug)]
pub struct ChangeStream {
    rx: broadcast::Receiver<WatchItem>,
    last_seen: Option<Revision>,
    finished: bool,
}

impl ChangeStream {
    /// Wrap a receiver; events at or below `baseline` are treated as seen.
    pub(crate) fn new(rx: broadcast::Receiver<WatchItem>, baseline: Option<Revision>) -> Self {
        Self {
            rx,
            last_seen: baseline,
            finished: false,
        }
    }

    /// Wait for the next change.
    ///
    /// Returns `Some(Err(_))` once when the watch fails, and `None` after
    /// that or when the source shut down cleanly.
    pub async fn next(&mut self) -> Option<WatchItem> {
        if self.finished {
            return None;
        }

        loop {
            match self.rx.recv().await {
                Ok(Ok(event)) => {
                    if let Some(last) = self.last_seen {
                        if event.revision <= last {
                            tracing::debug!(
                                revision = %event.revision,
                                last_seen = %last,
                                "Discarding stale configuration change"
                            );
                            metrics::record_stream_stale();
                            continue;
                        }
                    }
                    self.last_seen = Some(event.revision);
                    return Some(Ok(event));
                }
                Ok(Err(err)) => {
                    self.finished = true;
                    return Some(Err(err));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        skipped,
                        "Change consumer fell behind; oldest buffered values were dropped"
                    );
                    metrics::record_stream_dropped(skipped);
                }
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    /// Revision of the last event returned (or the baseline).
    pub fn last_seen(&self) -> Option<Revision> {
        self.last_seen
    }

    /// Whether the stream has ended.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(rev: u64) -> WatchItem {
        Ok(ChangeEvent {
            value: format!("rev = {}", rev).into_bytes(),
            revision: Revision(rev),
        })
    }

    #[tokio::test]
    async fn test_stale_revisions_discarded() {
        let (tx, rx) = broadcast::channel(16);
        let mut stream = ChangeStream::new(rx, Some(Revision(2)));

        for rev in [2, 5, 3, 5, 6] {
            tx.send(event(rev)).unwrap();
        }
        drop(tx);

        let mut seen = Vec::new();
        while let Some(item) = stream.next().await {
            seen.push(item.unwrap().revision.0);
        }
        assert_eq!(seen, vec![5, 6]);
        assert_eq!(stream.last_seen(), Some(Revision(6)));
    }

    #[tokio::test]
    async fn test_lagging_consumer_keeps_newest() {
        let (tx, rx) = broadcast::channel(4);
        let mut stream = ChangeStream::new(rx, None);

        for rev in 1..=8 {
            tx.send(event(rev)).unwrap();
        }

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.revision, Revision(5));
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.revision, Revision(6));
    }

    #[tokio::test]
    async fn test_error_terminates_stream() {
        let (tx, rx) = broadcast::channel(4);
        let mut stream = ChangeStream::new(rx, None);

        tx.send(event(1)).unwrap();
        tx.send(Err(WatchError::Disconnected("reset by peer".into()))).unwrap();
        tx.send(event(2)).unwrap();

        assert!(stream.next().await.unwrap().is_ok());
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err, WatchError::Disconnected("reset by peer".into()));
        assert!(stream.is_finished());
        assert!(stream.next().await.is_none());
    }
}
