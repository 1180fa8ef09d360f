//! Remote key/value source with an optional background watch loop.
//!
//! # State Machine
//! ```text
//! Connecting ──initial get──▶ Loaded ──watch enabled──▶ Watching
//!      │                        │                          │
//!      └── error: not built     └──────── close ───────────┴──▶ Closed
//!                                    backend failure ──────────▶ Closed
//! ```
//!
//! `Closed` means no watch loop is running. After a watch failure `read()`
//! still reaches the backend; only `close()` shuts reads off.
//!
//! # Watch Loop
//! - Subscribes from baseline revision + 1
//! - Skips events for other keys (backend watches may be prefix-based)
//! - Skips redelivered revisions and undecodable payloads
//! - Publishes `ChangeEvent`s on a bounded drop-oldest channel
//! - On backend failure either fails closed with a `WatchError`, or, with a
//!   `ReconnectPolicy`, re-subscribes from the last published revision + 1

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::loader::Format;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::resilience::ReconnectPolicy;
use crate::source::backend::{BackendConfig, BackendEvent, EventKind, KvBackend};
use crate::source::descriptor::Descriptor;
use crate::source::stream::{ChangeStream, WatchItem};
use crate::source::types::{ChangeEvent, Revision, SourceError, SourceResult, SourceState, WatchError};
use crate::source::DataSource;

/// Out-of-band options for constructing a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOptions {
    /// Start a watch loop after the initial load.
    pub enabled: bool,

    /// Capacity of the change channel (drop-oldest when full).
    pub channel_capacity: usize,

    /// Deadline for the initial load.
    pub connect_timeout: Duration,

    /// Re-subscribe policy; `None` fails closed on the first disconnect.
    pub reconnect: Option<ReconnectPolicy>,
}

impl WatchOptions {
    /// Watch enabled, all other settings default.
    pub fn watching() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            channel_capacity: 16,
            connect_timeout: Duration::from_secs(5),
            reconnect: None,
        }
    }
}

/// A source that reads one key from a remote store and can follow it.
pub struct RemoteWatchedSource {
    backend: Arc<dyn KvBackend>,
    key: String,
    format: Format,
    baseline: Revision,
    state: Arc<AtomicU8>,
    watch_enabled: bool,
    stream: Mutex<Option<ChangeStream>>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Shutdown,
}

impl RemoteWatchedSource {
    /// Perform the initial load and, if enabled, start the watch loop.
    pub async fn connect(
        backend: Arc<dyn KvBackend>,
        key: impl Into<String>,
        format: Format,
        options: WatchOptions,
    ) -> SourceResult<Self> {
        let key = key.into();
        let endpoint = backend.endpoint();
        let state = Arc::new(AtomicU8::new(SourceState::Connecting as u8));
        metrics::record_source_state("remote", SourceState::Connecting);

        let initial = tokio::time::timeout(options.connect_timeout, backend.get(&key))
            .await
            .map_err(|_| SourceError::ConnectTimeout {
                endpoint: endpoint.clone(),
                timeout_ms: options.connect_timeout.as_millis() as u64,
            })??;

        let baseline = initial.revision;
        set_state(&state, SourceState::Loaded);
        tracing::info!(
            endpoint = %endpoint,
            key = %key,
            revision = %baseline,
            present = initial.value.is_some(),
            "Remote configuration loaded"
        );

        let shutdown = Shutdown::new();
        let mut stream = None;
        let mut task = None;

        if options.enabled {
            let (tx, rx) = broadcast::channel(options.channel_capacity.max(1));
            stream = Some(ChangeStream::new(rx, Some(baseline)));

            let watch_loop = WatchLoop {
                backend: backend.clone(),
                key: key.clone(),
                format,
                tx,
                state: state.clone(),
                reconnect: options.reconnect.clone(),
                last_published: baseline,
            };
            let shutdown_rx = shutdown.subscribe();
            set_state(&state, SourceState::Watching);
            task = Some(tokio::spawn(watch_loop.run(shutdown_rx)));
        }

        Ok(Self {
            backend,
            key,
            format,
            baseline,
            state,
            watch_enabled: options.enabled,
            stream: Mutex::new(stream),
            task: Mutex::new(task),
            shutdown,
        })
    }

    pub fn state(&self) -> SourceState {
        SourceState::from(self.state.load(Ordering::Acquire))
    }

    /// Revision of the initial load.
    pub fn baseline(&self) -> Revision {
        self.baseline
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for RemoteWatchedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteWatchedSource")
            .field("endpoint", &self.backend.endpoint())
            .field("key", &self.key)
            .field("format", &self.format)
            .field("baseline", &self.baseline)
            .field("state", &self.state())
            .finish()
    }
}

#[async_trait]
impl DataSource for RemoteWatchedSource {
    fn kind(&self) -> &'static str {
        "remote"
    }

    fn format(&self) -> Format {
        self.format
    }

    async fn read(&self) -> SourceResult<Vec<u8>> {
        if self.shutdown.is_triggered() {
            return Err(SourceError::Closed);
        }
        let resp = self.backend.get(&self.key).await?;
        Ok(resp.value.unwrap_or_default())
    }

    fn supports_watch(&self) -> bool {
        true
    }

    fn watch(&self) -> SourceResult<ChangeStream> {
        if !self.watch_enabled {
            return Err(SourceError::WatchDisabled);
        }
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SourceError::WatchAlreadyTaken)
    }

    async fn close(&self) {
        self.shutdown.trigger();
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = task {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Watch task ended abnormally");
            }
        }
        self.backend.close().await;
        set_state(&self.state, SourceState::Closed);
        tracing::info!(key = %self.key, "Remote source closed");
    }
}

impl Drop for RemoteWatchedSource {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

fn set_state(state: &AtomicU8, next: SourceState) {
    state.store(next as u8, Ordering::Release);
    metrics::record_source_state("remote", next);
}

/// Background task following one key.
struct WatchLoop {
    backend: Arc<dyn KvBackend>,
    key: String,
    format: Format,
    tx: broadcast::Sender<WatchItem>,
    state: Arc<AtomicU8>,
    reconnect: Option<ReconnectPolicy>,
    last_published: Revision,
}

impl WatchLoop {
    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let key = self.key.clone();
        tracing::info!(key = %key, from = %self.last_published.next(), "Watch loop starting");

        let failure = tokio::select! {
            failure = self.follow() => failure,
            _ = shutdown.recv() => {
                tracing::info!(key = %key, "Watch loop received shutdown signal, exiting");
                None
            }
        };

        // Closed before the error goes out so consumers never see a stale state.
        set_state(&self.state, SourceState::Closed);
        if let Some(err) = failure {
            tracing::error!(key = %key, error = %err, "Configuration watch failed; serving last applied value");
            metrics::record_watch_failure();
            let _ = self.tx.send(Err(err));
        }
    }

    /// Follow the key until a terminal failure. `None` means every consumer
    /// went away.
    async fn follow(&mut self) -> Option<WatchError> {
        let mut attempts = 0u32;

        loop {
            let from = self.last_published.next();
            let failure = match self.backend.watch(&self.key, from).await {
                Ok(mut events) => loop {
                    match events.next().await {
                        Some(Ok(event)) => {
                            attempts = 0;
                            if !self.handle(event) {
                                tracing::info!(key = %self.key, "No change consumers left, stopping watch");
                                return None;
                            }
                        }
                        Some(Err(e)) => break WatchError::Disconnected(e.to_string()),
                        None => break WatchError::Disconnected("watch stream ended".to_string()),
                    }
                },
                Err(e) => WatchError::Subscribe(e.to_string()),
            };

            let Some(policy) = &self.reconnect else {
                return Some(failure);
            };
            if attempts >= policy.max_attempts {
                return Some(WatchError::ReconnectExhausted {
                    attempts,
                    last_error: failure.to_string(),
                });
            }
            attempts += 1;
            let delay = policy.delay(attempts);
            tracing::warn!(
                key = %self.key,
                attempt = attempts,
                delay = ?delay,
                resume_from = %self.last_published.next(),
                error = %failure,
                "Watch interrupted, reconnecting"
            );
            metrics::record_watch_reconnect();
            tokio::time::sleep(delay).await;
        }
    }

    /// Process one backend event. Returns false when nobody is listening.
    fn handle(&mut self, event: BackendEvent) -> bool {
        if event.key != self.key {
            tracing::trace!(key = %event.key, "Ignoring change for unrelated key");
            metrics::record_watch_event("foreign_key");
            return true;
        }
        if event.revision <= self.last_published {
            tracing::debug!(revision = %event.revision, last = %self.last_published, "Ignoring redelivered revision");
            metrics::record_watch_event("duplicate");
            return true;
        }
        self.last_published = event.revision;

        if event.kind == EventKind::Delete {
            tracing::warn!(key = %self.key, revision = %event.revision, "Configuration key deleted; keeping last value");
            metrics::record_watch_event("deleted");
            return true;
        }

        if let Err(e) = self.format.parse(&event.value) {
            tracing::warn!(
                key = %self.key,
                revision = %event.revision,
                error = %e,
                "Skipping undecodable configuration update"
            );
            metrics::record_watch_event("undecodable");
            return true;
        }

        let change = ChangeEvent {
            value: event.value,
            revision: event.revision,
        };
        tracing::debug!(key = %self.key, revision = %change.revision, "Publishing configuration change");
        metrics::record_watch_event("published");
        self.tx.send(Ok(change)).is_ok()
    }
}

/// Future returned by registry factories.
pub type SourceFuture = BoxFuture<'static, SourceResult<Option<Arc<dyn DataSource>>>>;

/// Adapt a backend client constructor into a registry factory.
///
/// The descriptor's `host:port`, `username`, `password` and `key` become a
/// [`BackendConfig`]; a descriptor without an endpoint or key resolves to
/// no source. Client construction and the initial load report errors.
pub fn factory<C>(connector: C) -> impl Fn(Descriptor, WatchOptions) -> SourceFuture + Send + Sync + 'static
where
    C: Fn(&BackendConfig) -> SourceResult<Arc<dyn KvBackend>> + Send + Sync + 'static,
{
    let connector = Arc::new(connector);
    move |descriptor: Descriptor, options: WatchOptions| {
        let connector = connector.clone();
        Box::pin(async move {
            let Some(config) = BackendConfig::from_descriptor(&descriptor) else {
                tracing::warn!(
                    descriptor = %descriptor,
                    "Descriptor needs host:port and a key parameter; no remote source"
                );
                return Ok(None);
            };
            let backend = (*connector)(&config)?;
            let source =
                RemoteWatchedSource::connect(backend, config.key.clone(), Format::from_descriptor(&descriptor), options)
                    .await?;
            Ok(Some(Arc::new(source) as Arc<dyn DataSource>))
        }) as SourceFuture
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use crate::source::backend::{BackendError, BackendWatch, GetResponse};
    use crate::source::memory::MemoryBackend;

    const KEY: &str = "app/config";

    fn put_event(rev: u64) -> BackendEvent {
        BackendEvent {
            key: KEY.to_string(),
            value: format!("a = {}", rev).into_bytes(),
            revision: Revision(rev),
            kind: EventKind::Put,
        }
    }

    /// Replays a fixed list of revisions, then stays open.
    #[derive(Debug)]
    struct ScriptedBackend {
        revisions: Vec<u64>,
    }

    #[async_trait]
    impl KvBackend for ScriptedBackend {
        fn endpoint(&self) -> String {
            "scripted://test".to_string()
        }

        async fn get(&self, _key: &str) -> Result<GetResponse, BackendError> {
            Ok(GetResponse {
                value: Some(b"a = 0".to_vec()),
                revision: Revision(1),
            })
        }

        async fn watch(&self, _key: &str, _from: Revision) -> Result<BackendWatch, BackendError> {
            let events: Vec<Result<BackendEvent, BackendError>> = self.revisions.iter().map(|&rev| Ok(put_event(rev))).collect();
            Ok(stream::iter(events).chain(stream::pending()).boxed())
        }
    }

    /// Never answers a read.
    #[derive(Debug)]
    struct StalledBackend;

    #[async_trait]
    impl KvBackend for StalledBackend {
        fn endpoint(&self) -> String {
            "stalled://test".to_string()
        }

        async fn get(&self, _key: &str) -> Result<GetResponse, BackendError> {
            std::future::pending().await
        }

        async fn watch(&self, _key: &str, _from: Revision) -> Result<BackendWatch, BackendError> {
            Err(BackendError::Unavailable(self.endpoint()))
        }
    }

    async fn wait_for_watcher(backend: &MemoryBackend) {
        for _ in 0..200 {
            if backend.watcher_count() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("watch loop never subscribed");
    }

    #[tokio::test]
    async fn test_initial_load_sets_baseline() {
        let backend = Arc::new(MemoryBackend::new("t"));
        backend.put(KEY, "[database.a]\ndsn = \"x://a\"");
        backend.put("other", "x = 1");

        let source = RemoteWatchedSource::connect(backend.clone(), KEY, Format::Toml, WatchOptions::default())
            .await
            .unwrap();
        assert_eq!(source.baseline(), Revision(2));
        assert_eq!(source.state(), SourceState::Loaded);
        assert!(source.read().await.unwrap().starts_with(b"[database.a]"));
        assert!(matches!(source.watch(), Err(SourceError::WatchDisabled)));
    }

    #[tokio::test]
    async fn test_connect_failure_is_error() {
        let backend = Arc::new(MemoryBackend::new("down"));
        backend.set_available(false);
        let result = RemoteWatchedSource::connect(backend, KEY, Format::Toml, WatchOptions::watching()).await;
        assert!(matches!(result, Err(SourceError::Backend(_))));
    }

    #[tokio::test]
    async fn test_single_watch_per_instance() {
        let backend = Arc::new(MemoryBackend::new("t"));
        let source = RemoteWatchedSource::connect(backend, KEY, Format::Toml, WatchOptions::watching())
            .await
            .unwrap();
        assert_eq!(source.state(), SourceState::Watching);
        assert!(source.watch().is_ok());
        assert!(matches!(source.watch(), Err(SourceError::WatchAlreadyTaken)));
    }

    #[tokio::test]
    async fn test_malformed_update_skipped() {
        let backend = Arc::new(MemoryBackend::new("t"));
        backend.put(KEY, "a = 1");
        let source = RemoteWatchedSource::connect(backend.clone(), KEY, Format::Toml, WatchOptions::watching())
            .await
            .unwrap();
        let mut stream = source.watch().unwrap();

        backend.put(KEY, "[broken");
        backend.put("app/config.bak", "b = 2");
        let good = backend.put(KEY, "a = 2");

        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.revision, good);
        assert_eq!(event.value, b"a = 2".to_vec());
        assert_eq!(source.state(), SourceState::Watching);

        let later = backend.put(KEY, "a = 3");
        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.revision, later);
    }

    #[tokio::test]
    async fn test_disconnect_fails_closed() {
        let backend = Arc::new(MemoryBackend::new("t"));
        let source = RemoteWatchedSource::connect(backend.clone(), KEY, Format::Toml, WatchOptions::watching())
            .await
            .unwrap();
        let mut stream = source.watch().unwrap();
        wait_for_watcher(&backend).await;

        backend.disconnect_watchers("connection reset");
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, WatchError::Disconnected(_)));
        assert!(stream.next().await.is_none());
        assert_eq!(source.state(), SourceState::Closed);

        // Reads still reach the backend after a watch failure.
        assert!(source.read().await.is_ok());

        source.close().await;
        assert!(matches!(source.read().await, Err(SourceError::Closed)));
    }

    #[tokio::test]
    async fn test_close_stops_watch_and_backend() {
        let backend = Arc::new(MemoryBackend::new("t"));
        let source = RemoteWatchedSource::connect(backend.clone(), KEY, Format::Toml, WatchOptions::watching())
            .await
            .unwrap();
        let mut stream = source.watch().unwrap();

        source.close().await;
        assert_eq!(source.state(), SourceState::Closed);
        assert!(backend.is_closed());
        assert!(stream.next().await.is_none());
        assert!(matches!(source.read().await, Err(SourceError::Closed)));
    }

    #[tokio::test]
    async fn test_factory_without_key_resolves_nothing() {
        let backend = Arc::new(MemoryBackend::new("t"));
        let make = factory(move |_cfg: &BackendConfig| Ok(backend.clone() as Arc<dyn KvBackend>));
        let descriptor = Descriptor::parse("memory://local:1").unwrap();
        assert!(make(descriptor, WatchOptions::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_event_skipped() {
        let backend = Arc::new(MemoryBackend::new("t"));
        backend.put(KEY, "a = 1");
        let source = RemoteWatchedSource::connect(backend.clone(), KEY, Format::Toml, WatchOptions::watching())
            .await
            .unwrap();
        let mut stream = source.watch().unwrap();

        backend.delete(KEY).unwrap();
        let put = backend.put(KEY, "a = 2");

        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.revision, put);
        assert_eq!(event.value, b"a = 2".to_vec());
        assert!(tokio::time::timeout(Duration::from_millis(30), stream.next()).await.is_err());
        assert_eq!(source.state(), SourceState::Watching);
    }

    #[tokio::test]
    async fn test_redelivered_revision_dropped() {
        let backend = Arc::new(ScriptedBackend {
            revisions: vec![5, 5, 4, 6],
        });
        let source = RemoteWatchedSource::connect(backend.clone(), KEY, Format::Toml, WatchOptions::watching())
            .await
            .unwrap();
        let mut stream = source.watch().unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().revision, Revision(5));
        assert_eq!(stream.next().await.unwrap().unwrap().revision, Revision(6));

        // The loop itself publishes each revision once, before any consumer filtering.
        let (tx, mut rx) = broadcast::channel(8);
        let mut watch_loop = WatchLoop {
            backend,
            key: KEY.to_string(),
            format: Format::Toml,
            tx,
            state: Arc::new(AtomicU8::new(SourceState::Watching as u8)),
            reconnect: None,
            last_published: Revision(1),
        };
        for rev in [5, 5, 4, 6] {
            assert!(watch_loop.handle(put_event(rev)));
        }
        let published: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|item| item.unwrap().revision.0)
            .collect();
        assert_eq!(published, vec![5, 6]);
        assert_eq!(watch_loop.last_published, Revision(6));
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let options = WatchOptions {
            connect_timeout: Duration::from_millis(20),
            ..WatchOptions::watching()
        };
        let result = RemoteWatchedSource::connect(Arc::new(StalledBackend), KEY, Format::Toml, options).await;
        match result {
            Err(SourceError::ConnectTimeout { endpoint, timeout_ms }) => {
                assert_eq!(endpoint, "stalled://test");
                assert_eq!(timeout_ms, 20);
            }
            other => panic!("unexpected result: {:?}", other.map(|s| s.state())),
        }
    }
}
