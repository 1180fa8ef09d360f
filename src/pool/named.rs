//! Named resource pool.
//!
//! # Responsibilities
//! - Keep one live resource per configured name plus the options it was
//!   built from
//! - Bootstrap all names from the first snapshot (fail-fast)
//! - Reconcile later snapshots: rebuild only names whose options changed
//!
//! # Design Decisions
//! - Readers load an immutable map through `ArcSwap`; writers build a new
//!   map and swap it in, so lookups never block
//! - Writers are serialized by an async mutex
//! - A replacement is built and swapped in before the old resource is
//!   released, so a name is never without a resource
//! - Names missing from a snapshot follow `RemovalPolicy`

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use arc_swap::ArcSwap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::loader::Snapshot;
use crate::config::schema::RemovalPolicy;
use crate::observability::metrics;
use crate::pool::builder::{BuildError, ResourceBuilder};

/// Errors raised by the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Raw options for a name did not match the options schema.
    #[error("failed to decode options for '{name}': {reason}")]
    Decode { name: String, reason: String },

    /// The builder rejected or failed a name.
    #[error("failed to build resource '{name}': {source}")]
    Build {
        name: String,
        #[source]
        source: BuildError,
    },

    /// One or more names failed during the initial load.
    #[error("bootstrap failed: {}", join_errors(.0))]
    Bootstrap(Vec<PoolError>),

    /// `load_all` was called after an earlier load succeeded.
    #[error("pool is already loaded")]
    AlreadyLoaded,
}

impl PoolError {
    /// Name this error refers to, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            PoolError::Decode { name, .. } | PoolError::Build { name, .. } => Some(name),
            _ => None,
        }
    }
}

fn join_errors(errors: &[PoolError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Outcome of one reconcile pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Names seen for the first time.
    pub added: Vec<String>,
    /// Names whose options changed and were rebuilt.
    pub rebuilt: Vec<String>,
    pub unchanged: Vec<String>,
    /// Names absent from the snapshot that were released.
    pub released: Vec<String>,
    /// Names absent from the snapshot that were kept.
    pub retained: Vec<String>,
    /// Per-name failures; the previous resource (if any) stays live.
    pub failures: Vec<PoolError>,
}

impl ReconcileReport {
    /// True when the live set did not change.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.rebuilt.is_empty() && self.released.is_empty()
    }
}

struct Entry<O, R> {
    options: O,
    resource: Arc<R>,
    generation: u64,
}

type EntryMap<B> = HashMap<String, Arc<Entry<<B as ResourceBuilder>::Options, <B as ResourceBuilder>::Resource>>>;

/// One live resource per configured name.
pub struct NamedResourcePool<B: ResourceBuilder> {
    builder: B,
    entries: ArcSwap<EntryMap<B>>,
    write_lock: Mutex<()>,
    removal: RemovalPolicy,
    generation: AtomicU64,
    /// Set once `load_all` succeeds; never cleared.
    loaded: AtomicBool,
}

impl<B: ResourceBuilder> NamedResourcePool<B> {
    pub fn new(builder: B, removal: RemovalPolicy) -> Self {
        Self {
            builder,
            entries: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
            removal,
            generation: AtomicU64::new(0),
            loaded: AtomicBool::new(false),
        }
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    /// Whether the initial load has succeeded.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn removal_policy(&self) -> RemovalPolicy {
        self.removal
    }

    /// Build every name in the first snapshot.
    ///
    /// Any failure aborts the whole load: resources already built are
    /// released and every per-name error is returned together. Once a load
    /// succeeds, even an empty one, later calls return `AlreadyLoaded`.
    pub async fn load_all(
        &self,
        snapshot: &Snapshot,
    ) -> Result<HashMap<String, Arc<B::Resource>>, PoolError> {
        let _guard = self.write_lock.lock().await;
        if self.loaded.load(Ordering::Acquire) {
            return Err(PoolError::AlreadyLoaded);
        }

        let mut built: EntryMap<B> = HashMap::new();
        let mut failures = Vec::new();
        for (name, raw) in snapshot.entries() {
            match self.decode(name, raw) {
                Ok(options) => match self.build_entry(name, options).await {
                    Ok(entry) => {
                        built.insert(name.to_string(), entry);
                    }
                    Err(e) => failures.push(e),
                },
                Err(e) => failures.push(e),
            }
        }

        if !failures.is_empty() {
            tracing::error!(
                failed = failures.len(),
                built = built.len(),
                "Initial resource load failed; releasing partial set"
            );
            for (name, entry) in built {
                self.builder.release(&name, entry.resource.clone()).await;
            }
            return Err(PoolError::Bootstrap(failures));
        }

        let resources = built
            .iter()
            .map(|(name, entry)| (name.clone(), entry.resource.clone()))
            .collect();
        metrics::record_pool_size(built.len());
        metrics::record_resource_change("added", built.len());
        tracing::info!(count = built.len(), revision = ?snapshot.revision, "Named resources loaded");
        self.entries.store(Arc::new(built));
        self.loaded.store(true, Ordering::Release);
        Ok(resources)
    }

    /// Bring the live set in line with a new snapshot.
    ///
    /// Per-name failures are collected in the report and leave the previous
    /// resource for that name in service.
    pub async fn reconcile(&self, snapshot: &Snapshot) -> ReconcileReport {
        let _guard = self.write_lock.lock().await;
        let start = Instant::now();
        let current = self.entries.load_full();
        let mut next: EntryMap<B> = (*current).clone();
        let mut report = ReconcileReport::default();
        let mut replaced = Vec::new();

        for (name, raw) in snapshot.entries() {
            let options = match self.decode(name, raw) {
                Ok(options) => options,
                Err(e) => {
                    tracing::warn!(name, error = %e, "Keeping previous resource");
                    report.failures.push(e);
                    continue;
                }
            };

            let existing = current.get(name);
            if let Some(entry) = existing {
                if entry.options == options {
                    report.unchanged.push(name.to_string());
                    continue;
                }
            }

            match self.build_entry(name, options).await {
                Ok(entry) => {
                    next.insert(name.to_string(), entry);
                    match existing {
                        Some(old) => {
                            replaced.push((name.to_string(), old.clone()));
                            report.rebuilt.push(name.to_string());
                        }
                        None => report.added.push(name.to_string()),
                    }
                }
                Err(e) => {
                    tracing::warn!(name, error = %e, "Rebuild failed; keeping previous resource");
                    report.failures.push(e);
                }
            }
        }

        let mut missing: Vec<&String> = current.keys().filter(|n| !snapshot.contains(n)).collect();
        missing.sort();
        for name in missing {
            match self.removal {
                RemovalPolicy::Retain => {
                    tracing::info!(name = %name, "Name missing from snapshot; retaining resource");
                    report.retained.push(name.clone());
                }
                RemovalPolicy::Release => {
                    if let Some(old) = next.remove(name) {
                        replaced.push((name.clone(), old));
                        report.released.push(name.clone());
                    }
                }
            }
        }

        if !report.is_noop() {
            metrics::record_pool_size(next.len());
            self.entries.store(Arc::new(next));
        }

        // Old resources go only after the new map is visible to readers.
        for (name, old) in replaced {
            self.builder.release(&name, old.resource.clone()).await;
        }

        metrics::record_resource_change("added", report.added.len());
        metrics::record_resource_change("rebuilt", report.rebuilt.len());
        metrics::record_resource_change("released", report.released.len());
        metrics::record_reconcile(start);
        report
    }

    /// Release every resource and empty the pool.
    pub async fn release_all(&self) {
        let _guard = self.write_lock.lock().await;
        let drained = self.entries.swap(Arc::new(HashMap::new()));
        let mut names: Vec<&String> = drained.keys().collect();
        names.sort();
        for name in names {
            if let Some(entry) = drained.get(name) {
                self.builder.release(name, entry.resource.clone()).await;
            }
        }
        metrics::record_pool_size(0);
        tracing::info!(count = drained.len(), "Named resources released");
    }

    /// Live resource for `name`.
    pub fn get(&self, name: &str) -> Option<Arc<B::Resource>> {
        self.entries.load().get(name).map(|e| e.resource.clone())
    }

    /// Options the live resource for `name` was built from.
    pub fn options(&self, name: &str) -> Option<B::Options> {
        self.entries.load().get(name).map(|e| e.options.clone())
    }

    /// Build generation of `name`; increases on every (re)build.
    pub fn generation(&self, name: &str) -> Option<u64> {
        self.entries.load().get(name).map(|e| e.generation)
    }

    /// All live resources at this instant.
    pub fn resources(&self) -> HashMap<String, Arc<B::Resource>> {
        self.entries
            .load()
            .iter()
            .map(|(name, e)| (name.clone(), e.resource.clone()))
            .collect()
    }

    /// Names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    fn decode(&self, name: &str, raw: &Value) -> Result<B::Options, PoolError> {
        serde_json::from_value(raw.clone()).map_err(|e| PoolError::Decode {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    async fn build_entry(
        &self,
        name: &str,
        options: B::Options,
    ) -> Result<Arc<Entry<B::Options, B::Resource>>, PoolError> {
        match self.builder.build(name, &options).await {
            Ok(resource) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(name, generation, "Resource built");
                Ok(Arc::new(Entry {
                    options,
                    resource: Arc::new(resource),
                    generation,
                }))
            }
            Err(source) => {
                metrics::record_build_failure();
                Err(PoolError::Build {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }
}

impl<B: ResourceBuilder> fmt::Debug for NamedResourcePool<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedResourcePool")
            .field("names", &self.names())
            .field("removal", &self.removal)
            .finish()
    }
}
