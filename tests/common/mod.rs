//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use serde::Deserialize;

use remote_config::config::schema::RuntimeConfig;
use remote_config::pool::{BuildError, ResourceBuilder};
use remote_config::source::backend::{BackendConfig, KvBackend};
use remote_config::source::remote;
use remote_config::source::{MemoryBackend, SourceRegistry};

pub const KEY: &str = "app/config";
pub const DESCRIPTOR: &str = "memory://127.0.0.1:2379?username=root&password=pw&key=app/config";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TestOptions {
    pub dsn: String,
}

#[derive(Debug)]
pub struct TestResource {
    pub name: String,
    pub dsn: String,
}

/// Builder that records every build and release.
#[derive(Default)]
pub struct CountingBuilder {
    pub builds: Mutex<Vec<String>>,
    pub releases: Mutex<Vec<String>>,
    pub failing: Mutex<HashSet<String>>,
}

impl CountingBuilder {
    pub fn fail_dsn(&self, dsn: &str) {
        self.failing.lock().unwrap().insert(dsn.to_string());
    }

    pub fn build_count(&self) -> usize {
        self.builds.lock().unwrap().len()
    }

    pub fn released(&self) -> Vec<String> {
        self.releases.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceBuilder for CountingBuilder {
    type Options = TestOptions;
    type Resource = TestResource;

    async fn build(&self, name: &str, options: &TestOptions) -> Result<TestResource, BuildError> {
        if self.failing.lock().unwrap().contains(&options.dsn) {
            return Err(BuildError::Failed(format!("cannot open {}", options.dsn)));
        }
        self.builds.lock().unwrap().push(name.to_string());
        Ok(TestResource {
            name: name.to_string(),
            dsn: options.dsn.clone(),
        })
    }

    async fn release(&self, name: &str, _resource: Arc<TestResource>) {
        self.releases.lock().unwrap().push(name.to_string());
    }
}

/// Registry with a `memory` scheme backed by `backend`.
pub fn memory_registry(backend: Arc<MemoryBackend>) -> SourceRegistry {
    let mut registry = SourceRegistry::with_defaults();
    registry
        .register(
            "memory",
            remote::factory(move |config: &BackendConfig| {
                assert_eq!(config.key, KEY);
                Ok(backend.clone() as Arc<dyn KvBackend>)
            }),
        )
        .unwrap();
    registry
}

/// Settings pointing at the memory backend.
pub fn settings(watch: bool) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.source.descriptor = DESCRIPTOR.to_string();
    config.source.watch = watch;
    config
}

/// TOML document with one `[database.<name>]` table per entry.
pub fn document(entries: &[(&str, &str)]) -> String {
    entries
        .iter()
        .map(|(name, dsn)| format!("[database.{}]\ndsn = \"{}\"\n", name, dsn))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Poll `check` until it returns true or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Wait until the watch loop has an open stream on `backend`.
pub async fn wait_for_watcher(backend: &MemoryBackend) {
    let ready = eventually(|| async move { backend.watcher_count() > 0 }).await;
    assert!(ready, "watch loop never subscribed");
}
