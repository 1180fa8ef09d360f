//! Scheme → factory registry.
//!
//! # Responsibilities
//! - Hold one factory per scheme, registered during startup
//! - Resolve descriptor strings into data sources
//!
//! # Design Decisions
//! - Duplicate registrations fail fast
//! - `register` takes `&mut self`; once the registry is shared behind an
//!   `Arc` it can only be read
//! - "Nothing configured" (empty, malformed, unknown scheme) resolves to
//!   `Ok(None)`; a factory that fails to build its source returns `Err`

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::source::descriptor::Descriptor;
use crate::source::file::FileSource;
use crate::source::remote::{SourceFuture, WatchOptions};
use crate::source::types::{SourceError, SourceResult};
use crate::source::DataSource;

/// Scheme of the built-in static file source.
pub const FILE_SCHEME: &str = "file";

type SourceFactory = Arc<dyn Fn(Descriptor, WatchOptions) -> SourceFuture + Send + Sync>;

/// Maps descriptor schemes to source factories.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    factories: HashMap<String, SourceFactory>,
}

impl SourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `file` scheme.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.factories.insert(
            FILE_SCHEME.to_string(),
            Arc::new(|descriptor: Descriptor, _options: WatchOptions| {
                Box::pin(async move {
                    let source = FileSource::from_descriptor(&descriptor).await?;
                    Ok(Some(Arc::new(source) as Arc<dyn DataSource>))
                }) as SourceFuture
            }),
        );
        registry
    }

    /// Register a factory for `scheme`.
    pub fn register<F, Fut>(&mut self, scheme: &str, factory: F) -> SourceResult<()>
    where
        F: Fn(Descriptor, WatchOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SourceResult<Option<Arc<dyn DataSource>>>> + Send + 'static,
    {
        if self.factories.contains_key(scheme) {
            return Err(SourceError::DuplicateScheme(scheme.to_string()));
        }
        self.factories.insert(
            scheme.to_string(),
            Arc::new(move |descriptor: Descriptor, options: WatchOptions| {
                Box::pin(factory(descriptor, options)) as SourceFuture
            }),
        );
        tracing::debug!(scheme, "Registered configuration source");
        Ok(())
    }

    pub fn contains(&self, scheme: &str) -> bool {
        self.factories.contains_key(scheme)
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }

    /// Resolve a descriptor into a source.
    pub async fn resolve(
        &self,
        descriptor: &str,
        options: &WatchOptions,
    ) -> SourceResult<Option<Arc<dyn DataSource>>> {
        if descriptor.trim().is_empty() {
            tracing::debug!("No configuration source descriptor supplied");
            return Ok(None);
        }

        let descriptor = match Descriptor::parse(descriptor) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed configuration source descriptor");
                return Ok(None);
            }
        };

        let Some(factory) = self.factories.get(descriptor.scheme()) else {
            tracing::warn!(
                scheme = %descriptor.scheme(),
                registered = ?self.schemes(),
                "No configuration source registered for scheme"
            );
            return Ok(None);
        };

        let source = factory(descriptor.clone(), options.clone()).await?;
        if let Some(source) = &source {
            tracing::info!(
                descriptor = %descriptor,
                kind = source.kind(),
                watch = options.enabled,
                "Configuration source resolved"
            );
        }
        Ok(source)
    }
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}
