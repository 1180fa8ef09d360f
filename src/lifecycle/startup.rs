//! Startup orchestration.
//!
//! # Responsibilities
//! - Resolve the configured source through the registry
//! - Read and decode the initial snapshot
//! - Bootstrap the named resource pool
//! - Start the reconciler when watching is enabled
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and undoes what was set up
//! - The change stream is taken before the pool loads, so no change made
//!   during bootstrap is lost

use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::loader::{ConfigError, Snapshot};
use crate::config::schema::RuntimeConfig;
use crate::lifecycle::shutdown::Shutdown;
use crate::pool::builder::ResourceBuilder;
use crate::pool::named::{NamedResourcePool, PoolError};
use crate::pool::reconciler::{Reconciler, ReconcilerExit};
use crate::source::descriptor::redact;
use crate::source::registry::SourceRegistry;
use crate::source::types::SourceError;
use crate::source::DataSource;

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    /// No registered factory produced a source for the descriptor.
    #[error("no source available for '{0}'")]
    NoSource(String),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("initial configuration is invalid: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Running system: a source, the pool fed from it, and its reconciler.
pub struct Runtime<B: ResourceBuilder> {
    source: Arc<dyn DataSource>,
    pool: Arc<NamedResourcePool<B>>,
    shutdown: Shutdown,
    reconciler: Option<JoinHandle<ReconcilerExit>>,
}

impl<B: ResourceBuilder> Runtime<B> {
    pub fn pool(&self) -> &Arc<NamedResourcePool<B>> {
        &self.pool
    }

    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.source
    }

    /// Whether a reconciler was started and is still running.
    pub fn is_watching(&self) -> bool {
        self.reconciler.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the reconciler, close the source and release every resource.
    ///
    /// Returns how the reconciler ended, if one was running.
    pub async fn shutdown(mut self) -> Option<ReconcilerExit> {
        tracing::info!("Runtime shutting down");
        self.shutdown.trigger();

        let exit = match self.reconciler.take() {
            Some(handle) => match handle.await {
                Ok(exit) => Some(exit),
                Err(e) => {
                    tracing::error!(error = %e, "Reconciler task failed");
                    None
                }
            },
            None => None,
        };

        self.source.close().await;
        self.pool.release_all().await;
        tracing::info!("Shutdown complete");
        exit
    }
}

/// Bring the system up from `config`.
pub async fn start<B: ResourceBuilder>(
    registry: &SourceRegistry,
    config: &RuntimeConfig,
    builder: B,
) -> Result<Runtime<B>, StartupError> {
    let options = config.watch_options();
    let source = registry
        .resolve(&config.source.descriptor, &options)
        .await?
        .ok_or_else(|| StartupError::NoSource(redact(&config.source.descriptor)))?;

    match bootstrap(source.clone(), config, builder).await {
        Ok(runtime) => Ok(runtime),
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            source.close().await;
            Err(e)
        }
    }
}

async fn bootstrap<B: ResourceBuilder>(
    source: Arc<dyn DataSource>,
    config: &RuntimeConfig,
    builder: B,
) -> Result<Runtime<B>, StartupError> {
    let bytes = source.read().await?;
    let snapshot = Snapshot::decode(&bytes, source.format(), &config.source.prefix)?;

    let stream = if config.source.watch {
        if source.supports_watch() {
            Some(source.watch()?)
        } else {
            tracing::warn!(kind = source.kind(), "Source cannot be watched; changes need a restart");
            None
        }
    } else {
        None
    };

    let pool = Arc::new(NamedResourcePool::new(builder, config.pool.removal));
    pool.load_all(&snapshot).await?;

    let shutdown = Shutdown::new();
    let reconciler = stream.map(|stream| {
        Reconciler::new(pool.clone(), source.format(), config.source.prefix.clone())
            .spawn(stream, shutdown.subscribe())
    });

    tracing::info!(
        kind = source.kind(),
        resources = pool.len(),
        watching = reconciler.is_some(),
        "Runtime started"
    );

    Ok(Runtime {
        source,
        pool,
        shutdown,
        reconciler,
    })
}
