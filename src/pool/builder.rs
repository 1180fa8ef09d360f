//! Resource builder contract.

use std::fmt::Debug;
use std::sync::Arc;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors a builder reports for one name.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Options decoded but are not usable.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// The resource could not be brought up.
    #[error("{0}")]
    Failed(String),
}

/// Turns decoded options into a live resource and tears it down again.
///
/// The pool never looks inside `Resource`; it only compares `Options`.
#[async_trait]
pub trait ResourceBuilder: Send + Sync + 'static {
    /// Per-name options. Equality decides whether a rebuild is needed.
    type Options: DeserializeOwned + Clone + PartialEq + Debug + Send + Sync + 'static;

    /// Live resource handle shared with readers.
    type Resource: Send + Sync + 'static;

    async fn build(&self, name: &str, options: &Self::Options) -> Result<Self::Resource, BuildError>;

    /// Called once a resource has been replaced or removed. Readers may still
    /// hold clones of the `Arc`.
    async fn release(&self, name: &str, resource: Arc<Self::Resource>) {
        let _ = (name, resource);
    }
}
