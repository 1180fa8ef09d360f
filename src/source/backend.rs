//! Key/value backend contract required by remote sources.
//!
//! # Responsibilities
//! - `get(key)` returns the current value and the store revision
//! - `watch(key, from)` streams put/delete events for the key (or prefix)
//!   starting at `from`
//! - Map descriptor parts onto client connection settings
//!
//! Concrete wire clients (etcd, Consul, ...) live outside this crate and plug
//! in through [`crate::source::remote::factory`].

use std::fmt;
use std::time::Duration;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::source::descriptor::Descriptor;
use crate::source::types::Revision;

/// Kind of change observed by a backend watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// One change reported by a backend watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEvent {
    pub key: String,
    pub value: Vec<u8>,
    pub revision: Revision,
    pub kind: EventKind,
}

/// Result of a point read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResponse {
    /// Stored value, `None` when the key does not exist.
    pub value: Option<Vec<u8>>,
    /// Store revision at the time of the read.
    pub revision: Revision,
}

/// Errors reported by a backend client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("watch stream disconnected: {0}")]
    Disconnected(String),

    #[error("authentication failed for user '{0}'")]
    Unauthenticated(String),

    /// Requested replay start is older than the retained history.
    #[error("revision {requested} has been compacted; oldest available is {oldest}")]
    Compacted { requested: Revision, oldest: Revision },
}

/// Stream of watch events; ends or yields an error when the backend drops it.
pub type BackendWatch = BoxStream<'static, Result<BackendEvent, BackendError>>;

/// Minimal client contract a remote store must satisfy.
#[async_trait]
pub trait KvBackend: Send + Sync + fmt::Debug {
    /// Endpoint description for logs.
    fn endpoint(&self) -> String;

    /// Read the current value of `key`.
    async fn get(&self, key: &str) -> Result<GetResponse, BackendError>;

    /// Watch `key` (backends may match it as a prefix) from `from` onward.
    async fn watch(&self, key: &str, from: Revision) -> Result<BackendWatch, BackendError>;

    /// Release the client connection.
    async fn close(&self) {}
}

/// Client settings derived from a descriptor.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub endpoints: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Key holding the configuration document.
    pub key: String,
    pub dial_keep_alive_time: Duration,
    pub dial_keep_alive_timeout: Duration,
}

impl BackendConfig {
    /// Build client settings from `scheme://host:port?username=&password=&key=`.
    ///
    /// Returns `None` when the descriptor names no endpoint or no key.
    pub fn from_descriptor(descriptor: &Descriptor) -> Option<Self> {
        let endpoint = descriptor.endpoint()?;
        let key = descriptor.param("key")?;

        Some(Self {
            endpoints: vec![endpoint],
            username: descriptor.param("username"),
            password: descriptor.param("password"),
            key,
            dial_keep_alive_time: Duration::from_secs(10),
            dial_keep_alive_timeout: Duration::from_secs(3),
        })
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("endpoints", &self.endpoints)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("key", &self.key)
            .field("dial_keep_alive_time", &self.dial_keep_alive_time)
            .field("dial_keep_alive_timeout", &self.dial_keep_alive_timeout)
            .finish()
    }
}
