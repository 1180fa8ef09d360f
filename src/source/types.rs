//! Revision, change event and error definitions shared by all sources.

use std::fmt;
use thiserror::Error;

use crate::source::backend::BackendError;

/// Backend-assigned, monotonically increasing version of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Revision(pub u64);

impl Revision {
    /// The revision immediately after this one.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl From<u64> for Revision {
    fn from(rev: u64) -> Self {
        Self(rev)
    }
}

impl From<Revision> for u64 {
    fn from(rev: Revision) -> Self {
        rev.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A new full configuration value published by a watching source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Raw configuration bytes as stored in the backend.
    pub value: Vec<u8>,
    /// Revision at which the value was written.
    pub revision: Revision,
}

/// Lifecycle state of a remote source.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Connecting = 0,
    Loaded = 1,
    Watching = 2,
    /// No watch loop is running, after `close()` or a watch failure.
    /// Reads are refused only after `close()`.
    Closed = 3,
}

impl From<u8> for SourceState {
    fn from(val: u8) -> Self {
        match val {
            1 => SourceState::Loaded,
            2 => SourceState::Watching,
            3 => SourceState::Closed,
            _ => SourceState::Connecting,
        }
    }
}

/// Errors raised while resolving, constructing or reading a source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Descriptor could not be parsed or lacks a required part.
    #[error("invalid descriptor '{descriptor}': {reason}")]
    InvalidDescriptor { descriptor: String, reason: String },

    /// A factory is already registered for this scheme.
    #[error("scheme '{0}' is already registered")]
    DuplicateScheme(String),

    /// Local file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Remote backend call failed.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Initial load did not complete in time.
    #[error("connecting to {endpoint} timed out after {timeout_ms} ms")]
    ConnectTimeout { endpoint: String, timeout_ms: u64 },

    /// This kind of source cannot be watched.
    #[error("{0} sources do not support watching")]
    WatchUnsupported(String),

    /// Source was constructed without watch mode.
    #[error("watch mode is disabled for this source")]
    WatchDisabled,

    /// `watch` was already called on this instance.
    #[error("change stream already taken; only one watch per source")]
    WatchAlreadyTaken,

    /// Source has been closed.
    #[error("source is closed")]
    Closed,
}

/// Terminal failure of a watch loop, delivered as the last stream item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    /// The backend dropped or broke the watch stream.
    #[error("backend watch disconnected: {0}")]
    Disconnected(String),

    /// Opening the watch subscription failed.
    #[error("watch subscription failed: {0}")]
    Subscribe(String),

    /// Reconnect policy gave up.
    #[error("reconnect gave up after {attempts} attempts: {last_error}")]
    ReconnectExhausted { attempts: u32, last_error: String },
}

/// Result type for source operations.
pub type SourceResult<T> = Result<T, SourceError>;
