//! Configuration source subsystem.
//!
//! # Data Flow
//! ```text
//! descriptor string ("etcd://host:2379?key=app")
//!     → descriptor.rs (parse, keep scheme case)
//!     → registry.rs (scheme → factory)
//!     → factory builds a DataSource:
//!         - file.rs   (static, read only)
//!         - remote.rs (KvBackend + initial load + optional watch loop)
//!     → read() for the initial snapshot
//!     → watch() → stream.rs (ordered, bounded change stream)
//! ```
//!
//! # Design Decisions
//! - The registry is an explicit value filled during startup, then shared
//!   read-only
//! - Sources only move raw bytes; decoding into snapshots happens in
//!   `config::loader`
//! - One watch loop per source, talking to the consumer only through the
//!   change channel

pub mod backend;
pub mod descriptor;
pub mod file;
pub mod memory;
pub mod registry;
pub mod remote;
pub mod stream;
pub mod types;

use std::fmt::Debug;
use async_trait::async_trait;

use crate::config::loader::Format;

pub use backend::{BackendConfig, KvBackend};
pub use descriptor::Descriptor;
pub use file::FileSource;
pub use memory::MemoryBackend;
pub use registry::SourceRegistry;
pub use remote::{RemoteWatchedSource, WatchOptions};
pub use stream::ChangeStream;
pub use types::{ChangeEvent, Revision, SourceError, SourceResult, SourceState, WatchError};

/// A place configuration bytes are loaded from.
#[async_trait]
pub trait DataSource: Send + Sync + Debug {
    /// Short name of the variant, for logs.
    fn kind(&self) -> &'static str;

    /// Encoding of the documents this source returns.
    fn format(&self) -> Format;

    /// Fetch the current full document. Never mutates the backend.
    async fn read(&self) -> SourceResult<Vec<u8>>;

    fn supports_watch(&self) -> bool {
        false
    }

    /// Take the change stream. Only one stream exists per source.
    fn watch(&self) -> SourceResult<ChangeStream> {
        Err(SourceError::WatchUnsupported(self.kind().to_string()))
    }

    /// Stop watching and release the backend connection.
    async fn close(&self) {}
}
