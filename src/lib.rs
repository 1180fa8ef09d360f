//! Remote configuration with hot-reloaded named resources.

pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod pool;
pub mod resilience;
pub mod source;

pub use config::schema::RuntimeConfig;
pub use lifecycle::{start, Runtime, Shutdown};
pub use pool::{DatabaseBuilder, NamedResourcePool, ResourceBuilder};
pub use source::{DataSource, SourceRegistry};
