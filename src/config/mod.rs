//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! settings file (TOML) + CLI overrides
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RuntimeConfig (validated, immutable)
//!
//! Source document (TOML/JSON bytes)
//!     → loader.rs Format::parse (generic tree)
//!     → Snapshot::decode (table at the dotted prefix)
//!     → Snapshot (name → raw options)
//!     → DatabaseOptions per name, decoded by the pool
//! ```
//!
//! # Design Decisions
//! - Settings are immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigError, Format, Snapshot};
pub use schema::DatabaseOptions;
pub use schema::RemovalPolicy;
pub use schema::RuntimeConfig;
