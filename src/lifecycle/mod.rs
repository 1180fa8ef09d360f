//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Resolve source → Read snapshot → Bootstrap pool → Spawn reconciler
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop reconciler → Close source → Release resources
//! ```
//!
//! # Design Decisions
//! - Ordered startup: source first, then pool, then the watch
//! - Ordered shutdown: stop applying changes before tearing down resources

pub mod shutdown;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{start, Runtime, StartupError};
