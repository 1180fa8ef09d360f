//! Named resource subsystem.
//!
//! # Data Flow
//! ```text
//! Snapshot (name → raw options)
//!     → named.rs (decode options, diff against live set)
//!     → builder.rs (ResourceBuilder builds / releases per name)
//!     → ArcSwap map swap (readers see old or new, never partial)
//!
//! Change stream:
//!     reconciler.rs receives ChangeEvent
//!     → decode into Snapshot
//!     → named.rs reconcile
//! ```
//!
//! # Design Decisions
//! - Options equality decides whether a name is rebuilt
//! - Bootstrap is all-or-nothing; later reconciles tolerate per-name failures
//! - `database.rs` is the stock builder; callers can plug in their own

pub mod builder;
pub mod database;
pub mod named;
pub mod reconciler;

pub use builder::{BuildError, ResourceBuilder};
pub use database::{DatabaseBuilder, DatabasePool};
pub use named::{NamedResourcePool, PoolError, ReconcileReport};
pub use reconciler::{Reconciler, ReconcilerExit};
