//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters, gauges, histograms via `metrics`)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields (key, revision, name) on every event
//! - Credentials never reach logs; descriptors are redacted
//! - Metrics are cheap (no-op without an installed recorder)

pub mod logging;
pub mod metrics;
