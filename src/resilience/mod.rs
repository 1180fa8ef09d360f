//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Watch stream dropped by backend:
//!     → backoff.rs (ReconnectPolicy: delay for attempt N, with jitter)
//!     → watch loop re-subscribes from last published revision + 1
//!     → attempts exhausted: terminal WatchError
//! ```
//!
//! # Design Decisions
//! - Reconnect is opt-in; the default is to fail closed
//! - Jittered backoff keeps many sources from reconnecting in lockstep

pub mod backoff;

pub use backoff::ReconnectPolicy;
