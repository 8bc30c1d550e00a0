//! # rostersync-core
//!
//! The reconciliation runtime: trait seams, the rate-limited transport, the
//! permission probe, the snapshot loader, the phase executor and the
//! `SyncEngine` that drives a run end to end.

pub mod classify;
pub mod engine;
pub mod executor;
pub mod probe;
pub mod snapshot;
pub mod traits;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{EngineSettings, SyncEngine};
pub use executor::{Execution, PhaseExecutor};
pub use transport::{BackoffPolicy, RateLimitedTransport, RateLimiter, RateLimiterState};
