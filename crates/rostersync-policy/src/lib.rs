//! # rostersync-policy
//!
//! Operator policy for a rostersync run.
//!
//! ## Overview
//!
//! - [`SyncConfig`] is the TOML configuration: workspace identities, transport
//!   budget, deactivation and cleanup switches, verification and the roster
//!   field mapping.
//! - [`ProtectedEntityFilter`] implements
//!   [`PlanFilter`](rostersync_core::traits::PlanFilter): destructive
//!   operations on protected groups or users are re-tagged as skipped, never
//!   dropped.
//! - [`DeactivationGate`] implements
//!   [`PhaseGate`](rostersync_core::traits::PhaseGate): the Deactivation phase
//!   waits for an exact-match confirmation token and, once confirmed, hands
//!   everything a leaver manages to the fallback manager first.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use rostersync_policy::SyncConfig;
//!
//! let config = SyncConfig::from_file(Path::new("sync.toml"))?;
//! let filter = rostersync_policy::ProtectedEntityFilter::from_config(&config);
//! ```

pub mod config;
pub mod filter;
pub mod gate;

pub use config::SyncConfig;
pub use filter::ProtectedEntityFilter;
pub use gate::{DeactivationGate, StaticConfirmer};
