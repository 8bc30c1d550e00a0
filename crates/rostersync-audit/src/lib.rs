//! # rostersync-audit
//!
//! Append-only, SHA-256 hash-chained outcome audit for rostersync runs.
//!
//! ## Overview
//!
//! Every `OutcomeRecord` the executor produces is wrapped in an `AuditEvent`
//! linked to the previous event of the same stream. Converged outcomes
//! (Succeeded, AlreadySatisfied) and attention outcomes (Failed, Skipped) are
//! separate streams with separate chains. Editing any stored event breaks its
//! chain and `verify_chain` reports it.
//!
//! Two sinks implement `AuditSink`:
//!
//! - [`InMemoryAuditSink`] for tests and scenarios
//! - [`JsonlAuditSink`], which flushes each event as one JSON line to
//!   `sync_success_log.jsonl` or `sync_error_log.jsonl`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rostersync_audit::InMemoryAuditSink;
//! use rostersync_core::traits::AuditSink;
//!
//! let sink = InMemoryAuditSink::new(&run_id);
//! sink.record(&outcome)?;
//! sink.finalize(&run_id)?;
//! assert!(sink.verify_integrity());
//! ```

pub mod chain;
pub mod event;
pub mod jsonl;
pub mod memory;

pub use chain::{hash_event, verify_chain};
pub use event::{AuditEvent, AuditLog};
pub use jsonl::{read_events, JsonlAuditSink, ERROR_LOG, SUCCESS_LOG};
pub use memory::InMemoryAuditSink;

// ── Tests ─────────────────────────────────────────────────────────────────────
