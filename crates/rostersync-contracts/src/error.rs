//! Run-level error types for the rostersync pipeline.
//!
//! Only conditions that stop a run are `SyncError`s. Failures of individual
//! operations are data: they travel as `FailureKind` inside an
//! `OutcomeRecord` and never abort the pipeline.

use thiserror::Error;

/// The unified run-level error type.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The credential lacks one or more scopes the run needs.
    ///
    /// Raised by the permission probe before any state is loaded.
    #[error("credential is missing required scopes: {}", missing.join(", "))]
    InsufficientScope { missing: Vec<String> },

    /// The observed-state snapshot could not be fetched or assembled.
    #[error("snapshot load failed: {reason}")]
    SnapshotLoad { reason: String },

    /// Two records in the same set share an identity key.
    #[error("duplicate identity key '{key}' in {source_set}")]
    DuplicateIdentity { key: String, source_set: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// The audit sink could not persist an outcome.
    ///
    /// Fatal: an operation whose outcome cannot be recorded must not be
    /// followed by further mutations.
    #[error("audit write failed: {reason}")]
    AuditWriteFailed { reason: String },

    /// A phase gate could not reach a decision (e.g. the confirmation
    /// channel broke).
    #[error("phase gate failed: {reason}")]
    GateFailed { reason: String },

    /// A worker task of the phase executor panicked or was aborted.
    #[error("executor failure: {reason}")]
    ExecutorFailed { reason: String },
}

/// Convenience alias used throughout the rostersync crates.
pub type SyncResult<T> = Result<T, SyncError>;
