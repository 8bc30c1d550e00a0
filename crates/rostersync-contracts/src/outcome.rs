//! Operation outcomes, audit streams and the run report.
//!
//! `OutcomeRecord` is what the executor hands the audit sink: exactly one per
//! operation that reached its phase, never modified after it is written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    identity::{OperationId, RunId},
    operation::{ExecutionPhase, Operation, OperationTag, SkipReason},
};

/// Why an attempted operation did not converge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    NotFound,
    Conflict,
    Unauthorized,
    /// Still rate-limited after the retry budget was spent.
    RateLimitExhausted,
    /// A manager reassignment failed, so the dependent deactivation was not
    /// attempted.
    ReassignmentFailed,
    /// A referenced entity has no remote id (e.g. its creation failed).
    Unresolved,
    /// Verification found remote state that differs from the roster.
    Drift,
    /// Any other service or transport error.
    Remote,
}

/// The result of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Succeeded,
    /// The service reported the desired state was already in place.
    AlreadySatisfied,
    Failed { kind: FailureKind, detail: String },
    Skipped { reason: SkipReason },
}

impl OutcomeStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, OutcomeStatus::Failed { .. })
    }

    /// Succeeded and AlreadySatisfied both count as converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, OutcomeStatus::Succeeded | OutcomeStatus::AlreadySatisfied)
    }

    pub fn label(&self) -> &'static str {
        match self {
            OutcomeStatus::Succeeded => "succeeded",
            OutcomeStatus::AlreadySatisfied => "already-satisfied",
            OutcomeStatus::Failed { .. } => "failed",
            OutcomeStatus::Skipped { .. } => "skipped",
        }
    }
}

/// The two audit output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditStream {
    /// Succeeded and AlreadySatisfied outcomes.
    Converged,
    /// Failed and Skipped outcomes.
    Attention,
}

/// Immutable record of one operation's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub operation_id: OperationId,
    /// Identity key (or group/field subject) the operation targeted.
    pub subject: String,
    pub operation: OperationTag,
    pub phase: ExecutionPhase,
    pub status: OutcomeStatus,
    /// Number of remote attempts, 0 when the operation was never sent.
    pub attempts: u32,
    /// Backoff delays slept before retries, in milliseconds.
    #[serde(default)]
    pub backoff_ms: Vec<u64>,
    pub timestamp: DateTime<Utc>,
}

impl OutcomeRecord {
    /// Build a record for `op` stamped with the current time.
    pub fn for_operation(op: &Operation, status: OutcomeStatus) -> Self {
        Self {
            operation_id: op.id,
            subject: op.subject().to_string(),
            operation: op.tag(),
            phase: op.phase,
            status,
            attempts: 0,
            backoff_ms: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn skipped(op: &Operation, reason: SkipReason) -> Self {
        Self::for_operation(op, OutcomeStatus::Skipped { reason })
    }

    pub fn failed(op: &Operation, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self::for_operation(
            op,
            OutcomeStatus::Failed {
                kind,
                detail: detail.into(),
            },
        )
    }

    /// Which audit stream this record belongs to.
    pub fn stream(&self) -> AuditStream {
        if self.status.is_converged() {
            AuditStream::Converged
        } else {
            AuditStream::Attention
        }
    }
}

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    AllSucceeded,
    CompletedWithFailures,
    AbortedAtProbe,
    AbortedByCancellation,
}

/// Counters over a run's outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub succeeded: usize,
    pub already_satisfied: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// What `SyncEngine::run` hands back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub status: RunStatus,
    /// Every outcome in the order it was recorded.
    pub outcomes: Vec<OutcomeRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Why the run stopped early, for `AbortedAtProbe`.
    #[serde(default)]
    pub abort_reason: Option<String>,
}

impl RunReport {
    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for outcome in &self.outcomes {
            match outcome.status {
                OutcomeStatus::Succeeded => counts.succeeded += 1,
                OutcomeStatus::AlreadySatisfied => counts.already_satisfied += 1,
                OutcomeStatus::Failed { .. } => counts.failed += 1,
                OutcomeStatus::Skipped { .. } => counts.skipped += 1,
            }
        }
        counts
    }

    /// Outcomes the caller must look at: everything failed or skipped.
    pub fn attention(&self) -> impl Iterator<Item = &OutcomeRecord> {
        self.outcomes
            .iter()
            .filter(|o| o.stream() == AuditStream::Attention)
    }
}
