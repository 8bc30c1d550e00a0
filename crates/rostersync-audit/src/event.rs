//! Audit event and sealed log types.
//!
//! `AuditEvent` wraps one `OutcomeRecord` with its position in a stream's hash
//! chain. The converged and attention streams are chained independently, so
//! each output file verifies on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rostersync_contracts::outcome::{AuditStream, OutcomeRecord};

/// One entry in a stream's SHA-256 hash chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Position in this stream's chain, starting at 0.
    pub sequence: u64,
    pub run_id: String,
    pub stream: AuditStream,
    pub record: OutcomeRecord,
    /// `this_hash` of the previous event in the stream, or `GENESIS_HASH`.
    pub prev_hash: String,
    pub this_hash: String,
}

impl AuditEvent {
    /// `prev_hash` of the first event in every stream.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}

/// Both streams of a run, as exported after it finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub run_id: String,
    /// Succeeded and AlreadySatisfied outcomes.
    pub converged: Vec<AuditEvent>,
    /// Failed and Skipped outcomes.
    pub attention: Vec<AuditEvent>,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl AuditLog {
    /// Last `this_hash` of a stream, empty when the stream has no events.
    pub fn terminal_hash(&self, stream: AuditStream) -> String {
        let events = match stream {
            AuditStream::Converged => &self.converged,
            AuditStream::Attention => &self.attention,
        };
        events.last().map(|e| e.this_hash.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.converged.len() + self.attention.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
