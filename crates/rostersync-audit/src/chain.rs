//! Hash-chain primitives.
//!
//! Hash input layout (bytes, in order):
//!   1. run_id as UTF-8 bytes
//!   2. stream label as UTF-8 bytes
//!   3. sequence as 8-byte little-endian
//!   4. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!   5. compact JSON of the outcome record

use sha2::{Digest, Sha256};

use rostersync_contracts::{
    error::{SyncError, SyncResult},
    outcome::{AuditStream, OutcomeRecord},
};

use crate::event::AuditEvent;

fn stream_label(stream: AuditStream) -> &'static str {
    match stream {
        AuditStream::Converged => "converged",
        AuditStream::Attention => "attention",
    }
}

/// SHA-256 over one event's fields, as lowercase hex.
pub fn hash_event(
    run_id: &str,
    stream: AuditStream,
    sequence: u64,
    record: &OutcomeRecord,
    prev_hash: &str,
) -> SyncResult<String> {
    let record_json = serde_json::to_vec(record).map_err(|e| SyncError::AuditWriteFailed {
        reason: format!("outcome record is not serializable: {}", e),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(run_id.as_bytes());
    hasher.update(stream_label(stream).as_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&record_json);

    Ok(hex::encode(hasher.finalize()))
}

/// Check prev-hash linkage and recompute every hash of one stream.
///
/// An empty chain is valid. A chain mixing streams or runs is not.
pub fn verify_chain(events: &[AuditEvent]) -> bool {
    let mut expected_prev = AuditEvent::GENESIS_HASH.to_string();
    let first = match events.first() {
        Some(e) => e,
        None => return true,
    };

    for (idx, event) in events.iter().enumerate() {
        if event.sequence != idx as u64
            || event.stream != first.stream
            || event.run_id != first.run_id
            || event.prev_hash != expected_prev
        {
            return false;
        }
        match hash_event(
            &event.run_id,
            event.stream,
            event.sequence,
            &event.record,
            &event.prev_hash,
        ) {
            Ok(recomputed) if recomputed == event.this_hash => {}
            _ => return false,
        }
        expected_prev = event.this_hash.clone();
    }

    true
}

/// The append position of one stream.
#[derive(Debug, Clone)]
pub(crate) struct ChainCursor {
    stream: AuditStream,
    sequence: u64,
    last_hash: String,
}

impl ChainCursor {
    pub(crate) fn new(stream: AuditStream) -> Self {
        Self {
            stream,
            sequence: 0,
            last_hash: AuditEvent::GENESIS_HASH.to_string(),
        }
    }

    /// Build the next event. The cursor only advances through `commit`, so a
    /// failed write leaves the chain where it was.
    pub(crate) fn next_event(&self, run_id: &str, record: &OutcomeRecord) -> SyncResult<AuditEvent> {
        let this_hash = hash_event(run_id, self.stream, self.sequence, record, &self.last_hash)?;
        Ok(AuditEvent {
            sequence: self.sequence,
            run_id: run_id.to_string(),
            stream: self.stream,
            record: record.clone(),
            prev_hash: self.last_hash.clone(),
            this_hash,
        })
    }

    pub(crate) fn commit(&mut self, event: &AuditEvent) {
        self.sequence = event.sequence + 1;
        self.last_hash = event.this_hash.clone();
    }

    pub(crate) fn len(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn last_hash(&self) -> &str {
        &self.last_hash
    }
}
