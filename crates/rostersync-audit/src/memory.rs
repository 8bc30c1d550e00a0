//! In-memory `AuditSink`.
//!
//! Keeps both streams in `Vec`s behind a `Mutex`. Used by tests and the
//! reference scenarios; `export_log()` hands out a sealed copy.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::info;

use rostersync_contracts::{
    error::{SyncError, SyncResult},
    identity::RunId,
    outcome::{AuditStream, OutcomeRecord},
};
use rostersync_core::traits::AuditSink;

use crate::{
    chain::{verify_chain, ChainCursor},
    event::{AuditEvent, AuditLog},
};

pub(crate) struct InMemoryState {
    pub(crate) converged: Vec<AuditEvent>,
    pub(crate) attention: Vec<AuditEvent>,
    converged_cursor: ChainCursor,
    attention_cursor: ChainCursor,
    /// Every record in arrival order, across both streams.
    records: Vec<OutcomeRecord>,
    finalized_at: Option<DateTime<Utc>>,
}

pub struct InMemoryAuditSink {
    run_id: String,
    pub(crate) state: Arc<Mutex<InMemoryState>>,
}

fn poisoned(e: impl std::fmt::Display) -> SyncError {
    SyncError::AuditWriteFailed {
        reason: format!("audit state lock poisoned: {}", e),
    }
}

impl InMemoryAuditSink {
    pub fn new(run_id: &RunId) -> Self {
        let state = InMemoryState {
            converged: Vec::new(),
            attention: Vec::new(),
            converged_cursor: ChainCursor::new(AuditStream::Converged),
            attention_cursor: ChainCursor::new(AuditStream::Attention),
            records: Vec::new(),
            finalized_at: None,
        };
        Self {
            run_id: run_id.to_string(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Snapshot of both streams. Empty if the lock is poisoned.
    pub fn export_log(&self) -> AuditLog {
        match self.state.lock() {
            Ok(state) => AuditLog {
                run_id: self.run_id.clone(),
                converged: state.converged.clone(),
                attention: state.attention.clone(),
                finalized_at: state.finalized_at,
            },
            Err(_) => AuditLog {
                run_id: self.run_id.clone(),
                converged: Vec::new(),
                attention: Vec::new(),
                finalized_at: None,
            },
        }
    }

    /// Records in the order they were written.
    pub fn records(&self) -> Vec<OutcomeRecord> {
        self.state
            .lock()
            .map(|s| s.records.clone())
            .unwrap_or_default()
    }

    pub fn is_finalized(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.finalized_at.is_some())
            .unwrap_or(false)
    }

    /// Both stream chains are intact.
    pub fn verify_integrity(&self) -> bool {
        match self.state.lock() {
            Ok(state) => verify_chain(&state.converged) && verify_chain(&state.attention),
            Err(_) => false,
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, outcome: &OutcomeRecord) -> SyncResult<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        if state.finalized_at.is_some() {
            return Err(SyncError::AuditWriteFailed {
                reason: format!("audit log for run {} is already finalized", self.run_id),
            });
        }

        let state = &mut *state;
        let (cursor, events) = match outcome.stream() {
            AuditStream::Converged => (&mut state.converged_cursor, &mut state.converged),
            AuditStream::Attention => (&mut state.attention_cursor, &mut state.attention),
        };
        let event = cursor.next_event(&self.run_id, outcome)?;
        cursor.commit(&event);
        events.push(event);
        state.records.push(outcome.clone());
        Ok(())
    }

    fn finalize(&self, run_id: &RunId) -> SyncResult<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        state.finalized_at = Some(Utc::now());
        info!(
            run_id = %run_id,
            converged = state.converged_cursor.len(),
            attention = state.attention_cursor.len(),
            converged_hash = %state.converged_cursor.last_hash(),
            attention_hash = %state.attention_cursor.last_hash(),
            "audit log finalized"
        );
        Ok(())
    }
}
