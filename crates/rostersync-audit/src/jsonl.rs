//! JSON-lines file `AuditSink`.
//!
//! Writes `sync_success_log.jsonl` (converged outcomes) and
//! `sync_error_log.jsonl` (failed and skipped outcomes) into one directory.
//! Files are opened in append mode and every line is flushed before `record`
//! returns, so an interrupted run still leaves a readable prefix.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info};

use rostersync_contracts::{
    error::{SyncError, SyncResult},
    identity::RunId,
    outcome::{AuditStream, OutcomeRecord},
};
use rostersync_core::traits::AuditSink;

use crate::{chain::ChainCursor, event::AuditEvent};

pub const SUCCESS_LOG: &str = "sync_success_log.jsonl";
pub const ERROR_LOG: &str = "sync_error_log.jsonl";

fn write_failed(context: &str, path: &Path, e: impl std::fmt::Display) -> SyncError {
    SyncError::AuditWriteFailed {
        reason: format!("{} '{}': {}", context, path.display(), e),
    }
}

struct StreamFile {
    path: PathBuf,
    file: File,
    cursor: ChainCursor,
}

impl StreamFile {
    fn open(path: PathBuf, stream: AuditStream) -> SyncResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| write_failed("failed to open audit log", &path, e))?;
        Ok(Self {
            path,
            file,
            cursor: ChainCursor::new(stream),
        })
    }

    fn append(&mut self, run_id: &str, record: &OutcomeRecord) -> SyncResult<()> {
        let event = self.cursor.next_event(run_id, record)?;
        let mut line = serde_json::to_string(&event)
            .map_err(|e| write_failed("failed to encode audit event for", &self.path, e))?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.flush())
            .map_err(|e| write_failed("failed to append to audit log", &self.path, e))?;
        self.cursor.commit(&event);
        Ok(())
    }

    fn seal(&mut self) -> SyncResult<()> {
        self.file
            .sync_all()
            .map_err(|e| write_failed("failed to sync audit log", &self.path, e))
    }
}

struct JsonlState {
    converged: StreamFile,
    attention: StreamFile,
}

pub struct JsonlAuditSink {
    run_id: String,
    dir: PathBuf,
    state: Mutex<JsonlState>,
}

impl JsonlAuditSink {
    /// Open (or create) both log files under `dir`, which must exist.
    pub fn create(dir: &Path, run_id: &RunId) -> SyncResult<Self> {
        let state = JsonlState {
            converged: StreamFile::open(dir.join(SUCCESS_LOG), AuditStream::Converged)?,
            attention: StreamFile::open(dir.join(ERROR_LOG), AuditStream::Attention)?,
        };
        debug!(dir = %dir.display(), run_id = %run_id, "audit log files opened");
        Ok(Self {
            run_id: run_id.to_string(),
            dir: dir.to_path_buf(),
            state: Mutex::new(state),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, stream: AuditStream) -> PathBuf {
        match stream {
            AuditStream::Converged => self.dir.join(SUCCESS_LOG),
            AuditStream::Attention => self.dir.join(ERROR_LOG),
        }
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, outcome: &OutcomeRecord) -> SyncResult<()> {
        let mut state = self.state.lock().map_err(|e| SyncError::AuditWriteFailed {
            reason: format!("audit state lock poisoned: {}", e),
        })?;
        match outcome.stream() {
            AuditStream::Converged => state.converged.append(&self.run_id, outcome),
            AuditStream::Attention => state.attention.append(&self.run_id, outcome),
        }
    }

    fn finalize(&self, run_id: &RunId) -> SyncResult<()> {
        let mut state = self.state.lock().map_err(|e| SyncError::AuditWriteFailed {
            reason: format!("audit state lock poisoned: {}", e),
        })?;
        state.converged.seal()?;
        state.attention.seal()?;
        info!(
            run_id = %run_id,
            converged = state.converged.cursor.len(),
            attention = state.attention.cursor.len(),
            converged_hash = %state.converged.cursor.last_hash(),
            attention_hash = %state.attention.cursor.last_hash(),
            dir = %self.dir.display(),
            "audit log finalized"
        );
        Ok(())
    }
}

/// Read back one log file, keeping only the events of `run_id`.
///
/// The files are shared across runs, so each run's chain is interleaved with
/// nothing but starts at its own genesis event.
pub fn read_events(path: &Path, run_id: &RunId) -> SyncResult<Vec<AuditEvent>> {
    let file = File::open(path).map_err(|e| write_failed("failed to open audit log", path, e))?;
    let wanted = run_id.to_string();
    let mut events = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| write_failed("failed to read audit log", path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: AuditEvent = serde_json::from_str(&line).map_err(|e| {
            write_failed(&format!("malformed line {} in audit log", idx + 1), path, e)
        })?;
        if event.run_id == wanted {
            events.push(event);
        }
    }
    Ok(events)
}
