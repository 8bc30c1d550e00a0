//! The phase executor: runs a filtered plan against the workspace.
//!
//! Phases run strictly in `ExecutionPhase` order. Within a phase, operations
//! on the same subject form a chain that runs sequentially in plan order;
//! independent chains are dispatched concurrently, bounded by a semaphore,
//! and every call still takes its token from the one shared rate limiter.
//!
//! Later phases see a working view of the snapshot that every converged
//! operation of an earlier phase has been folded into, so the gate plans
//! its reassignments against what the run has already changed.
//!
//! A failed operation never stops its phase. The only early exits are
//! run-level errors: a gate error, an audit write failure or a panicked
//! worker. Cancellation is observed at phase boundaries only; the phase in
//! progress always finishes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rostersync_contracts::{
    error::{SyncError, SyncResult},
    identity::{GroupKey, IdentityKey, RemoteId},
    operation::{
        ExecutionPhase, ManagedEntity, Operation, OperationKind, Plan, SkipReason, Subject,
    },
    outcome::{FailureKind, OutcomeRecord, OutcomeStatus},
    remote::{ApiError, ApiErrorKind, CallOutcome, RemoteCall},
    snapshot::Snapshot,
};

use crate::snapshot::SnapshotLoader;
use crate::traits::{AuditSink, ConvergenceVerifier, PhaseGate};
use crate::transport::RateLimitedTransport;

// ── Id resolution ────────────────────────────────────────────────────────────

/// Identity keys to remote ids, seeded from the snapshot and extended with
/// the ids returned by creation calls between phases.
#[derive(Debug, Clone, Default)]
pub struct IdMap {
    users: HashMap<IdentityKey, RemoteId>,
    groups: HashMap<GroupKey, RemoteId>,
    fields: HashMap<String, RemoteId>,
}

/// An entity created during the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Created {
    User(IdentityKey),
    Group(GroupKey),
    Field(String),
}

impl Created {
    fn of(kind: &OperationKind) -> Option<Self> {
        match kind {
            OperationKind::CreateUser { user, .. } => Some(Created::User(user.clone())),
            OperationKind::CreateGroup { group, .. } => Some(Created::Group(group.clone())),
            OperationKind::CreateCustomField { field } => Some(Created::Field(field.clone())),
            _ => None,
        }
    }
}

impl IdMap {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            users: snapshot
                .users
                .values()
                .map(|u| (u.key.clone(), u.remote_id.clone()))
                .collect(),
            groups: snapshot
                .groups
                .values()
                .map(|g| (g.key.clone(), g.remote_id.clone()))
                .collect(),
            fields: snapshot
                .custom_fields
                .values()
                .map(|f| (f.name.clone(), f.remote_id.clone()))
                .collect(),
        }
    }

    pub fn insert(&mut self, created: Created, id: RemoteId) {
        match created {
            Created::User(key) => self.users.insert(key, id),
            Created::Group(key) => self.groups.insert(key, id),
            Created::Field(name) => self.fields.insert(name, id),
        };
    }

    fn user(&self, key: &IdentityKey) -> Result<RemoteId, Unresolved> {
        self.users
            .get(key)
            .cloned()
            .ok_or_else(|| Unresolved(format!("no remote id for user '{key}'")))
    }

    fn group(&self, key: &GroupKey) -> Result<RemoteId, Unresolved> {
        self.groups
            .get(key)
            .cloned()
            .ok_or_else(|| Unresolved(format!("no remote id for group '{key}'")))
    }

    fn field(&self, name: &str) -> Result<RemoteId, Unresolved> {
        self.fields
            .get(name)
            .cloned()
            .ok_or_else(|| Unresolved(format!("no remote id for custom field '{name}'")))
    }
}

struct Unresolved(String);

impl From<Unresolved> for (FailureKind, String) {
    fn from(u: Unresolved) -> Self {
        (FailureKind::Unresolved, u.0)
    }
}

/// Translate an operation into the remote calls that carry it out.
///
/// # Errors
///
/// The failure to record, without any call made, when a referenced entity has
/// no remote id or a reassignment would hand entities back to the outgoing
/// user.
pub fn remote_calls(kind: &OperationKind, ids: &IdMap) -> Result<Vec<RemoteCall>, (FailureKind, String)> {
    let call = match kind {
        OperationKind::CreateUser { user, display_name } => RemoteCall::CreateUser {
            email: user.to_string(),
            name: display_name.clone(),
        },
        OperationKind::UpdateProfileFields { user, changes } => RemoteCall::UpdateProfile {
            user: ids.user(user)?,
            fields: changes
                .iter()
                .map(|c| (c.field.clone(), c.to.clone()))
                .collect(),
        },
        OperationKind::CreateCustomField { field } => RemoteCall::CreateCustomField {
            name: field.clone(),
        },
        OperationKind::SetCustomField { user, change } => RemoteCall::SetCustomField {
            user: ids.user(user)?,
            field: ids.field(&change.field)?,
            value: change.to.clone(),
        },
        OperationKind::SetManager { user, manager, .. } => RemoteCall::SetManager {
            user: ids.user(user)?,
            manager: ids.user(manager)?,
        },
        OperationKind::CreateGroup { name, .. } => RemoteCall::CreateGroup { name: name.clone() },
        OperationKind::AssignUserToGroup { user, group } => RemoteCall::AddGroupMember {
            group: ids.group(group)?,
            user: ids.user(user)?,
        },
        OperationKind::RemoveUserFromGroup { user, group } => RemoteCall::RemoveGroupMember {
            group: ids.group(group)?,
            user: ids.user(user)?,
        },
        OperationKind::AssignGroupManager { group, manager } => RemoteCall::AssignGroupManager {
            group: ids.group(group)?,
            manager: ids.user(manager)?,
        },
        OperationKind::RemoveManagerRole { group, manager } => RemoteCall::RemoveManagerRole {
            group: ids.group(group)?,
            manager: ids.user(manager)?,
        },
        OperationKind::DeleteGroup { group } => RemoteCall::DeleteGroup {
            group: ids.group(group)?,
        },
        OperationKind::ReassignManager { from, entity, to } => {
            if from == to {
                return Err((
                    FailureKind::ReassignmentFailed,
                    format!("replacement manager for {from} is the user being deactivated"),
                ));
            }
            let replacement = ids.user(to)?;
            return Ok(match entity {
                ManagedEntity::Report(report) => vec![RemoteCall::SetManager {
                    user: ids.user(report)?,
                    manager: replacement,
                }],
                ManagedEntity::Group(group) => {
                    let group = ids.group(group)?;
                    vec![
                        RemoteCall::AssignGroupManager {
                            group: group.clone(),
                            manager: replacement,
                        },
                        RemoteCall::RemoveManagerRole {
                            group,
                            manager: ids.user(from)?,
                        },
                    ]
                }
            });
        }
        OperationKind::DeactivateUser { user } => RemoteCall::DeactivateUser {
            user: ids.user(user)?,
        },
        OperationKind::VerifyUser { .. } => return Ok(Vec::new()),
    };
    Ok(vec![call])
}

/// Map a call error to the failure recorded for its operation.
pub fn failure_kind(error: &ApiError, exhausted: bool) -> FailureKind {
    match error.kind {
        ApiErrorKind::RateLimited { .. } if exhausted => FailureKind::RateLimitExhausted,
        ApiErrorKind::Unauthorized => FailureKind::Unauthorized,
        ApiErrorKind::NotFound => FailureKind::NotFound,
        ApiErrorKind::Conflict => FailureKind::Conflict,
        _ => FailureKind::Remote,
    }
}

// ── Outcome recording ────────────────────────────────────────────────────────

// Audit write and report append happen under one lock, so the report lists
// outcomes in the order the audit sink received them.
struct Recorder {
    audit: Arc<dyn AuditSink>,
    outcomes: Mutex<Vec<OutcomeRecord>>,
}

impl Recorder {
    fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            audit,
            outcomes: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, outcome: OutcomeRecord) -> SyncResult<()> {
        let mut outcomes = self.outcomes.lock().map_err(|_| SyncError::ExecutorFailed {
            reason: "outcome log lock poisoned".to_string(),
        })?;
        self.audit.record(&outcome)?;
        outcomes.push(outcome);
        Ok(())
    }

    fn take(&self) -> SyncResult<Vec<OutcomeRecord>> {
        let mut outcomes = self.outcomes.lock().map_err(|_| SyncError::ExecutorFailed {
            reason: "outcome log lock poisoned".to_string(),
        })?;
        Ok(std::mem::take(&mut *outcomes))
    }
}

// ── Executor ─────────────────────────────────────────────────────────────────

/// Everything the executor produced for one plan.
#[derive(Debug, Clone)]
pub struct Execution {
    /// One record per operation, in recording order.
    pub outcomes: Vec<OutcomeRecord>,
    /// True when at least one phase was skipped because of cancellation.
    pub cancelled: bool,
}

pub struct PhaseExecutor {
    transport: Arc<RateLimitedTransport>,
    verifier: Arc<dyn ConvergenceVerifier>,
    audit: Arc<dyn AuditSink>,
    max_concurrency: usize,
}

impl PhaseExecutor {
    pub fn new(
        transport: Arc<RateLimitedTransport>,
        verifier: Arc<dyn ConvergenceVerifier>,
        audit: Arc<dyn AuditSink>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            transport,
            verifier,
            audit,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Execute `plan` phase by phase.
    ///
    /// `snapshot` is the state the plan was computed from. It seeds the id map
    /// and the working view handed to the gate. The Verification phase reads
    /// a fresh one.
    ///
    /// # Errors
    ///
    /// Gate errors, audit write failures and worker panics. Operation
    /// failures are recorded, not returned.
    pub async fn execute(
        &self,
        plan: Plan,
        snapshot: &Snapshot,
        gate: &dyn PhaseGate,
        cancel: &CancellationToken,
    ) -> SyncResult<Execution> {
        let recorder = Arc::new(Recorder::new(self.audit.clone()));
        let mut ids = IdMap::from_snapshot(snapshot);
        let mut view = snapshot.clone();
        let mut cancelled = false;

        for (phase, operations) in plan.into_phases() {
            if operations.is_empty() {
                continue;
            }

            if cancel.is_cancelled() {
                if !cancelled {
                    warn!(phase = %phase, "run cancelled; remaining phases skipped");
                }
                cancelled = true;
                for op in &operations {
                    recorder.record(OutcomeRecord::skipped(op, SkipReason::Cancelled))?;
                }
                continue;
            }

            let operations = gate.before_phase(phase, operations, &view)?;
            info!(phase = %phase, operations = operations.len(), "phase started");

            if phase == ExecutionPhase::Verification {
                self.verify_phase(operations, &recorder).await?;
            } else {
                let done = self
                    .run_phase(operations, Arc::new(ids.clone()), &recorder)
                    .await?;
                for (entity, id) in done.created {
                    ids.insert(entity, id);
                }
                for kind in &done.converged {
                    view.record_converged(kind);
                }
            }

            info!(phase = %phase, "phase finished");
        }

        Ok(Execution {
            outcomes: recorder.take()?,
            cancelled,
        })
    }

    async fn run_phase(
        &self,
        operations: Vec<Operation>,
        ids: Arc<IdMap>,
        recorder: &Arc<Recorder>,
    ) -> SyncResult<ChainResult> {
        let mut chains: Vec<Vec<Operation>> = Vec::new();
        let mut chain_of: HashMap<Subject, usize> = HashMap::new();
        for op in operations {
            if let Some(reason) = op.skip {
                debug!(operation = %op.tag(), subject = %op.subject(), reason = %reason, "operation skipped");
                recorder.record(OutcomeRecord::skipped(&op, reason))?;
                continue;
            }
            let subject = op.subject();
            match chain_of.get(&subject) {
                Some(&idx) => chains[idx].push(op),
                None => {
                    chain_of.insert(subject, chains.len());
                    chains.push(vec![op]);
                }
            }
        }

        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let halt = CancellationToken::new();
        let mut workers = JoinSet::new();
        for chain in chains {
            let permits = permits.clone();
            let worker = ChainWorker {
                transport: self.transport.clone(),
                ids: ids.clone(),
                recorder: recorder.clone(),
                halt: halt.clone(),
            };
            workers.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| SyncError::ExecutorFailed { reason: e.to_string() })?;
                worker.run(chain).await
            });
        }

        let mut done = ChainResult::default();
        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(SyncError::ExecutorFailed {
                    reason: format!("worker task failed: {e}"),
                })
            });
            match result {
                Ok(mut chain) => {
                    done.created.append(&mut chain.created);
                    done.converged.append(&mut chain.converged);
                }
                Err(error) => {
                    halt.cancel();
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(done),
        }
    }

    async fn verify_phase(&self, operations: Vec<Operation>, recorder: &Recorder) -> SyncResult<()> {
        let fresh = SnapshotLoader::new(&self.transport).load().await;
        if let Err(error) = &fresh {
            warn!(error = %error, "verification snapshot could not be loaded");
        }

        for op in operations {
            if let Some(reason) = op.skip {
                recorder.record(OutcomeRecord::skipped(&op, reason))?;
                continue;
            }
            let record = match (&op.kind, &fresh) {
                (OperationKind::VerifyUser { expected }, Ok(snapshot)) => {
                    let report = self.verifier.verify(expected, snapshot.user(&expected.key));
                    if report.converged() {
                        OutcomeRecord::for_operation(&op, OutcomeStatus::AlreadySatisfied)
                    } else {
                        warn!(user = %expected.key, drifts = report.drifts.len(), "user has not converged");
                        OutcomeRecord::failed(&op, FailureKind::Drift, report.summary())
                    }
                }
                (OperationKind::VerifyUser { .. }, Err(error)) => OutcomeRecord::failed(
                    &op,
                    FailureKind::Remote,
                    format!("verification reload failed: {error}"),
                ),
                _ => OutcomeRecord::failed(
                    &op,
                    FailureKind::Remote,
                    "not a verification operation",
                ),
            };
            recorder.record(record)?;
        }
        Ok(())
    }
}

// ── Chain worker ─────────────────────────────────────────────────────────────

/// What a chain (or a whole phase) leaves behind for later phases.
#[derive(Default)]
struct ChainResult {
    created: Vec<(Created, RemoteId)>,
    converged: Vec<OperationKind>,
}

struct ChainWorker {
    transport: Arc<RateLimitedTransport>,
    ids: Arc<IdMap>,
    recorder: Arc<Recorder>,
    halt: CancellationToken,
}

impl ChainWorker {
    async fn run(self, chain: Vec<Operation>) -> SyncResult<ChainResult> {
        let mut done = ChainResult::default();
        let mut failed_reassignment: Option<String> = None;

        for op in chain {
            if self.halt.is_cancelled() {
                break;
            }

            let record = match (&op.kind, &failed_reassignment) {
                (OperationKind::DeactivateUser { .. }, Some(detail)) => {
                    OutcomeRecord::failed(&op, FailureKind::ReassignmentFailed, detail.clone())
                }
                _ => {
                    let (record, new_id) = self.run_operation(&op).await;
                    if let (Some(entity), Some(id)) = (Created::of(&op.kind), new_id) {
                        done.created.push((entity, id));
                    }
                    record
                }
            };

            if matches!(op.kind, OperationKind::ReassignManager { .. }) && record.status.is_failed() {
                failed_reassignment = Some(format!(
                    "could not hand over everything managed by {}",
                    op.subject()
                ));
            }

            match &record.status {
                OutcomeStatus::Failed { kind, detail } => warn!(
                    operation = %op.tag(),
                    subject = %op.subject(),
                    kind = ?kind,
                    detail = %detail,
                    "operation failed"
                ),
                status => debug!(
                    operation = %op.tag(),
                    subject = %op.subject(),
                    status = status.label(),
                    attempts = record.attempts,
                    "operation finished"
                ),
            }

            let converged = record.status.is_converged();
            if let Err(error) = self.recorder.record(record) {
                self.halt.cancel();
                return Err(error);
            }
            if converged {
                done.converged.push(op.kind);
            }
        }
        Ok(done)
    }

    async fn run_operation(&self, op: &Operation) -> (OutcomeRecord, Option<RemoteId>) {
        let calls = match remote_calls(&op.kind, &self.ids) {
            Ok(calls) => calls,
            Err((kind, detail)) => return (OutcomeRecord::failed(op, kind, detail), None),
        };

        let mut attempts = 0;
        let mut backoff_ms = Vec::new();
        let mut all_already = true;
        let mut created = None;
        let mut failure = None;

        for call in &calls {
            let attempted = self.transport.call(call).await;
            attempts += attempted.attempts;
            backoff_ms.extend(attempted.delays_ms());
            match attempted.result {
                Ok(CallOutcome::AlreadySatisfied) => {}
                Ok(CallOutcome::Applied { created: id }) => {
                    all_already = false;
                    if id.is_some() {
                        created = id;
                    }
                }
                Err(error) => {
                    failure = Some((failure_kind(&error, attempted.exhausted), error.to_string()));
                    break;
                }
            }
        }

        let status = match failure {
            Some((kind, detail)) => OutcomeStatus::Failed { kind, detail },
            None if all_already => OutcomeStatus::AlreadySatisfied,
            None => OutcomeStatus::Succeeded,
        };
        let mut record = OutcomeRecord::for_operation(op, status);
        record.attempts = attempts;
        record.backoff_ms = backoff_ms;
        (record, created)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
