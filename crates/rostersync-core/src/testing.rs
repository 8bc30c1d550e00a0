//! Test doubles for the trait seams, shared by this crate's unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use rostersync_contracts::{
    error::{SyncError, SyncResult},
    identity::{RemoteId, RunId},
    operation::{ExecutionPhase, ExpectedUser, Operation, Plan},
    outcome::OutcomeRecord,
    remote::{ApiError, ApiErrorKind, ApiResult, CallOutcome, RemoteCall, RemoteGroup, RemoteUser},
    scope::Scope,
    snapshot::{CustomFieldDef, ObservedUser, Snapshot, UserStatus},
    verify::DriftReport,
};

use crate::traits::{AuditSink, ConvergenceVerifier, PhaseGate, PlanFilter, WorkspaceApi};

type CallMatcher = Box<dyn Fn(&RemoteCall) -> bool + Send>;

#[derive(Default)]
struct Script {
    users: Vec<RemoteUser>,
    groups: Vec<RemoteGroup>,
    fields: Vec<CustomFieldDef>,
    rejections: VecDeque<ApiError>,
    failures: Vec<(CallMatcher, ApiError)>,
    forbidden: Vec<Scope>,
    listing_error: Option<ApiError>,
    calls: Vec<RemoteCall>,
    next_id: u32,
    apply_delay: Option<Duration>,
}

/// Serves fixed listings and records every `apply` without changing state.
#[derive(Default)]
pub struct ScriptedApi {
    script: Mutex<Script>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedApi {
    pub fn with_user(self, id: &str, email: &str, name: &str) -> Self {
        self.script.lock().unwrap().users.push(RemoteUser {
            id: RemoteId::new(id),
            email: email.to_string(),
            name: name.to_string(),
            status: UserStatus::Active,
            profile: Default::default(),
            custom_fields: Default::default(),
            manager_id: None,
        });
        self
    }

    pub fn with_manager(self, user_id: &str, manager_id: &str) -> Self {
        {
            let mut script = self.script.lock().unwrap();
            if let Some(user) = script.users.iter_mut().find(|u| u.id.0 == user_id) {
                user.manager_id = Some(RemoteId::new(manager_id));
            }
        }
        self
    }

    pub fn with_group(self, id: &str, name: &str, members: &[&str], managers: &[&str]) -> Self {
        self.script.lock().unwrap().groups.push(RemoteGroup {
            id: RemoteId::new(id),
            name: name.to_string(),
            member_ids: members.iter().map(|m| RemoteId::new(*m)).collect(),
            manager_ids: managers.iter().map(|m| RemoteId::new(*m)).collect(),
        });
        self
    }

    /// Every `apply` holds its slot for `delay` before answering.
    pub fn with_apply_delay(self, delay: Duration) -> Self {
        self.script.lock().unwrap().apply_delay = Some(delay);
        self
    }

    /// The most `apply` calls that were ever in progress at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn with_field(self, id: &str, name: &str) -> Self {
        self.script.lock().unwrap().fields.push(CustomFieldDef {
            remote_id: RemoteId::new(id),
            name: name.to_string(),
        });
        self
    }

    /// The next `n` calls of any kind fail with `error`.
    pub fn reject_next(&self, n: usize, error: ApiError) {
        let mut script = self.script.lock().unwrap();
        for _ in 0..n {
            script.rejections.push_back(error.clone());
        }
    }

    /// Every `apply` matching `matcher` fails with `error`.
    pub fn fail_when(
        &self,
        matcher: impl Fn(&RemoteCall) -> bool + Send + 'static,
        error: ApiError,
    ) {
        self.script
            .lock()
            .unwrap()
            .failures
            .push((Box::new(matcher), error));
    }

    pub fn forbid(&self, scope: Scope) {
        self.script.lock().unwrap().forbidden.push(scope);
    }

    pub fn fail_listings(&self, error: ApiError) {
        self.script.lock().unwrap().listing_error = Some(error);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.script.lock().unwrap().calls.clone()
    }

    fn listing<T: Clone>(&self, pick: impl Fn(&Script) -> Vec<T>) -> ApiResult<Vec<T>> {
        let mut script = self.script.lock().unwrap();
        if let Some(err) = script.rejections.pop_front() {
            return Err(err);
        }
        if let Some(err) = &script.listing_error {
            return Err(err.clone());
        }
        Ok(pick(&script))
    }
}

#[async_trait]
impl WorkspaceApi for ScriptedApi {
    async fn probe(&self, scope: Scope) -> ApiResult<()> {
        let mut script = self.script.lock().unwrap();
        if let Some(err) = script.rejections.pop_front() {
            return Err(err);
        }
        if script.forbidden.contains(&scope) {
            return Err(ApiError::new(ApiErrorKind::Unauthorized, scope.as_str()));
        }
        Ok(())
    }

    async fn list_users(&self) -> ApiResult<Vec<RemoteUser>> {
        self.listing(|s| s.users.clone())
    }

    async fn list_groups(&self) -> ApiResult<Vec<RemoteGroup>> {
        self.listing(|s| s.groups.clone())
    }

    async fn list_custom_fields(&self) -> ApiResult<Vec<CustomFieldDef>> {
        self.listing(|s| s.fields.clone())
    }

    async fn apply(&self, call: &RemoteCall) -> ApiResult<CallOutcome> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let (answer, delay) = self.answer(call);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        answer
    }
}

impl ScriptedApi {
    fn answer(&self, call: &RemoteCall) -> (ApiResult<CallOutcome>, Option<Duration>) {
        let mut script = self.script.lock().unwrap();
        let delay = script.apply_delay;
        (Self::respond(&mut script, call), delay)
    }

    fn respond(script: &mut Script, call: &RemoteCall) -> ApiResult<CallOutcome> {
        script.calls.push(call.clone());
        if let Some(err) = script.rejections.pop_front() {
            return Err(err);
        }
        if let Some((_, err)) = script.failures.iter().find(|(m, _)| m(call)) {
            return Err(err.clone());
        }
        if matches!(call, RemoteCall::AddGroupMember { .. })
            && script.forbidden.contains(&Scope::GroupsWrite)
        {
            return Err(ApiError::new(ApiErrorKind::Unauthorized, "groups:write"));
        }
        match call {
            RemoteCall::CreateUser { .. }
            | RemoteCall::CreateGroup { .. }
            | RemoteCall::CreateCustomField { .. } => {
                script.next_id += 1;
                Ok(CallOutcome::created(RemoteId::new(format!(
                    "new-{}",
                    script.next_id
                ))))
            }
            _ => Ok(CallOutcome::applied()),
        }
    }
}

/// Keeps every outcome in memory; optionally refuses every write.
#[derive(Default)]
pub struct RecordingAudit {
    records: Mutex<Vec<OutcomeRecord>>,
    finalized: Mutex<Vec<RunId>>,
    fail: bool,
}

impl RecordingAudit {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<OutcomeRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn finalized(&self) -> Vec<RunId> {
        self.finalized.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingAudit {
    fn record(&self, outcome: &OutcomeRecord) -> SyncResult<()> {
        if self.fail {
            return Err(SyncError::AuditWriteFailed {
                reason: "disk full".to_string(),
            });
        }
        self.records.lock().unwrap().push(outcome.clone());
        Ok(())
    }

    fn finalize(&self, run_id: &RunId) -> SyncResult<()> {
        self.finalized.lock().unwrap().push(run_id.clone());
        Ok(())
    }
}

/// Lets every phase through unchanged.
pub struct PassGate;

impl PhaseGate for PassGate {
    fn before_phase(
        &self,
        _phase: ExecutionPhase,
        operations: Vec<Operation>,
        _snapshot: &Snapshot,
    ) -> SyncResult<Vec<Operation>> {
        Ok(operations)
    }
}

impl PlanFilter for PassGate {
    fn filter(&self, plan: Plan) -> Plan {
        plan
    }
}

/// Reports every user as converged.
pub struct TrustingVerifier;

impl ConvergenceVerifier for TrustingVerifier {
    fn verify(&self, expected: &ExpectedUser, _observed: Option<&ObservedUser>) -> DriftReport {
        DriftReport {
            key: expected.key.clone(),
            drifts: Vec::new(),
        }
    }
}
