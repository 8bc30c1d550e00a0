//! `InMemoryWorkspace`: a stand-in for the remote workspace service.
//!
//! State lives behind a `Mutex` and is mutated by `apply` the way the real
//! service would: creates return fresh ids, re-asserting an existing
//! membership or removing an absent one answers `AlreadySatisfied`, and
//! unknown ids are `NotFound`.
//!
//! Faults are injected per call with a matcher and a count, which is how the
//! scenarios produce rate limits, missing scopes and failed reassignments.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use rostersync_contracts::{
    identity::RemoteId,
    remote::{ApiError, ApiErrorKind, ApiResult, CallOutcome, RemoteCall, RemoteGroup, RemoteUser},
    scope::Scope,
    snapshot::{CustomFieldDef, UserStatus},
};
use rostersync_core::traits::WorkspaceApi;

/// Selects the calls a fault applies to.
type CallMatcher = Box<dyn Fn(&RemoteCall) -> bool + Send + Sync>;

struct Fault {
    matcher: CallMatcher,
    error: ApiError,
    remaining: u32,
}

#[derive(Default)]
struct WorkspaceState {
    users: BTreeMap<RemoteId, RemoteUser>,
    groups: BTreeMap<RemoteId, RemoteGroup>,
    fields: BTreeMap<RemoteId, CustomFieldDef>,
    next_id: u64,
    forbidden: BTreeSet<Scope>,
    faults: Vec<Fault>,
    calls: Vec<RemoteCall>,
}

impl WorkspaceState {
    fn mint(&mut self, prefix: &str) -> RemoteId {
        self.next_id += 1;
        RemoteId::new(format!("{}-new-{}", prefix, self.next_id))
    }

    fn take_fault(&mut self, call: &RemoteCall) -> Option<ApiError> {
        let fault = self
            .faults
            .iter_mut()
            .find(|f| f.remaining > 0 && (f.matcher)(call))?;
        fault.remaining -= 1;
        Some(fault.error.clone())
    }

    fn user_mut(&mut self, id: &RemoteId) -> ApiResult<&mut RemoteUser> {
        self.users
            .get_mut(id)
            .ok_or_else(|| ApiError::new(ApiErrorKind::NotFound, format!("user {} not found", id)))
    }

    fn group_mut(&mut self, id: &RemoteId) -> ApiResult<&mut RemoteGroup> {
        self.groups
            .get_mut(id)
            .ok_or_else(|| ApiError::new(ApiErrorKind::NotFound, format!("group {} not found", id)))
    }

    fn require_user(&self, id: &RemoteId) -> ApiResult<()> {
        if self.users.contains_key(id) {
            Ok(())
        } else {
            Err(ApiError::new(ApiErrorKind::NotFound, format!("user {} not found", id)))
        }
    }

    fn mutate(&mut self, call: &RemoteCall) -> ApiResult<CallOutcome> {
        match call {
            RemoteCall::CreateUser { email, name } => {
                let exists = self
                    .users
                    .values()
                    .any(|u| u.email.eq_ignore_ascii_case(email));
                if exists {
                    return Ok(CallOutcome::AlreadySatisfied);
                }
                let id = self.mint("u");
                self.users.insert(
                    id.clone(),
                    RemoteUser {
                        id: id.clone(),
                        email: email.clone(),
                        name: name.clone(),
                        status: UserStatus::Active,
                        profile: BTreeMap::new(),
                        custom_fields: BTreeMap::new(),
                        manager_id: None,
                    },
                );
                Ok(CallOutcome::created(id))
            }
            RemoteCall::UpdateProfile { user, fields } => {
                let user = self.user_mut(user)?;
                for (field, value) in fields {
                    if field == rostersync_planner::NAME_FIELD {
                        user.name = value.clone();
                    } else {
                        user.profile.insert(field.clone(), value.clone());
                    }
                }
                Ok(CallOutcome::applied())
            }
            RemoteCall::CreateCustomField { name } => {
                if self.fields.values().any(|f| &f.name == name) {
                    return Ok(CallOutcome::AlreadySatisfied);
                }
                let id = self.mint("f");
                self.fields.insert(
                    id.clone(),
                    CustomFieldDef {
                        remote_id: id.clone(),
                        name: name.clone(),
                    },
                );
                Ok(CallOutcome::created(id))
            }
            RemoteCall::SetCustomField { user, field, value } => {
                if !self.fields.contains_key(field) {
                    return Err(ApiError::new(
                        ApiErrorKind::NotFound,
                        format!("custom field {} not found", field),
                    ));
                }
                self.user_mut(user)?
                    .custom_fields
                    .insert(field.clone(), value.clone());
                Ok(CallOutcome::applied())
            }
            RemoteCall::SetManager { user, manager } => {
                self.require_user(manager)?;
                let user = self.user_mut(user)?;
                if user.manager_id.as_ref() == Some(manager) {
                    return Ok(CallOutcome::AlreadySatisfied);
                }
                user.manager_id = Some(manager.clone());
                Ok(CallOutcome::applied())
            }
            RemoteCall::CreateGroup { name } => {
                if self
                    .groups
                    .values()
                    .any(|g| g.name.trim().eq_ignore_ascii_case(name.trim()))
                {
                    return Ok(CallOutcome::AlreadySatisfied);
                }
                let id = self.mint("g");
                self.groups.insert(
                    id.clone(),
                    RemoteGroup {
                        id: id.clone(),
                        name: name.clone(),
                        member_ids: Vec::new(),
                        manager_ids: Vec::new(),
                    },
                );
                Ok(CallOutcome::created(id))
            }
            RemoteCall::AddGroupMember { group, user } => {
                self.require_user(user)?;
                Ok(insert_unique(&mut self.group_mut(group)?.member_ids, user))
            }
            RemoteCall::AssignGroupManager { group, manager } => {
                self.require_user(manager)?;
                Ok(insert_unique(&mut self.group_mut(group)?.manager_ids, manager))
            }
            RemoteCall::RemoveGroupMember { group, user } => match self.groups.get_mut(group) {
                Some(g) => Ok(remove_present(&mut g.member_ids, user)),
                None => Ok(CallOutcome::AlreadySatisfied),
            },
            RemoteCall::RemoveManagerRole { group, manager } => match self.groups.get_mut(group) {
                Some(g) => Ok(remove_present(&mut g.manager_ids, manager)),
                None => Ok(CallOutcome::AlreadySatisfied),
            },
            RemoteCall::DeleteGroup { group } => match self.groups.remove(group) {
                Some(_) => Ok(CallOutcome::applied()),
                None => Ok(CallOutcome::AlreadySatisfied),
            },
            RemoteCall::DeactivateUser { user } => {
                let user = self.user_mut(user)?;
                if user.status == UserStatus::Inactive {
                    return Ok(CallOutcome::AlreadySatisfied);
                }
                user.status = UserStatus::Inactive;
                Ok(CallOutcome::applied())
            }
        }
    }
}

fn insert_unique(ids: &mut Vec<RemoteId>, id: &RemoteId) -> CallOutcome {
    if ids.contains(id) {
        CallOutcome::AlreadySatisfied
    } else {
        ids.push(id.clone());
        CallOutcome::applied()
    }
}

fn remove_present(ids: &mut Vec<RemoteId>, id: &RemoteId) -> CallOutcome {
    let before = ids.len();
    ids.retain(|x| x != id);
    if ids.len() == before {
        CallOutcome::AlreadySatisfied
    } else {
        CallOutcome::applied()
    }
}

fn needs_groups_write(call: &RemoteCall) -> bool {
    matches!(
        call,
        RemoteCall::CreateGroup { .. }
            | RemoteCall::AddGroupMember { .. }
            | RemoteCall::RemoveGroupMember { .. }
            | RemoteCall::AssignGroupManager { .. }
            | RemoteCall::RemoveManagerRole { .. }
            | RemoteCall::DeleteGroup { .. }
    )
}

fn unavailable() -> ApiError {
    ApiError::new(ApiErrorKind::Transport, "workspace state unavailable")
}

#[derive(Default)]
pub struct InMemoryWorkspace {
    state: Mutex<WorkspaceState>,
}

impl InMemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Seeding ──────────────────────────────────────────────────────────────

    pub fn with_user(self, user: RemoteUser) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.users.insert(user.id.clone(), user);
        }
        self
    }

    pub fn with_group(self, group: RemoteGroup) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.groups.insert(group.id.clone(), group);
        }
        self
    }

    pub fn with_custom_field(self, field: CustomFieldDef) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.fields.insert(field.remote_id.clone(), field);
        }
        self
    }

    // ── Fault injection ──────────────────────────────────────────────────────

    /// Answer the next `times` calls matching `matcher` with `error`.
    pub fn inject(
        &self,
        matcher: impl Fn(&RemoteCall) -> bool + Send + Sync + 'static,
        error: ApiError,
        times: u32,
    ) {
        if let Ok(mut state) = self.state.lock() {
            state.faults.push(Fault {
                matcher: Box::new(matcher),
                error,
                remaining: times,
            });
        }
    }

    /// Answer the next `times` matching calls with HTTP 429.
    pub fn rate_limit(&self, matcher: impl Fn(&RemoteCall) -> bool + Send + Sync + 'static, times: u32) {
        self.inject(matcher, ApiError::rate_limited(), times);
    }

    /// Make the credential lack `scope`.
    pub fn forbid(&self, scope: Scope) {
        if let Ok(mut state) = self.state.lock() {
            state.forbidden.insert(scope);
        }
    }

    // ── Inspection ───────────────────────────────────────────────────────────

    /// Every `apply` call received, in arrival order, including rejected ones.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state
            .lock()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    pub fn user_by_email(&self, email: &str) -> Option<RemoteUser> {
        let state = self.state.lock().ok()?;
        state
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
    }

    pub fn group_by_name(&self, name: &str) -> Option<RemoteGroup> {
        let state = self.state.lock().ok()?;
        state
            .groups
            .values()
            .find(|g| g.name.trim().eq_ignore_ascii_case(name.trim()))
            .cloned()
    }
}

#[async_trait]
impl WorkspaceApi for InMemoryWorkspace {
    async fn probe(&self, scope: Scope) -> ApiResult<()> {
        let state = self.state.lock().map_err(|_| unavailable())?;
        if state.forbidden.contains(&scope) {
            return Err(ApiError::new(
                ApiErrorKind::Unauthorized,
                format!("credential lacks {}", scope),
            ));
        }
        Ok(())
    }

    async fn list_users(&self) -> ApiResult<Vec<RemoteUser>> {
        let state = self.state.lock().map_err(|_| unavailable())?;
        Ok(state.users.values().cloned().collect())
    }

    async fn list_groups(&self) -> ApiResult<Vec<RemoteGroup>> {
        let state = self.state.lock().map_err(|_| unavailable())?;
        Ok(state.groups.values().cloned().collect())
    }

    async fn list_custom_fields(&self) -> ApiResult<Vec<CustomFieldDef>> {
        let state = self.state.lock().map_err(|_| unavailable())?;
        Ok(state.fields.values().cloned().collect())
    }

    async fn apply(&self, call: &RemoteCall) -> ApiResult<CallOutcome> {
        let mut state = self.state.lock().map_err(|_| unavailable())?;
        state.calls.push(call.clone());

        if let Some(error) = state.take_fault(call) {
            debug!(call = ?call, error = %error, "injected fault");
            return Err(error);
        }
        if needs_groups_write(call) && state.forbidden.contains(&Scope::GroupsWrite) {
            return Err(ApiError::new(
                ApiErrorKind::Unauthorized,
                format!("credential lacks {}", Scope::GroupsWrite),
            ));
        }
        state.mutate(call)
    }
}
