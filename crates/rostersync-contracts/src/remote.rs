//! The remote-service boundary.
//!
//! The HTTP client is an external collaborator. It speaks in `RemoteCall`s
//! (identity keys already resolved to remote ids) and answers with the
//! three-way result the engine needs: applied, already satisfied, or an
//! `ApiError` that says whether retrying can help.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{identity::RemoteId, snapshot::UserStatus};

/// A user as returned by the workspace API, before snapshot assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: RemoteId,
    pub email: String,
    pub name: String,
    pub status: UserStatus,
    #[serde(default)]
    pub profile: BTreeMap<String, String>,
    /// Custom-field values keyed by custom-field remote id.
    #[serde(default)]
    pub custom_fields: BTreeMap<RemoteId, String>,
    #[serde(default)]
    pub manager_id: Option<RemoteId>,
}

/// A user group as returned by the workspace API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteGroup {
    pub id: RemoteId,
    pub name: String,
    #[serde(default)]
    pub member_ids: Vec<RemoteId>,
    #[serde(default)]
    pub manager_ids: Vec<RemoteId>,
}

/// One mutating request against the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteCall {
    CreateUser { email: String, name: String },
    UpdateProfile { user: RemoteId, fields: BTreeMap<String, String> },
    CreateCustomField { name: String },
    SetCustomField { user: RemoteId, field: RemoteId, value: String },
    SetManager { user: RemoteId, manager: RemoteId },
    CreateGroup { name: String },
    AddGroupMember { group: RemoteId, user: RemoteId },
    RemoveGroupMember { group: RemoteId, user: RemoteId },
    AssignGroupManager { group: RemoteId, manager: RemoteId },
    RemoveManagerRole { group: RemoteId, manager: RemoteId },
    DeleteGroup { group: RemoteId },
    DeactivateUser { user: RemoteId },
}

impl RemoteCall {
    /// Calls whose target being absent already means "done".
    pub fn is_cleanup(&self) -> bool {
        matches!(
            self,
            RemoteCall::RemoveGroupMember { .. }
                | RemoteCall::RemoveManagerRole { .. }
                | RemoteCall::DeleteGroup { .. }
                | RemoteCall::DeactivateUser { .. }
        )
    }

    /// Calls the service may reject with an "already exists" style message.
    pub fn is_idempotent_assert(&self) -> bool {
        matches!(
            self,
            RemoteCall::CreateUser { .. }
                | RemoteCall::CreateCustomField { .. }
                | RemoteCall::CreateGroup { .. }
                | RemoteCall::AddGroupMember { .. }
                | RemoteCall::AssignGroupManager { .. }
                | RemoteCall::SetManager { .. }
        )
    }
}

/// Non-error results of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallOutcome {
    /// The change was made. Creation calls return the new entity's id.
    Applied { created: Option<RemoteId> },
    /// The service reported the desired state already held.
    AlreadySatisfied,
}

impl CallOutcome {
    pub fn applied() -> Self {
        CallOutcome::Applied { created: None }
    }

    pub fn created(id: RemoteId) -> Self {
        CallOutcome::Applied { created: Some(id) }
    }
}

/// Classification of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiErrorKind {
    RateLimited { retry_after_ms: Option<u64> },
    Unauthorized,
    NotFound,
    Conflict,
    /// 5xx from the service.
    Server,
    /// Connection-level failure; nothing was received.
    Transport,
    Other,
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiErrorKind::RateLimited { .. } => f.write_str("rate limited"),
            ApiErrorKind::Unauthorized => f.write_str("unauthorized"),
            ApiErrorKind::NotFound => f.write_str("not found"),
            ApiErrorKind::Conflict => f.write_str("conflict"),
            ApiErrorKind::Server => f.write_str("server error"),
            ApiErrorKind::Transport => f.write_str("transport error"),
            ApiErrorKind::Other => f.write_str("remote error"),
        }
    }
}

/// An error surfaced by the remote client for a single call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited() -> Self {
        Self::new(
            ApiErrorKind::RateLimited {
                retry_after_ms: None,
            },
            "too many requests",
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self.kind, ApiErrorKind::RateLimited { .. })
    }

    /// Rate limits, server errors and transport failures may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ApiErrorKind::RateLimited { .. } | ApiErrorKind::Server | ApiErrorKind::Transport
        )
    }
}

/// Result of one remote call.
pub type ApiResult<T> = Result<T, ApiError>;
