//! Planned operations, execution phases and the plan itself.
//!
//! An `Operation` is a typed, idempotent unit of change. Its phase is fixed by
//! its kind at construction, so the plan can never hold an operation in a
//! phase earlier than the one it declares.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::{GroupKey, IdentityKey, OperationId};

/// Strictly ordered execution stages. Derived `Ord` follows declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ExecutionPhase {
    Cleanup,
    Provision,
    ProfileUpdate,
    GroupSync,
    Deactivation,
    Verification,
}

impl ExecutionPhase {
    /// Every phase in execution order.
    pub const ALL: [ExecutionPhase; 6] = [
        ExecutionPhase::Cleanup,
        ExecutionPhase::Provision,
        ExecutionPhase::ProfileUpdate,
        ExecutionPhase::GroupSync,
        ExecutionPhase::Deactivation,
        ExecutionPhase::Verification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPhase::Cleanup => "cleanup",
            ExecutionPhase::Provision => "provision",
            ExecutionPhase::ProfileUpdate => "profile-update",
            ExecutionPhase::GroupSync => "group-sync",
            ExecutionPhase::Deactivation => "deactivation",
            ExecutionPhase::Verification => "verification",
        }
    }
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something a user manages and that must be handed over before the user is
/// deactivated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ManagedEntity {
    /// A group the user is a manager of.
    Group(GroupKey),
    /// A user whose manager is this user.
    Report(IdentityKey),
}

/// A single field delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub from: Option<String>,
    pub to: String,
}

/// The state a roster user is expected to be in once the run has converged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedUser {
    pub key: IdentityKey,
    pub display_name: String,
    pub profile: BTreeMap<String, String>,
    pub custom_fields: BTreeMap<String, String>,
    pub manager: Option<IdentityKey>,
    pub groups: BTreeSet<GroupKey>,
}

/// The change an operation makes. Each variant maps to one or more remote
/// calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    CreateUser { user: IdentityKey, display_name: String },
    UpdateProfileFields { user: IdentityKey, changes: Vec<FieldChange> },
    CreateCustomField { field: String },
    SetCustomField { user: IdentityKey, change: FieldChange },
    SetManager { user: IdentityKey, manager: IdentityKey, previous: Option<IdentityKey> },
    CreateGroup { group: GroupKey, name: String },
    AssignUserToGroup { user: IdentityKey, group: GroupKey },
    RemoveUserFromGroup { user: IdentityKey, group: GroupKey },
    AssignGroupManager { group: GroupKey, manager: IdentityKey },
    RemoveManagerRole { group: GroupKey, manager: IdentityKey },
    DeleteGroup { group: GroupKey },
    ReassignManager { from: IdentityKey, entity: ManagedEntity, to: IdentityKey },
    DeactivateUser { user: IdentityKey },
    VerifyUser { expected: ExpectedUser },
}

/// Discriminant of `OperationKind`, used in audit rows and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationTag {
    CreateUser,
    UpdateProfileFields,
    CreateCustomField,
    SetCustomField,
    SetManager,
    CreateGroup,
    AssignUserToGroup,
    RemoveUserFromGroup,
    AssignGroupManager,
    RemoveManagerRole,
    DeleteGroup,
    ReassignManager,
    DeactivateUser,
    VerifyUser,
}

impl fmt::Display for OperationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl OperationKind {
    pub fn tag(&self) -> OperationTag {
        match self {
            OperationKind::CreateUser { .. } => OperationTag::CreateUser,
            OperationKind::UpdateProfileFields { .. } => OperationTag::UpdateProfileFields,
            OperationKind::CreateCustomField { .. } => OperationTag::CreateCustomField,
            OperationKind::SetCustomField { .. } => OperationTag::SetCustomField,
            OperationKind::SetManager { .. } => OperationTag::SetManager,
            OperationKind::CreateGroup { .. } => OperationTag::CreateGroup,
            OperationKind::AssignUserToGroup { .. } => OperationTag::AssignUserToGroup,
            OperationKind::RemoveUserFromGroup { .. } => OperationTag::RemoveUserFromGroup,
            OperationKind::AssignGroupManager { .. } => OperationTag::AssignGroupManager,
            OperationKind::RemoveManagerRole { .. } => OperationTag::RemoveManagerRole,
            OperationKind::DeleteGroup { .. } => OperationTag::DeleteGroup,
            OperationKind::ReassignManager { .. } => OperationTag::ReassignManager,
            OperationKind::DeactivateUser { .. } => OperationTag::DeactivateUser,
            OperationKind::VerifyUser { .. } => OperationTag::VerifyUser,
        }
    }

    /// The phase this kind of change belongs to.
    pub fn phase(&self) -> ExecutionPhase {
        match self {
            OperationKind::RemoveManagerRole { .. } | OperationKind::DeleteGroup { .. } => {
                ExecutionPhase::Cleanup
            }
            OperationKind::CreateUser { .. }
            | OperationKind::CreateCustomField { .. }
            | OperationKind::CreateGroup { .. } => ExecutionPhase::Provision,
            OperationKind::UpdateProfileFields { .. }
            | OperationKind::SetCustomField { .. }
            | OperationKind::SetManager { .. } => ExecutionPhase::ProfileUpdate,
            OperationKind::AssignUserToGroup { .. }
            | OperationKind::RemoveUserFromGroup { .. }
            | OperationKind::AssignGroupManager { .. } => ExecutionPhase::GroupSync,
            OperationKind::ReassignManager { .. } | OperationKind::DeactivateUser { .. } => {
                ExecutionPhase::Deactivation
            }
            OperationKind::VerifyUser { .. } => ExecutionPhase::Verification,
        }
    }

    /// The entity whose operations within one phase must run one after the
    /// other, in plan order.
    pub fn subject(&self) -> Subject {
        match self {
            OperationKind::CreateUser { user, .. }
            | OperationKind::UpdateProfileFields { user, .. }
            | OperationKind::SetCustomField { user, .. }
            | OperationKind::SetManager { user, .. }
            | OperationKind::AssignUserToGroup { user, .. }
            | OperationKind::RemoveUserFromGroup { user, .. }
            | OperationKind::DeactivateUser { user } => Subject::User(user.clone()),
            OperationKind::ReassignManager { from, .. } => Subject::User(from.clone()),
            OperationKind::VerifyUser { expected } => Subject::User(expected.key.clone()),
            OperationKind::CreateCustomField { field } => Subject::Field(field.clone()),
            OperationKind::CreateGroup { group, .. }
            | OperationKind::AssignGroupManager { group, .. }
            | OperationKind::RemoveManagerRole { group, .. }
            | OperationKind::DeleteGroup { group } => Subject::Group(group.clone()),
        }
    }

    /// The group this operation touches, if any.
    pub fn group(&self) -> Option<&GroupKey> {
        match self {
            OperationKind::CreateGroup { group, .. }
            | OperationKind::AssignUserToGroup { group, .. }
            | OperationKind::RemoveUserFromGroup { group, .. }
            | OperationKind::AssignGroupManager { group, .. }
            | OperationKind::RemoveManagerRole { group, .. }
            | OperationKind::DeleteGroup { group } => Some(group),
            OperationKind::ReassignManager { entity: ManagedEntity::Group(group), .. } => {
                Some(group)
            }
            _ => None,
        }
    }

    /// True for removals, deletions and deactivations.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            OperationKind::RemoveUserFromGroup { .. }
                | OperationKind::RemoveManagerRole { .. }
                | OperationKind::DeleteGroup { .. }
                | OperationKind::DeactivateUser { .. }
        )
    }

    /// False only for read-only checks.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, OperationKind::VerifyUser { .. })
    }
}

/// The serialisable key operations are chained on within a phase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Subject {
    User(IdentityKey),
    Group(GroupKey),
    Field(String),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::User(k) => write!(f, "{k}"),
            Subject::Group(g) => write!(f, "group:{g}"),
            Subject::Field(n) => write!(f, "field:{n}"),
        }
    }
}

/// Why an operation will not be attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Destructive change to a protected group or user.
    Protected,
    /// Deactivation without the confirmation token.
    Unconfirmed,
    /// The run was cancelled before this operation's phase started.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::Protected => "protected",
            SkipReason::Unconfirmed => "unconfirmed",
            SkipReason::Cancelled => "cancelled",
        })
    }
}

/// One planned unit of change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub phase: ExecutionPhase,
    pub kind: OperationKind,
    /// Roster position used as the stable tie-break within a phase.
    pub position: usize,
    /// Set by the protected-entity filter when the target is protected.
    pub protected: bool,
    /// `Some` when the operation must be recorded as skipped, not attempted.
    pub skip: Option<SkipReason>,
}

impl Operation {
    /// Create an operation in the phase its kind declares.
    pub fn new(kind: OperationKind, position: usize) -> Self {
        Self {
            id: OperationId::new(),
            phase: kind.phase(),
            kind,
            position,
            protected: false,
            skip: None,
        }
    }

    pub fn tag(&self) -> OperationTag {
        self.kind.tag()
    }

    pub fn subject(&self) -> Subject {
        self.kind.subject()
    }

    /// Mark this operation as not to be attempted.
    pub fn skip_with(&mut self, reason: SkipReason) {
        self.skip = Some(reason);
    }
}

/// An ordered set of operations grouped by phase.
///
/// Within a phase, operations are ordered by `position` with a stable sort, so
/// operations emitted for the same roster row keep their emission order and
/// reruns produce the same sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    operations: Vec<Operation>,
}

impl Plan {
    pub fn from_operations(mut operations: Vec<Operation>) -> Self {
        operations.sort_by_key(|op| (op.phase, op.position));
        Self { operations }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Mutable access for filters that re-tag operations in place.
    pub fn operations_mut(&mut self) -> &mut [Operation] {
        &mut self.operations
    }

    pub fn phase(&self, phase: ExecutionPhase) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(move |op| op.phase == phase)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Operations that would change remote state if executed.
    pub fn pending_changes(&self) -> impl Iterator<Item = &Operation> {
        self.operations
            .iter()
            .filter(|op| op.kind.is_mutating() && op.skip.is_none())
    }

    /// Split the plan into per-phase batches, every phase present (possibly
    /// empty), in execution order.
    pub fn into_phases(self) -> BTreeMap<ExecutionPhase, Vec<Operation>> {
        let mut phases: BTreeMap<ExecutionPhase, Vec<Operation>> =
            ExecutionPhase::ALL.iter().map(|p| (*p, Vec::new())).collect();
        for op in self.operations {
            phases.entry(op.phase).or_default().push(op);
        }
        phases
    }
}
