//! Observed-state types: the per-run snapshot of the remote workspace.
//!
//! A `Snapshot` is taken once per run and never live-refreshed while the plan
//! executes. The executor keeps a working copy that each converged operation
//! updates through `Snapshot::record_converged`. Its constructor enforces the identity invariants (unique user
//! keys, unique group names) and derives each user's memberships from the
//! group member lists so both directions of the relation agree.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{SyncError, SyncResult},
    identity::{GroupKey, IdentityKey, RemoteId},
    operation::{ManagedEntity, OperationKind},
};

/// Membership status of a user in the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Active,
    Pending,
    Inactive,
}

/// The remote representation of one user, keyed by identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedUser {
    pub remote_id: RemoteId,
    pub key: IdentityKey,
    pub display_name: String,
    pub status: UserStatus,
    #[serde(default)]
    pub profile: BTreeMap<String, String>,
    /// Custom-field values keyed by custom-field *name*.
    #[serde(default)]
    pub custom_fields: BTreeMap<String, String>,
    #[serde(default)]
    pub manager: Option<IdentityKey>,
    /// Derived from group member lists by `Snapshot::new`.
    #[serde(default)]
    pub groups: BTreeSet<GroupKey>,
}

impl ObservedUser {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

/// The remote representation of one user group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedGroup {
    pub remote_id: RemoteId,
    pub key: GroupKey,
    /// Display name as stored remotely.
    pub name: String,
    #[serde(default)]
    pub members: BTreeSet<IdentityKey>,
    #[serde(default)]
    pub managers: BTreeSet<IdentityKey>,
}

/// A custom-field definition on user entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFieldDef {
    pub remote_id: RemoteId,
    pub name: String,
}

/// Point-in-time view of the remote workspace for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub users: BTreeMap<IdentityKey, ObservedUser>,
    pub groups: BTreeMap<GroupKey, ObservedGroup>,
    /// Definitions keyed by field name.
    pub custom_fields: BTreeMap<String, CustomFieldDef>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Assemble a snapshot, rejecting duplicate keys.
    ///
    /// Each user's `groups` set is rebuilt from the group member lists; any
    /// memberships already present on the input users are discarded.
    pub fn new(
        users: Vec<ObservedUser>,
        groups: Vec<ObservedGroup>,
        custom_fields: Vec<CustomFieldDef>,
    ) -> SyncResult<Self> {
        let mut user_map = BTreeMap::new();
        for mut user in users {
            user.groups.clear();
            let key = user.key.clone();
            if user_map.insert(key.clone(), user).is_some() {
                return Err(SyncError::DuplicateIdentity {
                    key: key.to_string(),
                    source_set: "observed users".to_string(),
                });
            }
        }

        let mut group_map = BTreeMap::new();
        for group in groups {
            for member in &group.members {
                if let Some(user) = user_map.get_mut(member) {
                    user.groups.insert(group.key.clone());
                }
            }
            let key = group.key.clone();
            if group_map.insert(key.clone(), group).is_some() {
                return Err(SyncError::DuplicateIdentity {
                    key: key.to_string(),
                    source_set: "observed groups".to_string(),
                });
            }
        }

        let custom_fields = custom_fields
            .into_iter()
            .map(|f| (f.name.clone(), f))
            .collect();

        Ok(Self {
            users: user_map,
            groups: group_map,
            custom_fields,
            taken_at: Some(Utc::now()),
        })
    }

    pub fn user(&self, key: &IdentityKey) -> Option<&ObservedUser> {
        self.users.get(key)
    }

    pub fn group(&self, key: &GroupKey) -> Option<&ObservedGroup> {
        self.groups.get(key)
    }

    /// Everything `key` currently manages: groups first, then direct reports,
    /// each in key order.
    pub fn managed_entities(&self, key: &IdentityKey) -> Vec<ManagedEntity> {
        let groups = self
            .groups
            .values()
            .filter(|g| g.managers.contains(key))
            .map(|g| ManagedEntity::Group(g.key.clone()));
        let reports = self
            .users
            .values()
            .filter(|u| u.manager.as_ref() == Some(key) && &u.key != key)
            .map(|u| ManagedEntity::Report(u.key.clone()));
        groups.chain(reports).collect()
    }

    /// Fold the effect of a converged operation into this view.
    ///
    /// Only relations are tracked: managers, manager roles, memberships,
    /// group existence and user status. Entities the view does not hold
    /// (created during the run) are left out.
    pub fn record_converged(&mut self, kind: &OperationKind) {
        match kind {
            OperationKind::SetManager { user, manager, .. } => self.set_manager(user, manager),
            OperationKind::AssignUserToGroup { user, group } => {
                if let Some(g) = self.groups.get_mut(group) {
                    g.members.insert(user.clone());
                    if let Some(u) = self.users.get_mut(user) {
                        u.groups.insert(group.clone());
                    }
                }
            }
            OperationKind::RemoveUserFromGroup { user, group } => {
                if let Some(g) = self.groups.get_mut(group) {
                    g.members.remove(user);
                }
                if let Some(u) = self.users.get_mut(user) {
                    u.groups.remove(group);
                }
            }
            OperationKind::AssignGroupManager { group, manager } => {
                if let Some(g) = self.groups.get_mut(group) {
                    g.managers.insert(manager.clone());
                }
            }
            OperationKind::RemoveManagerRole { group, manager } => {
                if let Some(g) = self.groups.get_mut(group) {
                    g.managers.remove(manager);
                }
            }
            OperationKind::DeleteGroup { group } => {
                self.groups.remove(group);
                for user in self.users.values_mut() {
                    user.groups.remove(group);
                }
            }
            OperationKind::ReassignManager { from, entity, to } => match entity {
                ManagedEntity::Report(report) => self.set_manager(report, to),
                ManagedEntity::Group(group) => {
                    if let Some(g) = self.groups.get_mut(group) {
                        g.managers.remove(from);
                        g.managers.insert(to.clone());
                    }
                }
            },
            OperationKind::DeactivateUser { user } => {
                if let Some(u) = self.users.get_mut(user) {
                    u.status = UserStatus::Inactive;
                }
            }
            _ => {}
        }
    }

    fn set_manager(&mut self, user: &IdentityKey, manager: &IdentityKey) {
        if let Some(u) = self.users.get_mut(user) {
            u.manager = Some(manager.clone());
        }
    }
}
