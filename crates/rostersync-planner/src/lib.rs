//! # rostersync-planner
//!
//! Computes the ordered `Plan` that moves the workspace from its observed
//! snapshot to the roster's desired state. Planning is a pure function of
//! its inputs: the same roster and snapshot always yield the same operations
//! in the same order, and a converged workspace yields no mutating operation.
//!
//! `mapping` turns raw roster rows into `DesiredRecord`s.

pub mod diff;
pub mod mapping;

use std::collections::BTreeSet;

use rostersync_contracts::identity::IdentityKey;

pub use diff::{plan, NAME_FIELD};
pub use mapping::{clean_number, to_iso8601, FieldMapping, WORK_CAPACITY_FIELD};

/// Knobs that change what the planner emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerOptions {
    /// Manager for users whose roster manager is missing, inactive or
    /// themselves. Also receives everything a deactivated user managed.
    pub fallback_manager: Option<IdentityKey>,
    /// Team group for users without a valid roster manager.
    pub fallback_group: Option<String>,
    /// Derive one team group per manager, named after the manager.
    pub team_groups: bool,
    /// Plan deactivation of active users absent from the roster.
    pub deactivate_missing: bool,
    /// Users whose deactivation the protected-entity filter will skip. They
    /// stay valid managers even when absent from the roster.
    pub protected_users: BTreeSet<IdentityKey>,
    /// Plan deletion of groups no roster user belongs to.
    pub delete_stale_groups: bool,
    /// Plan removal of managers of team groups who no longer lead the team.
    pub remove_stale_manager_roles: bool,
    /// Plan a verification check per roster user.
    pub verify: bool,
    /// Custom-field names that must be defined on user entities.
    pub custom_fields: Vec<String>,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            fallback_manager: None,
            fallback_group: None,
            team_groups: false,
            deactivate_missing: false,
            protected_users: BTreeSet::new(),
            delete_stale_groups: false,
            remove_stale_manager_roles: true,
            verify: true,
            custom_fields: Vec::new(),
        }
    }
}
