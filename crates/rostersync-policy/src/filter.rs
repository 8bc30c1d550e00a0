//! `ProtectedEntityFilter`: keeps destructive changes away from protected
//! groups and users.
//!
//! Operations are never dropped. An operation touching a protected entity is
//! flagged `protected`; if it is also destructive (removal, role removal,
//! group deletion, deactivation) it is re-tagged `Skipped(protected)` so it
//! still lands in the audit log.

use std::collections::BTreeSet;

use tracing::{debug, info};

use rostersync_contracts::{
    identity::{GroupKey, IdentityKey},
    operation::{Operation, OperationKind, Plan, SkipReason},
};
use rostersync_core::traits::PlanFilter;

use crate::config::SyncConfig;

#[derive(Debug, Clone, Default)]
pub struct ProtectedEntityFilter {
    groups: BTreeSet<GroupKey>,
    users: BTreeSet<IdentityKey>,
}

impl ProtectedEntityFilter {
    pub fn new(groups: BTreeSet<GroupKey>, users: BTreeSet<IdentityKey>) -> Self {
        Self { groups, users }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.protected_groups(), config.protected_users())
    }

    fn touches_protected(&self, kind: &OperationKind) -> bool {
        if kind.group().is_some_and(|g| self.groups.contains(g)) {
            return true;
        }
        match kind {
            OperationKind::RemoveUserFromGroup { user, .. }
            | OperationKind::DeactivateUser { user } => self.users.contains(user),
            OperationKind::RemoveManagerRole { manager, .. } => self.users.contains(manager),
            _ => false,
        }
    }

    fn apply_to(&self, op: &mut Operation) -> bool {
        if !self.touches_protected(&op.kind) {
            return false;
        }
        op.protected = true;
        if op.kind.is_destructive() && op.skip.is_none() {
            debug!(
                operation = %op.tag(),
                subject = %op.subject(),
                "destructive change to protected entity skipped"
            );
            op.skip_with(SkipReason::Protected);
            return true;
        }
        false
    }
}

impl PlanFilter for ProtectedEntityFilter {
    fn filter(&self, mut plan: Plan) -> Plan {
        let mut skipped = 0usize;
        for op in plan.operations_mut() {
            if self.apply_to(op) {
                skipped += 1;
            }
        }
        if skipped > 0 {
            info!(skipped, "protected-entity filter applied");
        }
        plan
    }
}
