//! The differencer: desired records versus one snapshot.
//!
//! Each roster row contributes the operations its user needs, at the row's
//! position. Workspace-level operations (custom fields, groups, group
//! managers) take the position of the first row that needs them. Cleanup of
//! stale groups and deactivation candidates come after the whole roster, in
//! key order. `Plan::from_operations` then sorts by phase with a stable sort,
//! which keeps emission order within a position.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use rostersync_contracts::{
    error::{SyncError, SyncResult},
    identity::{GroupKey, IdentityKey},
    operation::{ExpectedUser, FieldChange, Operation, OperationKind, Plan},
    roster::DesiredRecord,
    snapshot::Snapshot,
};

use crate::PlannerOptions;

/// Field name under which display-name changes travel in a profile update.
pub const NAME_FIELD: &str = "name";

/// Compute the plan that converges `snapshot` to `desired`.
///
/// # Errors
///
/// `SyncError::DuplicateIdentity` when two records share a key, and
/// `SyncError::ConfigError` for a record with an empty key.
pub fn plan(desired: &[DesiredRecord], snapshot: &Snapshot, options: &PlannerOptions) -> SyncResult<Plan> {
    let roster = index_roster(desired)?;

    let resolved: Vec<Resolved<'_>> = desired
        .iter()
        .enumerate()
        .map(|(position, record)| resolve(position, record, &roster, snapshot, options))
        .collect();
    let teams = team_groups(&resolved);

    let referenced: BTreeSet<&GroupKey> = resolved.iter().flat_map(|r| r.groups.keys()).collect();
    let doomed: BTreeSet<GroupKey> = if options.delete_stale_groups {
        snapshot
            .groups
            .keys()
            .filter(|g| !referenced.contains(g))
            .cloned()
            .collect()
    } else {
        BTreeSet::new()
    };

    let mut ops = Vec::new();
    custom_field_ops(desired, snapshot, options, &mut ops);
    group_ops(&resolved, &teams, snapshot, &mut ops);
    for r in &resolved {
        user_ops(r, snapshot, &doomed, options, &mut ops);
    }
    cleanup_ops(&teams, &doomed, snapshot, options, desired.len(), &mut ops);
    deactivation_ops(&roster, snapshot, options, desired.len(), &mut ops);

    let plan = Plan::from_operations(ops);
    debug!(
        records = desired.len(),
        operations = plan.len(),
        pending = plan.pending_changes().count(),
        "plan computed"
    );
    Ok(plan)
}

// ── Resolution ───────────────────────────────────────────────────────────────

/// A roster record with its manager and full membership set decided.
struct Resolved<'a> {
    record: &'a DesiredRecord,
    position: usize,
    manager: Option<IdentityKey>,
    /// Explicit groups plus the team group, with display names.
    groups: BTreeMap<GroupKey, String>,
    team: Option<Team>,
}

#[derive(Debug, Clone)]
struct Team {
    key: GroupKey,
    name: String,
    manager: Option<IdentityKey>,
}

/// A team group and the first row that needs it.
struct TeamPlan {
    name: String,
    manager: Option<IdentityKey>,
    position: usize,
}

fn index_roster(desired: &[DesiredRecord]) -> SyncResult<BTreeMap<&IdentityKey, &DesiredRecord>> {
    let mut roster = BTreeMap::new();
    for (index, record) in desired.iter().enumerate() {
        if record.key.is_empty() {
            return Err(SyncError::ConfigError {
                reason: format!("roster record {} has an empty identity key", index + 1),
            });
        }
        if roster.insert(&record.key, record).is_some() {
            return Err(SyncError::DuplicateIdentity {
                key: record.key.to_string(),
                source_set: "roster".to_string(),
            });
        }
    }
    Ok(roster)
}

fn resolve<'a>(
    position: usize,
    record: &'a DesiredRecord,
    roster: &BTreeMap<&IdentityKey, &DesiredRecord>,
    snapshot: &Snapshot,
    options: &PlannerOptions,
) -> Resolved<'a> {
    // A roster manager counts when it is someone else who is either on the
    // roster or active in the workspace and staying that way this run.
    let roster_manager = record.manager.as_ref().filter(|m| {
        *m != &record.key
            && (roster.contains_key(m)
                || (snapshot.user(m).is_some_and(|u| u.is_active())
                    && !leaves_this_run(m, options)))
    });
    if let (Some(named), None) = (&record.manager, roster_manager) {
        debug!(user = %record.key, manager = %named, "manager invalid or inactive; using fallback");
    }
    let fallback = options
        .fallback_manager
        .as_ref()
        .filter(|f| *f != &record.key);
    let manager = roster_manager.or(fallback).cloned();

    let team = if !options.team_groups {
        None
    } else if let Some(m) = roster_manager {
        let name = display_name_of(m, roster, snapshot);
        Some(Team {
            key: GroupKey::new(&name),
            name,
            manager: Some(m.clone()),
        })
    } else {
        options.fallback_group.as_ref().map(|name| Team {
            key: GroupKey::new(name),
            name: name.trim().to_string(),
            manager: fallback.cloned(),
        })
    };

    let mut groups = record.groups.clone();
    if let Some(team) = &team {
        groups
            .entry(team.key.clone())
            .or_insert_with(|| team.name.clone());
    }

    Resolved {
        record,
        position,
        manager,
        groups,
        team,
    }
}

/// An active user absent from the roster who this run will deactivate.
fn leaves_this_run(key: &IdentityKey, options: &PlannerOptions) -> bool {
    options.deactivate_missing
        && options.fallback_manager.as_ref() != Some(key)
        && !options.protected_users.contains(key)
}

fn display_name_of(
    key: &IdentityKey,
    roster: &BTreeMap<&IdentityKey, &DesiredRecord>,
    snapshot: &Snapshot,
) -> String {
    roster
        .get(key)
        .map(|r| r.display_name.trim().to_string())
        .or_else(|| snapshot.user(key).map(|u| u.display_name.clone()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| key.to_string())
}

fn team_groups(resolved: &[Resolved<'_>]) -> BTreeMap<GroupKey, TeamPlan> {
    let mut teams = BTreeMap::new();
    for r in resolved {
        if let Some(team) = &r.team {
            teams.entry(team.key.clone()).or_insert_with(|| TeamPlan {
                name: team.name.clone(),
                manager: team.manager.clone(),
                position: r.position,
            });
        }
    }
    teams
}

// ── Emission ─────────────────────────────────────────────────────────────────

fn custom_field_ops(
    desired: &[DesiredRecord],
    snapshot: &Snapshot,
    options: &PlannerOptions,
    ops: &mut Vec<Operation>,
) {
    let mut seen = BTreeSet::new();
    let names = options
        .custom_fields
        .iter()
        .chain(desired.iter().flat_map(|r| r.custom_fields.keys()));
    for name in names {
        if snapshot.custom_fields.contains_key(name) || !seen.insert(name) {
            continue;
        }
        let position = desired
            .iter()
            .position(|r| r.custom_fields.contains_key(name))
            .unwrap_or(0);
        ops.push(Operation::new(
            OperationKind::CreateCustomField { field: name.clone() },
            position,
        ));
    }
}

fn group_ops(
    resolved: &[Resolved<'_>],
    teams: &BTreeMap<GroupKey, TeamPlan>,
    snapshot: &Snapshot,
    ops: &mut Vec<Operation>,
) {
    let mut created = BTreeSet::new();
    for r in resolved {
        for (group, name) in &r.groups {
            if snapshot.group(group).is_none() && created.insert(group) {
                ops.push(Operation::new(
                    OperationKind::CreateGroup {
                        group: group.clone(),
                        name: name.clone(),
                    },
                    r.position,
                ));
            }
        }
    }

    for (group, team) in teams {
        let Some(manager) = &team.manager else {
            continue;
        };
        let already = snapshot
            .group(group)
            .is_some_and(|g| g.managers.contains(manager));
        if !already {
            debug!(group = %team.name, manager = %manager, "team group needs its manager");
            ops.push(Operation::new(
                OperationKind::AssignGroupManager {
                    group: group.clone(),
                    manager: manager.clone(),
                },
                team.position,
            ));
        }
    }
}

fn user_ops(
    r: &Resolved<'_>,
    snapshot: &Snapshot,
    doomed: &BTreeSet<GroupKey>,
    options: &PlannerOptions,
    ops: &mut Vec<Operation>,
) {
    let record = r.record;
    let key = &record.key;
    let observed = snapshot.user(key);
    let mut push = |kind| ops.push(Operation::new(kind, r.position));

    if observed.is_none() {
        push(OperationKind::CreateUser {
            user: key.clone(),
            display_name: record.display_name.clone(),
        });
    }

    // Profile: one update carrying every changed field.
    let mut changes = Vec::new();
    if let Some(o) = observed {
        if o.display_name != record.display_name {
            changes.push(FieldChange {
                field: NAME_FIELD.to_string(),
                from: Some(o.display_name.clone()),
                to: record.display_name.clone(),
            });
        }
    }
    for (field, value) in &record.profile {
        let current = observed.and_then(|o| o.profile.get(field));
        if current.map(String::as_str).unwrap_or("") != value {
            changes.push(FieldChange {
                field: field.clone(),
                from: current.cloned(),
                to: value.clone(),
            });
        }
    }
    if !changes.is_empty() {
        push(OperationKind::UpdateProfileFields {
            user: key.clone(),
            changes,
        });
    }

    for (field, value) in &record.custom_fields {
        let current = observed.and_then(|o| o.custom_fields.get(field));
        if current.map(String::as_str).unwrap_or("") != value {
            push(OperationKind::SetCustomField {
                user: key.clone(),
                change: FieldChange {
                    field: field.clone(),
                    from: current.cloned(),
                    to: value.clone(),
                },
            });
        }
    }

    let observed_manager = observed.and_then(|o| o.manager.as_ref());
    if let Some(manager) = &r.manager {
        if observed_manager != Some(manager) {
            push(OperationKind::SetManager {
                user: key.clone(),
                manager: manager.clone(),
                previous: observed_manager.cloned(),
            });
        }
    }

    let current = observed.map(|o| &o.groups);
    for group in r.groups.keys() {
        if !current.is_some_and(|c| c.contains(group)) {
            push(OperationKind::AssignUserToGroup {
                user: key.clone(),
                group: group.clone(),
            });
        }
    }
    for group in current.into_iter().flatten() {
        if !r.groups.contains_key(group) && !doomed.contains(group) {
            push(OperationKind::RemoveUserFromGroup {
                user: key.clone(),
                group: group.clone(),
            });
        }
    }

    if options.verify {
        push(OperationKind::VerifyUser {
            expected: ExpectedUser {
                key: key.clone(),
                display_name: record.display_name.clone(),
                profile: record.profile.clone(),
                custom_fields: record.custom_fields.clone(),
                manager: r.manager.clone(),
                groups: r.groups.keys().cloned().collect(),
            },
        });
    }
}

fn cleanup_ops(
    teams: &BTreeMap<GroupKey, TeamPlan>,
    doomed: &BTreeSet<GroupKey>,
    snapshot: &Snapshot,
    options: &PlannerOptions,
    after_roster: usize,
    ops: &mut Vec<Operation>,
) {
    if options.remove_stale_manager_roles {
        for (group, team) in teams {
            if doomed.contains(group) {
                continue;
            }
            let Some(observed) = snapshot.group(group) else {
                continue;
            };
            for manager in &observed.managers {
                if team.manager.as_ref() != Some(manager) {
                    ops.push(Operation::new(
                        OperationKind::RemoveManagerRole {
                            group: group.clone(),
                            manager: manager.clone(),
                        },
                        team.position,
                    ));
                }
            }
        }
    }

    for (offset, group) in doomed.iter().enumerate() {
        ops.push(Operation::new(
            OperationKind::DeleteGroup { group: group.clone() },
            after_roster + offset,
        ));
    }
}

fn deactivation_ops(
    roster: &BTreeMap<&IdentityKey, &DesiredRecord>,
    snapshot: &Snapshot,
    options: &PlannerOptions,
    after_roster: usize,
    ops: &mut Vec<Operation>,
) {
    if !options.deactivate_missing {
        return;
    }
    let candidates = snapshot.users.values().filter(|u| {
        u.is_active()
            && !roster.contains_key(&u.key)
            && options.fallback_manager.as_ref() != Some(&u.key)
    });
    for (offset, user) in candidates.enumerate() {
        ops.push(Operation::new(
            OperationKind::DeactivateUser { user: user.key.clone() },
            after_roster + offset,
        ));
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
