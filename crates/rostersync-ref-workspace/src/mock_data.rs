//! Fictional workspace and roster data for the reference scenarios.
//!
//! The seed workspace is already converged with [`base_roster`]:
//!
//! - Olivia Park (`ops.lead`) is the fallback manager and manages the
//!   "Olivia Park" team.
//! - Bob Stone reports to Olivia and manages the "Bob Stone" team.
//! - Ann Lee reports to Bob and is in the protected "Holiday-Calendar-FR".
//! - Lee Vance and Kim Contract are not on the roster. Lee manages "Field Ops",
//!   the empty "Lee Vance" team and Kim.

use std::collections::BTreeMap;

use rostersync_contracts::{
    identity::RemoteId,
    remote::{RemoteGroup, RemoteUser},
    roster::RosterRow,
    snapshot::{CustomFieldDef, UserStatus},
};

use crate::workspace::InMemoryWorkspace;

pub const FALLBACK_MANAGER: &str = "ops.lead@example.com";
pub const BOB: &str = "bob.stone@example.com";
pub const ANN: &str = "ann.lee@example.com";
pub const LEAVER: &str = "lee.vance@example.com";
pub const CONTRACTOR: &str = "kim.contract@example.com";
pub const NEW_HIRE: &str = "nina.hart@example.com";
pub const PROTECTED_GROUP: &str = "Holiday-Calendar-FR";

const COST_CENTER: &str = "Cost Center";
const COST_CENTER_ID: &str = "f-1";

fn ids(raw: &[&str]) -> Vec<RemoteId> {
    raw.iter().map(|id| RemoteId::new(*id)).collect()
}

fn user(id: &str, email: &str, name: &str, capacity: &str, cost_center: &str, manager: Option<&str>) -> RemoteUser {
    RemoteUser {
        id: RemoteId::new(id),
        email: email.to_string(),
        name: name.to_string(),
        status: UserStatus::Active,
        profile: BTreeMap::from([("work_capacity".to_string(), capacity.to_string())]),
        custom_fields: BTreeMap::from([(RemoteId::new(COST_CENTER_ID), cost_center.to_string())]),
        manager_id: manager.map(RemoteId::new),
    }
}

fn group(id: &str, name: &str, members: &[&str], managers: &[&str]) -> RemoteGroup {
    RemoteGroup {
        id: RemoteId::new(id),
        name: name.to_string(),
        member_ids: ids(members),
        manager_ids: ids(managers),
    }
}

/// A fresh copy of the seeded reference workspace.
pub fn seed_workspace() -> InMemoryWorkspace {
    InMemoryWorkspace::new()
        .with_custom_field(CustomFieldDef {
            remote_id: RemoteId::new(COST_CENTER_ID),
            name: COST_CENTER.to_string(),
        })
        .with_user(user("u-1", FALLBACK_MANAGER, "Olivia Park", "PT8H0M", "CC-100", None))
        .with_user(user("u-2", BOB, "Bob Stone", "PT8H0M", "CC-200", Some("u-1")))
        .with_user(user("u-3", ANN, "Ann Lee", "PT6H24M", "CC-200", Some("u-2")))
        .with_user(user("u-4", LEAVER, "Lee Vance", "PT8H0M", "CC-300", Some("u-2")))
        .with_user(user("u-5", CONTRACTOR, "Kim Contract", "PT4H0M", "CC-300", Some("u-4")))
        .with_group(group("g-1", "All Staff", &["u-1", "u-2", "u-3"], &[]))
        .with_group(group("g-2", "Olivia Park", &["u-2"], &["u-1"]))
        .with_group(group("g-3", "Bob Stone", &["u-3"], &["u-2"]))
        .with_group(group("g-4", PROTECTED_GROUP, &["u-3"], &[]))
        .with_group(group("g-5", "Field Ops", &["u-4", "u-5"], &["u-4"]))
        .with_group(group("g-6", "Lee Vance", &[], &["u-4"]))
}

/// One roster row in the default column layout.
pub fn roster_row(email: &str, name: &str, manager: &str, groups: &str, hours: &str, cost_center: &str) -> RosterRow {
    RosterRow::default()
        .with("NTID email", email)
        .with("Name", name)
        .with("Manager NTID email", manager)
        .with("Groups", groups)
        .with("Weekly Working Hours", hours)
        .with(COST_CENTER, cost_center)
}

/// The roster the seed workspace already matches.
pub fn base_roster() -> Vec<RosterRow> {
    vec![
        roster_row(FALLBACK_MANAGER, "Olivia Park", "", "All Staff", "40", "CC-100"),
        roster_row(BOB, "Bob Stone", FALLBACK_MANAGER, "All Staff", "40", "CC-200"),
        roster_row(ANN, "Ann Lee", BOB, "All Staff; Holiday-Calendar-FR", "32,0", "CC-200"),
    ]
}

/// `base_roster` plus Nina Hart, joining Bob's team.
pub fn new_hire_roster() -> Vec<RosterRow> {
    let mut rows = base_roster();
    rows.push(roster_row(NEW_HIRE, "Nina Hart", BOB, "All Staff", "40", "CC-200"));
    rows
}

/// `base_roster` with Ann no longer listed in the protected group.
pub fn protected_group_roster() -> Vec<RosterRow> {
    let mut rows = base_roster();
    rows[2] = roster_row(ANN, "Ann Lee", BOB, "All Staff", "32", "CC-200");
    rows
}
