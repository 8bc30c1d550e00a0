//! Scenario 2: Protected Group
//!
//! Ann Lee drops "Holiday-Calendar-FR" from her roster groups, but the group
//! is protected. The removal is planned, re-tagged `Skipped(protected)` by the
//! filter and written to the attention stream. No call is sent and the run
//! still counts as fully succeeded.

use std::sync::Arc;

use rostersync_contracts::{error::SyncResult, outcome::RunReport};

use crate::mock_data::{protected_group_roster, seed_workspace, ANN, PROTECTED_GROUP};
use crate::scenarios::{print_audit, print_report, reference_config, Harness};

pub async fn run_scenario() -> SyncResult<RunReport> {
    println!("=== Scenario 2: Protected Group ===");
    println!();

    let config = reference_config()?;
    let harness = Harness::unattended(Arc::new(seed_workspace()), &config);
    let report = harness.run(&protected_group_roster()).await?;

    print_report(&report);
    let still_member = match (
        harness.workspace.group_by_name(PROTECTED_GROUP),
        harness.workspace.user_by_email(ANN),
    ) {
        (Some(group), Some(ann)) => group.member_ids.contains(&ann.id),
        _ => false,
    };
    println!("  {} still in {}: {}", ANN, PROTECTED_GROUP, still_member);
    print_audit(&harness.audit);
    println!();
    Ok(report)
}
