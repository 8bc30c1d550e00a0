//! Scenario 5: Rerun
//!
//! The new-hire roster is applied twice to the same workspace. The second
//! plan holds no mutating operation, and the second run only verifies.

use std::sync::Arc;

use rostersync_contracts::{error::SyncResult, outcome::RunReport};

use crate::mock_data::{new_hire_roster, seed_workspace};
use crate::scenarios::{print_audit, print_report, reference_config, Harness};

pub async fn run_scenario() -> SyncResult<RunReport> {
    println!("=== Scenario 5: Rerun ===");
    println!();

    let config = reference_config()?;
    let workspace = Arc::new(seed_workspace());

    let first = Harness::unattended(workspace.clone(), &config);
    let first_report = first.run(&new_hire_roster()).await?;
    println!("  First run: {:?}", first_report.status);

    let second = Harness::unattended(workspace, &config);
    let pending = second.plan(&new_hire_roster()).await?.pending_changes().count();
    println!("  Pending changes before second run: {}", pending);
    let report = second.run(&new_hire_roster()).await?;

    print_report(&report);
    print_audit(&second.audit);
    println!();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rostersync_contracts::{
        operation::OperationTag,
        outcome::{OutcomeStatus, RunStatus},
        remote::RemoteCall,
    };

    #[tokio::test]
    async fn second_run_changes_nothing() {
        let config = reference_config().unwrap();
        let workspace = Arc::new(seed_workspace());

        let first = Harness::unattended(workspace.clone(), &config);
        assert_eq!(
            first.run(&new_hire_roster()).await.unwrap().status,
            RunStatus::AllSucceeded
        );
        let calls_after_first = workspace.calls().len();

        let second = Harness::unattended(workspace.clone(), &config);
        let plan = second.plan(&new_hire_roster()).await.unwrap();
        assert_eq!(plan.pending_changes().count(), 0, "plan: {:?}", plan);

        let report = second.run(&new_hire_roster()).await.unwrap();
        assert_eq!(report.status, RunStatus::AllSucceeded);
        assert!(report.outcomes.iter().all(|o| o.operation == OperationTag::VerifyUser
            && o.status == OutcomeStatus::AlreadySatisfied));

        // The only new call is the probe's membership re-assert.
        let new_calls = &workspace.calls()[calls_after_first..];
        assert_eq!(new_calls.len(), 1);
        assert!(matches!(new_calls[0], RemoteCall::AddGroupMember { .. }));
    }

    #[tokio::test]
    async fn seed_workspace_already_matches_base_roster() {
        let config = reference_config().unwrap();
        let harness = Harness::unattended(Arc::new(seed_workspace()), &config);
        let plan = harness.plan(&crate::mock_data::base_roster()).await.unwrap();
        assert_eq!(plan.pending_changes().count(), 0, "plan: {:?}", plan);
    }
}
