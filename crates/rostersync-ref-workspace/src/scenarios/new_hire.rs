//! Scenario 1: New Hire
//!
//! Nina Hart joins Bob Stone's team. Against the seeded workspace the plan is:
//!   1. Provision: create the user
//!   2. ProfileUpdate: work capacity, cost center, manager
//!   3. GroupSync: "All Staff" and the "Bob Stone" team group
//!   4. Verification: every roster user re-read and compared

use std::sync::Arc;

use rostersync_contracts::{error::SyncResult, outcome::RunReport};

use crate::mock_data::{new_hire_roster, seed_workspace, NEW_HIRE};
use crate::scenarios::{print_audit, print_report, reference_config, Harness};

pub async fn run_scenario() -> SyncResult<RunReport> {
    println!("=== Scenario 1: New Hire ===");
    println!();

    let config = reference_config()?;
    let harness = Harness::unattended(Arc::new(seed_workspace()), &config);
    let report = harness.run(&new_hire_roster()).await?;

    print_report(&report);
    if let Some(user) = harness.workspace.user_by_email(NEW_HIRE) {
        println!("  {} now exists as {} ({})", NEW_HIRE, user.id, user.name);
    }
    print_audit(&harness.audit);
    println!();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rostersync_contracts::{
        operation::OperationTag,
        outcome::{OutcomeStatus, RunStatus},
    };

    use crate::mock_data::BOB;

    #[tokio::test]
    async fn new_hire_converges() {
        let config = reference_config().unwrap();
        let harness = Harness::unattended(Arc::new(seed_workspace()), &config);
        let report = harness.run(&new_hire_roster()).await.unwrap();

        assert_eq!(report.status, RunStatus::AllSucceeded);
        let nina: Vec<_> = report
            .outcomes
            .iter()
            .filter(|o| o.subject == NEW_HIRE)
            .map(|o| o.operation)
            .collect();
        assert_eq!(
            nina,
            vec![
                OperationTag::CreateUser,
                OperationTag::UpdateProfileFields,
                OperationTag::SetCustomField,
                OperationTag::SetManager,
                OperationTag::AssignUserToGroup,
                OperationTag::AssignUserToGroup,
                OperationTag::VerifyUser,
            ]
        );

        let ws = &harness.workspace;
        let user = ws.user_by_email(NEW_HIRE).unwrap();
        let bob = ws.user_by_email(BOB).unwrap();
        assert_eq!(user.name, "Nina Hart");
        assert_eq!(user.manager_id, Some(bob.id));
        assert_eq!(user.profile.get("work_capacity").map(String::as_str), Some("PT8H0M"));
        assert!(ws.group_by_name("Bob Stone").unwrap().member_ids.contains(&user.id));
        assert!(ws.group_by_name("All Staff").unwrap().member_ids.contains(&user.id));
    }

    #[tokio::test]
    async fn existing_users_only_get_verified() {
        let config = reference_config().unwrap();
        let harness = Harness::unattended(Arc::new(seed_workspace()), &config);
        let report = harness.run(&new_hire_roster()).await.unwrap();

        for outcome in report.outcomes.iter().filter(|o| o.subject != NEW_HIRE) {
            assert_eq!(outcome.operation, OperationTag::VerifyUser, "{:?}", outcome);
            assert_eq!(outcome.status, OutcomeStatus::AlreadySatisfied);
        }
    }

    #[tokio::test]
    async fn audit_holds_every_outcome() {
        let config = reference_config().unwrap();
        let harness = Harness::unattended(Arc::new(seed_workspace()), &config);
        let report = harness.run(&new_hire_roster()).await.unwrap();

        assert_eq!(harness.audit.records(), report.outcomes);
        assert!(harness.audit.is_finalized());
        assert!(harness.audit.verify_integrity());
        assert!(harness.audit.export_log().attention.is_empty());
    }

    #[tokio::test]
    async fn dry_run_leaves_the_workspace_alone() {
        let mut config = reference_config().unwrap();
        config.transport.dry_run = true;
        let harness = Harness::unattended(Arc::new(seed_workspace()), &config);
        let report = harness.run(&new_hire_roster()).await.unwrap();

        assert!(harness.workspace.user_by_email(NEW_HIRE).is_none());
        // Reads only: not even the permission probe's membership re-assert.
        assert!(harness.workspace.calls().is_empty());
        let create = report
            .outcomes
            .iter()
            .find(|o| o.operation == OperationTag::CreateUser)
            .unwrap();
        assert_eq!(create.attempts, 0);
    }
}
