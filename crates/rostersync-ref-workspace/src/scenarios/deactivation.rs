//! Scenario 4: Deactivation
//!
//! Lee Vance and Kim Contract are active in the workspace but missing from
//! the roster. With deactivation enabled the Deactivation phase asks the
//! operator for the confirmation token once.
//!
//! - Confirmed: Lee's two managed groups and his one report (Kim) move to the
//!   fallback manager, then both users are deactivated.
//! - Not confirmed: every Deactivation operation is recorded as
//!   `Skipped(unconfirmed)` and nobody is touched.

use std::sync::Arc;

use rostersync_contracts::{error::SyncResult, outcome::RunReport};
use rostersync_policy::{StaticConfirmer, SyncConfig};

use crate::mock_data::{base_roster, seed_workspace, CONTRACTOR, LEAVER};
use crate::scenarios::{print_audit, print_report, reference_config, Harness};
use crate::workspace::InMemoryWorkspace;

fn deactivation_config() -> SyncResult<SyncConfig> {
    let mut config = reference_config()?;
    config.deactivation.enabled = true;
    config.validate()?;
    Ok(config)
}

fn harness(workspace: Arc<InMemoryWorkspace>, config: &SyncConfig, confirm: bool) -> Harness {
    let confirmer = if confirm {
        StaticConfirmer::answering(config.deactivation.confirmation_token.clone())
    } else {
        StaticConfirmer::answering("no")
    };
    Harness::new(workspace, config, Box::new(confirmer))
}

pub async fn run_scenario(confirm: bool) -> SyncResult<RunReport> {
    println!(
        "=== Scenario 4: Deactivation ({}) ===",
        if confirm { "confirmed" } else { "not confirmed" }
    );
    println!();

    let config = deactivation_config()?;
    let harness = harness(Arc::new(seed_workspace()), &config, confirm);
    let report = harness.run(&base_roster()).await?;

    print_report(&report);
    for email in [LEAVER, CONTRACTOR] {
        if let Some(user) = harness.workspace.user_by_email(email) {
            println!("  {}: {:?}", email, user.status);
        }
    }
    print_audit(&harness.audit);
    println!();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rostersync_contracts::{
        operation::{ExecutionPhase, OperationTag, SkipReason},
        outcome::{FailureKind, OutcomeStatus, RunStatus},
        remote::{ApiError, ApiErrorKind, RemoteCall},
        snapshot::UserStatus,
    };

    use crate::mock_data::{roster_row, ANN, BOB, FALLBACK_MANAGER};

    fn reassignments_of(report: &RunReport, user: &str) -> usize {
        report
            .outcomes
            .iter()
            .filter(|o| o.operation == OperationTag::ReassignManager && o.subject == user)
            .count()
    }

    fn deactivation_tags(report: &RunReport) -> Vec<(OperationTag, String)> {
        report
            .outcomes
            .iter()
            .filter(|o| o.phase == ExecutionPhase::Deactivation)
            .map(|o| (o.operation, o.subject.clone()))
            .collect()
    }

    #[tokio::test]
    async fn confirmed_run_reassigns_then_deactivates() {
        let config = deactivation_config().unwrap();
        let harness = harness(Arc::new(seed_workspace()), &config, true);
        let report = harness.run(&base_roster()).await.unwrap();

        assert_eq!(report.status, RunStatus::AllSucceeded);
        let lee: Vec<_> = deactivation_tags(&report)
            .into_iter()
            .filter(|(_, subject)| subject == LEAVER)
            .map(|(tag, _)| tag)
            .collect();
        assert_eq!(
            lee,
            vec![
                OperationTag::ReassignManager,
                OperationTag::ReassignManager,
                OperationTag::ReassignManager,
                OperationTag::DeactivateUser,
            ]
        );

        let ws = &harness.workspace;
        let fallback = ws.user_by_email(FALLBACK_MANAGER).unwrap();
        let leaver = ws.user_by_email(LEAVER).unwrap();
        let contractor = ws.user_by_email(CONTRACTOR).unwrap();
        assert_eq!(leaver.status, UserStatus::Inactive);
        assert_eq!(contractor.status, UserStatus::Inactive);
        assert_eq!(contractor.manager_id, Some(fallback.id.clone()));
        for name in ["Field Ops", "Lee Vance"] {
            let group = ws.group_by_name(name).unwrap();
            assert_eq!(group.manager_ids, vec![fallback.id.clone()], "{name}");
        }
    }

    #[tokio::test]
    async fn reassignment_calls_precede_the_deactivation() {
        let config = deactivation_config().unwrap();
        let harness = harness(Arc::new(seed_workspace()), &config, true);
        harness.run(&base_roster()).await.unwrap();

        let leaver = harness.workspace.user_by_email(LEAVER).unwrap().id;
        let calls = harness.workspace.calls();
        let deactivated_at = calls
            .iter()
            .position(|c| matches!(c, RemoteCall::DeactivateUser { user } if *user == leaver))
            .unwrap();
        let last_role_removal = calls
            .iter()
            .rposition(|c| matches!(c, RemoteCall::RemoveManagerRole { manager, .. } if *manager == leaver))
            .unwrap();
        assert!(last_role_removal < deactivated_at);
    }

    #[tokio::test]
    async fn unconfirmed_run_touches_nobody() {
        let config = deactivation_config().unwrap();
        let harness = harness(Arc::new(seed_workspace()), &config, false);
        let report = harness.run(&base_roster()).await.unwrap();

        assert_eq!(report.status, RunStatus::AllSucceeded);
        assert_eq!(
            deactivation_tags(&report),
            vec![
                (OperationTag::DeactivateUser, CONTRACTOR.to_string()),
                (OperationTag::DeactivateUser, LEAVER.to_string()),
            ]
        );
        assert!(report
            .outcomes
            .iter()
            .filter(|o| o.operation == OperationTag::DeactivateUser)
            .all(|o| o.status == OutcomeStatus::Skipped { reason: SkipReason::Unconfirmed }));

        let ws = &harness.workspace;
        assert_eq!(ws.user_by_email(LEAVER).unwrap().status, UserStatus::Active);
        assert!(!ws.calls().iter().any(|c| matches!(
            c,
            RemoteCall::DeactivateUser { .. } | RemoteCall::SetManager { .. }
        )));
    }

    #[tokio::test]
    async fn failed_reassignment_blocks_the_deactivation() {
        let config = deactivation_config().unwrap();
        let workspace = Arc::new(seed_workspace());
        workspace.inject(
            |c| matches!(c, RemoteCall::AssignGroupManager { group, .. } if group.0 == "g-5"),
            ApiError::new(ApiErrorKind::Conflict, "group is locked"),
            1,
        );
        let harness = harness(workspace, &config, true);
        let report = harness.run(&base_roster()).await.unwrap();

        assert_eq!(report.status, RunStatus::CompletedWithFailures);
        let deactivate = report
            .outcomes
            .iter()
            .find(|o| o.operation == OperationTag::DeactivateUser && o.subject == LEAVER)
            .unwrap();
        match &deactivate.status {
            OutcomeStatus::Failed { kind, .. } => assert_eq!(*kind, FailureKind::ReassignmentFailed),
            other => panic!("expected ReassignmentFailed, got {:?}", other),
        }
        assert_eq!(deactivate.attempts, 0);
        assert_eq!(
            harness.workspace.user_by_email(LEAVER).unwrap().status,
            UserStatus::Active
        );
        // Kim has nothing to hand over and is deactivated regardless.
        assert_eq!(
            harness.workspace.user_by_email(CONTRACTOR).unwrap().status,
            UserStatus::Inactive
        );
    }

    #[tokio::test]
    async fn report_moved_earlier_in_the_run_stays_with_the_new_manager() {
        let config = deactivation_config().unwrap();
        let harness = harness(Arc::new(seed_workspace()), &config, true);
        let mut rows = base_roster();
        rows.push(roster_row(CONTRACTOR, "Kim Contract", BOB, "All Staff", "20", "CC-300"));

        let report = harness.run(&rows).await.unwrap();

        assert_eq!(report.status, RunStatus::AllSucceeded, "{:?}", report.attention().collect::<Vec<_>>());
        // Field Ops and the Lee Vance team; Kim already moved to Bob.
        assert_eq!(reassignments_of(&report, LEAVER), 2);
        let ws = &harness.workspace;
        let bob = ws.user_by_email(BOB).unwrap();
        let kim = ws.user_by_email(CONTRACTOR).unwrap();
        assert_eq!(kim.manager_id, Some(bob.id));
        assert_eq!(kim.status, UserStatus::Active);
        assert_eq!(ws.user_by_email(LEAVER).unwrap().status, UserStatus::Inactive);
    }

    #[tokio::test]
    async fn groups_deleted_in_cleanup_are_not_reassigned() {
        let mut config = deactivation_config().unwrap();
        config.cleanup.delete_stale_groups = true;
        let harness = harness(Arc::new(seed_workspace()), &config, true);

        let report = harness.run(&base_roster()).await.unwrap();

        assert_eq!(report.status, RunStatus::AllSucceeded, "{:?}", report.attention().collect::<Vec<_>>());
        // Only Kim is left to hand over once Lee's groups are gone.
        assert_eq!(reassignments_of(&report, LEAVER), 1);
        let ws = &harness.workspace;
        assert!(ws.group_by_name("Field Ops").is_none());
        assert!(ws.group_by_name("Lee Vance").is_none());
        assert_eq!(ws.user_by_email(LEAVER).unwrap().status, UserStatus::Inactive);
        assert!(!ws
            .calls()
            .iter()
            .any(|c| matches!(c, RemoteCall::AssignGroupManager { group, .. } if group.0 == "g-5" || group.0 == "g-6")));
    }

    #[tokio::test]
    async fn reports_of_a_leaver_on_the_roster_go_to_the_fallback() {
        let config = deactivation_config().unwrap();
        let workspace = Arc::new(seed_workspace());
        let mut rows = base_roster();
        rows[2] = roster_row(ANN, "Ann Lee", LEAVER, "All Staff; Holiday-Calendar-FR", "32,0", "CC-200");

        let first = harness(workspace.clone(), &config, true);
        let report = first.run(&rows).await.unwrap();
        assert_eq!(report.status, RunStatus::AllSucceeded, "{:?}", report.attention().collect::<Vec<_>>());

        let fallback = workspace.user_by_email(FALLBACK_MANAGER).unwrap();
        assert_eq!(workspace.user_by_email(ANN).unwrap().manager_id, Some(fallback.id));
        assert_eq!(workspace.user_by_email(LEAVER).unwrap().status, UserStatus::Inactive);

        let second = harness(workspace, &config, true);
        let plan = second.plan(&rows).await.unwrap();
        assert_eq!(plan.pending_changes().count(), 0, "plan: {:?}", plan);
    }
}
