//! Scenario 3: Rate Limit
//!
//! The service answers the new hire's creation with HTTP 429 three times in a
//! row. The transport pauses the shared limiter, sleeps 10ms, 20ms and 40ms
//! (base 10ms, doubling, capped at 160ms) and the fourth attempt succeeds. The
//! outcome records all four attempts and the three delays.

use std::sync::Arc;

use rostersync_contracts::{error::SyncResult, outcome::RunReport, remote::RemoteCall};

use crate::mock_data::{new_hire_roster, seed_workspace};
use crate::scenarios::{print_audit, print_report, reference_config, Harness};

/// Rejections injected ahead of the creation call.
pub const REJECTIONS: u32 = 3;

fn is_create_user(call: &RemoteCall) -> bool {
    matches!(call, RemoteCall::CreateUser { .. })
}

pub async fn run_scenario() -> SyncResult<RunReport> {
    println!("=== Scenario 3: Rate Limit ===");
    println!();

    let config = reference_config()?;
    let workspace = Arc::new(seed_workspace());
    workspace.rate_limit(is_create_user, REJECTIONS);
    let harness = Harness::unattended(workspace, &config);
    let report = harness.run(&new_hire_roster()).await?;

    print_report(&report);
    for outcome in report.outcomes.iter().filter(|o| !o.backoff_ms.is_empty()) {
        println!(
            "  {} {}: {} attempt(s), backoff {:?} ms",
            outcome.operation, outcome.subject, outcome.attempts, outcome.backoff_ms
        );
    }
    print_audit(&harness.audit);
    println!();
    Ok(report)
}
