//! Reference scenarios.
//!
//! Each scenario builds a [`Harness`] around a seeded [`InMemoryWorkspace`]
//! and the reference configuration, runs the engine once (or twice) and
//! prints what happened.

pub mod deactivation;
pub mod new_hire;
pub mod protected_group;
pub mod rate_limit;
pub mod rerun;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use rostersync_audit::InMemoryAuditSink;
use rostersync_contracts::{
    error::SyncResult,
    identity::RunId,
    operation::Plan,
    outcome::{OutcomeStatus, RunReport},
    roster::RosterRow,
};
use rostersync_core::{traits::Confirmer, RateLimitedTransport, SyncEngine};
use rostersync_planner::FieldMapping;
use rostersync_policy::{DeactivationGate, ProtectedEntityFilter, StaticConfirmer, SyncConfig};
use rostersync_verify::DriftVerifier;

use crate::workspace::InMemoryWorkspace;

const REFERENCE_CONFIG: &str = include_str!("../../config/reference.toml");

/// The configuration every scenario starts from.
pub fn reference_config() -> SyncResult<SyncConfig> {
    SyncConfig::from_toml_str(REFERENCE_CONFIG)
}

/// One engine run's worth of wiring around a shared workspace.
pub struct Harness {
    pub workspace: Arc<InMemoryWorkspace>,
    pub audit: Arc<InMemoryAuditSink>,
    pub engine: SyncEngine,
    pub run_id: RunId,
    mapping: FieldMapping,
}

impl Harness {
    pub fn new(workspace: Arc<InMemoryWorkspace>, config: &SyncConfig, confirmer: Box<dyn Confirmer>) -> Self {
        let run_id = RunId::new();
        let audit = Arc::new(InMemoryAuditSink::new(&run_id));
        let transport = RateLimitedTransport::new(
            workspace.clone(),
            config.rate_limiter(),
            config.backoff_policy(),
        )
        .with_dry_run(config.transport.dry_run);
        let engine = SyncEngine::new(
            Arc::new(transport),
            Box::new(ProtectedEntityFilter::from_config(config)),
            Box::new(DeactivationGate::from_config(config, confirmer)),
            Arc::new(DriftVerifier::new()),
            audit.clone(),
            config.engine_settings(),
        );
        Self {
            workspace,
            audit,
            engine,
            run_id,
            mapping: config.mapping.clone(),
        }
    }

    /// A harness whose operator never confirms anything.
    pub fn unattended(workspace: Arc<InMemoryWorkspace>, config: &SyncConfig) -> Self {
        Self::new(workspace, config, Box::new(StaticConfirmer::declining()))
    }

    pub async fn run(&self, rows: &[RosterRow]) -> SyncResult<RunReport> {
        let desired = self.mapping.to_desired(rows)?;
        self.engine
            .run(self.run_id.clone(), &desired, &CancellationToken::new())
            .await
    }

    /// The filtered plan for `rows`, without executing it.
    pub async fn plan(&self, rows: &[RosterRow]) -> SyncResult<Plan> {
        let desired = self.mapping.to_desired(rows)?;
        let (_, plan) = self.engine.plan(&desired).await?;
        Ok(plan)
    }
}

/// Print one line per outcome and the counters.
pub fn print_report(report: &RunReport) {
    for outcome in &report.outcomes {
        let detail = match &outcome.status {
            OutcomeStatus::Failed { kind, detail } => format!(" ({:?}: {})", kind, detail),
            OutcomeStatus::Skipped { reason } => format!(" ({})", reason),
            _ => String::new(),
        };
        println!(
            "    {:<14} {:<20} {:<28} {}{}",
            outcome.phase.to_string(),
            outcome.operation.to_string(),
            outcome.subject,
            outcome.status.label(),
            detail
        );
    }
    let counts = report.counts();
    println!();
    println!(
        "  Run status: {:?} (succeeded {}, already satisfied {}, failed {}, skipped {})",
        report.status, counts.succeeded, counts.already_satisfied, counts.failed, counts.skipped
    );
}

pub fn print_audit(audit: &InMemoryAuditSink) {
    let log = audit.export_log();
    println!(
        "  Audit chains: {} ({} converged, {} attention)",
        if audit.verify_integrity() { "VERIFIED" } else { "FAILED" },
        log.converged.len(),
        log.attention.len()
    );
}

/// Run every scenario in order.
pub async fn run_all() -> SyncResult<()> {
    new_hire::run_scenario().await?;
    protected_group::run_scenario().await?;
    rate_limit::run_scenario().await?;
    deactivation::run_scenario(true).await?;
    deactivation::run_scenario(false).await?;
    rerun::run_scenario().await?;
    Ok(())
}
