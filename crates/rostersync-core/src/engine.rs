//! `SyncEngine`: one reconciliation run from probe to report.
//!
//! ```text
//! probe → snapshot → plan → filter → phases (gate per phase) → verify → report
//! ```
//!
//! Only a missing scope stops the run before mutation, and it does so with an
//! `AbortedAtProbe` report rather than an error. Every later operation failure
//! is contained in its outcome record.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rostersync_contracts::{
    error::{SyncError, SyncResult},
    identity::{GroupKey, RunId},
    operation::{ExecutionPhase, Plan},
    outcome::{RunReport, RunStatus},
    roster::DesiredRecord,
    scope::ScopeSet,
    snapshot::Snapshot,
};
use rostersync_planner::PlannerOptions;

use crate::executor::PhaseExecutor;
use crate::probe::PermissionProbe;
use crate::snapshot::SnapshotLoader;
use crate::traits::{AuditSink, ConvergenceVerifier, PhaseGate, PlanFilter};
use crate::transport::RateLimitedTransport;

/// Run-wide knobs the engine needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub planner: PlannerOptions,
    /// Groups the write probe must not touch.
    pub protected_groups: BTreeSet<GroupKey>,
    pub max_concurrency: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            planner: PlannerOptions::default(),
            protected_groups: BTreeSet::new(),
            max_concurrency: 4,
        }
    }
}

pub struct SyncEngine {
    transport: Arc<RateLimitedTransport>,
    filter: Box<dyn PlanFilter>,
    gate: Box<dyn PhaseGate>,
    verifier: Arc<dyn ConvergenceVerifier>,
    audit: Arc<dyn AuditSink>,
    settings: EngineSettings,
}

impl SyncEngine {
    pub fn new(
        transport: Arc<RateLimitedTransport>,
        filter: Box<dyn PlanFilter>,
        gate: Box<dyn PhaseGate>,
        verifier: Arc<dyn ConvergenceVerifier>,
        audit: Arc<dyn AuditSink>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            transport,
            filter,
            gate,
            verifier,
            audit,
            settings,
        }
    }

    pub fn transport(&self) -> &RateLimitedTransport {
        &self.transport
    }

    /// Confirm the credential holds every required scope.
    pub async fn probe(&self) -> SyncResult<ScopeSet> {
        PermissionProbe::new(&self.transport, &self.settings.protected_groups)
            .run()
            .await
    }

    /// Load a snapshot and compute the filtered plan for `desired`, without
    /// executing anything.
    pub async fn plan(&self, desired: &[DesiredRecord]) -> SyncResult<(Snapshot, Plan)> {
        let snapshot = SnapshotLoader::new(&self.transport).load().await?;
        let plan = rostersync_planner::plan(desired, &snapshot, &self.settings.planner)?;
        let plan = self.filter.filter(plan);

        for phase in ExecutionPhase::ALL {
            let total = plan.phase(phase).count();
            if total > 0 {
                let skipped = plan.phase(phase).filter(|op| op.skip.is_some()).count();
                info!(phase = %phase, operations = total, skipped, "planned");
            }
        }
        Ok((snapshot, plan))
    }

    /// Run one full reconciliation.
    ///
    /// # Errors
    ///
    /// Run-level failures only: snapshot load, duplicate identities, gate
    /// errors and audit write failures. A missing scope is reported as
    /// `RunStatus::AbortedAtProbe`.
    pub async fn run(
        &self,
        run_id: RunId,
        desired: &[DesiredRecord],
        cancel: &CancellationToken,
    ) -> SyncResult<RunReport> {
        let started_at = Utc::now();
        info!(
            run_id = %run_id,
            records = desired.len(),
            dry_run = self.transport.is_dry_run(),
            "run started"
        );

        match self.probe().await {
            Ok(_) => {}
            Err(error @ SyncError::InsufficientScope { .. }) => {
                warn!(run_id = %run_id, error = %error, "run aborted at permission probe");
                self.audit.finalize(&run_id)?;
                return Ok(RunReport {
                    run_id,
                    status: RunStatus::AbortedAtProbe,
                    outcomes: Vec::new(),
                    started_at,
                    finished_at: Utc::now(),
                    abort_reason: Some(error.to_string()),
                });
            }
            Err(other) => return Err(other),
        }

        let (snapshot, plan) = self.plan(desired).await?;

        let executor = PhaseExecutor::new(
            self.transport.clone(),
            self.verifier.clone(),
            self.audit.clone(),
            self.settings.max_concurrency,
        );
        let execution = executor
            .execute(plan, &snapshot, self.gate.as_ref(), cancel)
            .await?;
        self.audit.finalize(&run_id)?;

        let status = if execution.cancelled {
            RunStatus::AbortedByCancellation
        } else if execution.outcomes.iter().any(|o| o.status.is_failed()) {
            RunStatus::CompletedWithFailures
        } else {
            RunStatus::AllSucceeded
        };

        let report = RunReport {
            run_id,
            status,
            outcomes: execution.outcomes,
            started_at,
            finished_at: Utc::now(),
            abort_reason: None,
        };
        let counts = report.counts();
        info!(
            run_id = %report.run_id,
            status = ?report.status,
            succeeded = counts.succeeded,
            already_satisfied = counts.already_satisfied,
            failed = counts.failed,
            skipped = counts.skipped,
            "run finished"
        );
        Ok(report)
    }
}
