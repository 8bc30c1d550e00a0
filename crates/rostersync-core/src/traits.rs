//! Trait seams of the rostersync pipeline.
//!
//! - `WorkspaceApi`        — the remote service (untrusted, rate limited, may fail)
//! - `PlanFilter`          — rewrites the plan before execution (protected entities)
//! - `PhaseGate`           — intercepts a phase before it runs (deactivation)
//! - `Confirmer`           — the single synchronous yes/no confirmation channel
//! - `ConvergenceVerifier` — compares expected and observed end state
//! - `AuditSink`           — append-only outcome record sink
//!
//! The executor wires them together in phase order. Nothing reaches
//! `WorkspaceApi::apply` without passing the filter and the gate first.

use async_trait::async_trait;

use rostersync_contracts::{
    error::SyncResult,
    identity::RunId,
    operation::{ExecutionPhase, ExpectedUser, Operation, Plan},
    outcome::OutcomeRecord,
    remote::{ApiResult, CallOutcome, RemoteCall, RemoteGroup, RemoteUser},
    scope::Scope,
    snapshot::{CustomFieldDef, ObservedUser, Snapshot},
    verify::DriftReport,
};

/// The remote workspace service, as seen through its HTTP client.
///
/// Implementations own pagination and (de)serialisation. Every method is one
/// logical call; the transport wraps each invocation with rate limiting and
/// retries, so implementations must not retry on their own.
#[async_trait]
pub trait WorkspaceApi: Send + Sync {
    /// A minimal read-only call confirming the credential holds `scope`.
    ///
    /// `Scope::GroupsWrite` is not probed through here; the permission probe
    /// re-asserts an existing membership with `apply` instead.
    async fn probe(&self, scope: Scope) -> ApiResult<()>;

    async fn list_users(&self) -> ApiResult<Vec<RemoteUser>>;

    async fn list_groups(&self) -> ApiResult<Vec<RemoteGroup>>;

    async fn list_custom_fields(&self) -> ApiResult<Vec<CustomFieldDef>>;

    /// Perform one mutating call.
    ///
    /// Must report "already exists"/"already assigned"/"already gone" as
    /// `CallOutcome::AlreadySatisfied`, never as an error.
    async fn apply(&self, call: &RemoteCall) -> ApiResult<CallOutcome>;
}

/// Rewrites a plan before it reaches the executor.
pub trait PlanFilter: Send + Sync {
    /// Return the plan to execute. Operations may be re-tagged as skipped but
    /// must not be dropped: every skipped operation still produces an outcome.
    fn filter(&self, plan: Plan) -> Plan;
}

/// Intercepts a phase just before its operations are dispatched.
pub trait PhaseGate: Send + Sync {
    /// Return the operations to run for `phase`.
    ///
    /// A gate may mark operations skipped or insert new ones declared for the
    /// same phase. Errors abort the run. `snapshot` is the run's working view:
    /// the pre-run snapshot with every converged operation of earlier phases
    /// folded in.
    fn before_phase(
        &self,
        phase: ExecutionPhase,
        operations: Vec<Operation>,
        snapshot: &Snapshot,
    ) -> SyncResult<Vec<Operation>>;
}

/// The operator confirmation channel.
pub trait Confirmer: Send + Sync {
    /// Ask the operator once and return what they typed, or `None` if they
    /// declined to answer.
    fn request_token(&self, prompt: &str) -> SyncResult<Option<String>>;
}

/// Compares a roster user's expected state with what the workspace holds.
pub trait ConvergenceVerifier: Send + Sync {
    /// `observed` is `None` when the user does not exist remotely.
    fn verify(&self, expected: &ExpectedUser, observed: Option<&ObservedUser>) -> DriftReport;
}

/// The audit sink: one record per operation outcome, append-only.
///
/// A failed write is fatal to the run: the executor returns
/// `SyncError::AuditWriteFailed` instead of continuing unaudited.
pub trait AuditSink: Send + Sync {
    /// Append one outcome. Implementations must make the record durable (or at
    /// least flushed) before returning.
    fn record(&self, outcome: &OutcomeRecord) -> SyncResult<()>;

    /// Called once when the run finishes, cancelled or not.
    fn finalize(&self, run_id: &RunId) -> SyncResult<()>;
}
