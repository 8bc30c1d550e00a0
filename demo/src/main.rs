//! rostersync: command-line runner.
//!
//! Runs the reference scenarios against the in-memory workspace, prints the
//! plan for a roster and a workspace listing, or runs a full sync against a
//! listing with a JSON-lines audit trail.
//!
//! Usage:
//!   cargo run -p rostersync-demo -- run-all
//!   cargo run -p rostersync-demo -- new-hire
//!   cargo run -p rostersync-demo -- plan --roster demo/fixtures/roster.json \
//!       --snapshot demo/fixtures/workspace.json --config demo/fixtures/sync.toml
//!   cargo run -p rostersync-demo -- sync --roster demo/fixtures/roster.json \
//!       --snapshot demo/fixtures/workspace.json --config demo/fixtures/sync.toml --audit-dir .

use std::future::Future;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rostersync_audit::JsonlAuditSink;
use rostersync_contracts::{
    error::{SyncError, SyncResult},
    identity::RunId,
    remote::{RemoteGroup, RemoteUser},
    roster::{DesiredRecord, RosterRow},
    snapshot::CustomFieldDef,
};
use rostersync_core::{traits::Confirmer, traits::PlanFilter, RateLimitedTransport, SyncEngine};
use rostersync_policy::{DeactivationGate, ProtectedEntityFilter, StaticConfirmer, SyncConfig};
use rostersync_ref_workspace::{
    scenarios::{self, deactivation, new_hire, protected_group, rate_limit, rerun},
    InMemoryWorkspace,
};
use rostersync_verify::DriftVerifier;

// ── CLI definition ────────────────────────────────────────────────────────────

/// rostersync: reconcile a workspace with its identity roster.
#[derive(Parser)]
#[command(
    name = "rostersync",
    about = "Roster-to-workspace reconciliation engine",
    long_about = "Runs rostersync reference scenarios, or plans and syncs a roster\n\
                  against a JSON workspace listing with a hash-chained audit trail."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every reference scenario in sequence.
    RunAll,
    /// Scenario 1: a new hire is created, profiled and placed in a team.
    NewHire,
    /// Scenario 2: a removal from a protected group is skipped.
    ProtectedGroup,
    /// Scenario 3: three 429 answers absorbed by exponential backoff.
    RateLimit,
    /// Scenario 4: confirmed and unconfirmed deactivation of leavers.
    Deactivation,
    /// Scenario 5: a second run against a converged workspace changes nothing.
    Rerun,
    /// Print the filtered plan for a roster against a workspace listing.
    Plan(FixtureArgs),
    /// Run a full sync against an in-memory copy of a workspace listing.
    Sync {
        #[command(flatten)]
        fixtures: FixtureArgs,
        /// Directory receiving sync_success_log.jsonl and sync_error_log.jsonl.
        #[arg(long, default_value = ".")]
        audit_dir: PathBuf,
        /// Deactivation confirmation token. Prompted on stdin when absent.
        #[arg(long)]
        confirm: Option<String>,
    },
}

#[derive(clap::Args)]
struct FixtureArgs {
    /// JSON array of roster rows (column name to cell value).
    #[arg(long)]
    roster: PathBuf,
    /// JSON workspace listing: `users`, `groups` and `custom_fields`.
    #[arg(long)]
    snapshot: PathBuf,
    /// TOML sync configuration. Defaults apply when absent.
    #[arg(long)]
    config: Option<PathBuf>,
}

/// The three listings a workspace answers with.
#[derive(Deserialize)]
struct WorkspaceListing {
    #[serde(default)]
    users: Vec<RemoteUser>,
    #[serde(default)]
    groups: Vec<RemoteGroup>,
    #[serde(default)]
    custom_fields: Vec<CustomFieldDef>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Set RUST_LOG=debug for every retry and gate decision.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::RunAll => scenarios::run_all().await,
        Command::NewHire => new_hire::run_scenario().await.map(drop),
        Command::ProtectedGroup => protected_group::run_scenario().await.map(drop),
        Command::RateLimit => rate_limit::run_scenario().await.map(drop),
        Command::Deactivation => run_deactivation().await,
        Command::Rerun => rerun::run_scenario().await.map(drop),
        Command::Plan(fixtures) => run_plan(&fixtures),
        Command::Sync {
            fixtures,
            audit_dir,
            confirm,
        } => run_sync(&fixtures, &audit_dir, confirm).await,
    };

    if let Err(e) = result {
        eprintln!("rostersync error: {}", e);
        std::process::exit(1);
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn run_deactivation() -> SyncResult<()> {
    deactivation::run_scenario(true).await?;
    deactivation::run_scenario(false).await?;
    Ok(())
}

fn run_plan(fixtures: &FixtureArgs) -> SyncResult<()> {
    let config = load_config(fixtures.config.as_deref())?;
    let desired = load_roster(&fixtures.roster, &config)?;
    let listing = load_listing(&fixtures.snapshot)?;
    let snapshot =
        rostersync_core::snapshot::assemble(listing.users, listing.groups, listing.custom_fields)?;

    let plan = rostersync_planner::plan(&desired, &snapshot, &config.planner_options())?;
    let plan = ProtectedEntityFilter::from_config(&config).filter(plan);
    print_json(&plan)
}

async fn run_sync(fixtures: &FixtureArgs, audit_dir: &Path, confirm: Option<String>) -> SyncResult<()> {
    let config = load_config(fixtures.config.as_deref())?;
    let desired = load_roster(&fixtures.roster, &config)?;
    let listing = load_listing(&fixtures.snapshot)?;

    let workspace = listing.users.into_iter().fold(InMemoryWorkspace::new(), InMemoryWorkspace::with_user);
    let workspace = listing.groups.into_iter().fold(workspace, InMemoryWorkspace::with_group);
    let workspace = listing
        .custom_fields
        .into_iter()
        .fold(workspace, InMemoryWorkspace::with_custom_field);

    let confirmer: Box<dyn Confirmer> = match confirm {
        Some(token) => Box::new(StaticConfirmer::answering(token)),
        None => Box::new(StdinConfirmer),
    };

    let run_id = RunId::new();
    let audit = Arc::new(JsonlAuditSink::create(audit_dir, &run_id)?);
    let transport = RateLimitedTransport::new(
        Arc::new(workspace),
        config.rate_limiter(),
        config.backoff_policy(),
    )
    .with_dry_run(config.transport.dry_run);
    let engine = SyncEngine::new(
        Arc::new(transport),
        Box::new(ProtectedEntityFilter::from_config(&config)),
        Box::new(DeactivationGate::from_config(&config, confirmer)),
        Arc::new(DriftVerifier::new()),
        audit,
        config.engine_settings(),
    );

    let cancel = cancel_on(tokio::signal::ctrl_c());
    let report = engine.run(run_id, &desired, &cancel).await?;
    info!(audit_dir = %audit_dir.display(), "audit written");
    print_json(&report)
}

/// A token cancelled once `signal` resolves. The engine stops at the next
/// phase boundary.
fn cancel_on<F>(signal: F) -> CancellationToken
where
    F: Future<Output = std::io::Result<()>> + Send + 'static,
{
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match signal.await {
            Ok(()) => {
                warn!("interrupt received; stopping after the current phase");
                trigger.cancel();
            }
            Err(e) => warn!(error = %e, "could not listen for interrupts"),
        }
    });
    token
}

// ── Loading ───────────────────────────────────────────────────────────────────

fn load_config(path: Option<&Path>) -> SyncResult<SyncConfig> {
    match path {
        Some(path) => SyncConfig::from_file(path),
        None => Ok(SyncConfig::default()),
    }
}

fn load_roster(path: &Path, config: &SyncConfig) -> SyncResult<Vec<DesiredRecord>> {
    let contents = std::fs::read_to_string(path).map_err(|e| SyncError::ConfigError {
        reason: format!("failed to read roster '{}': {}", path.display(), e),
    })?;
    let rows: Vec<RosterRow> = serde_json::from_str(&contents).map_err(|e| SyncError::ConfigError {
        reason: format!("failed to parse roster JSON '{}': {}", path.display(), e),
    })?;
    config.mapping.to_desired(&rows)
}

fn load_listing(path: &Path) -> SyncResult<WorkspaceListing> {
    let contents = std::fs::read_to_string(path).map_err(|e| SyncError::SnapshotLoad {
        reason: format!("failed to read workspace listing '{}': {}", path.display(), e),
    })?;
    serde_json::from_str(&contents).map_err(|e| SyncError::SnapshotLoad {
        reason: format!("failed to parse workspace listing '{}': {}", path.display(), e),
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> SyncResult<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| SyncError::ConfigError {
        reason: format!("failed to render output: {}", e),
    })?;
    println!("{}", json);
    Ok(())
}

// ── Confirmation ──────────────────────────────────────────────────────────────

/// Reads the confirmation token from the operator's terminal.
struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn request_token(&self, prompt: &str) -> SyncResult<Option<String>> {
        let mut stderr = std::io::stderr();
        write!(stderr, "{}: ", prompt)
            .and_then(|_| stderr.flush())
            .map_err(|e| SyncError::GateFailed {
                reason: format!("failed to prompt for confirmation: {}", e),
            })?;

        let mut line = String::new();
        let read = std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| SyncError::GateFailed {
                reason: format!("failed to read confirmation: {}", e),
            })?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rostersync_contracts::operation::Plan;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures").join(name)
    }

    #[test]
    fn cli_parses_plan_arguments() {
        let cli = Cli::try_parse_from([
            "rostersync",
            "plan",
            "--roster",
            "r.json",
            "--snapshot",
            "s.json",
        ])
        .unwrap();
        match cli.command {
            Command::Plan(args) => {
                assert_eq!(args.roster, PathBuf::from("r.json"));
                assert!(args.config.is_none());
            }
            _ => panic!("expected plan subcommand"),
        }
    }

    #[test]
    fn fixtures_load_and_plan() {
        let config = load_config(Some(&fixture("sync.toml"))).unwrap();
        let desired = load_roster(&fixture("roster.json"), &config).unwrap();
        let listing = load_listing(&fixture("workspace.json")).unwrap();
        assert_eq!(desired.len(), 3);
        assert_eq!(listing.users.len(), 3);

        let snapshot =
            rostersync_core::snapshot::assemble(listing.users, listing.groups, listing.custom_fields)
                .unwrap();
        let plan: Plan = rostersync_planner::plan(&desired, &snapshot, &config.planner_options()).unwrap();
        assert!(plan.pending_changes().count() > 0);
        assert!(plan
            .operations()
            .iter()
            .any(|op| op.subject().to_string() == "lee.vance@example.com"));
    }

    #[tokio::test]
    async fn interrupt_cancels_the_run_token() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let token = cancel_on(async move {
            let _ = rx.await;
            Ok(())
        });
        assert!(!token.is_cancelled());

        tx.send(()).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), token.cancelled())
            .await
            .expect("token cancelled after the interrupt");
    }

    #[tokio::test]
    async fn failed_signal_listener_leaves_the_run_alone() {
        let token = cancel_on(async { Err(std::io::Error::other("no signal handler")) });
        tokio::task::yield_now().await;
        assert!(!token.is_cancelled());
    }

    #[test]
    fn missing_roster_is_a_config_error() {
        let config = SyncConfig::default();
        match load_roster(Path::new("/nonexistent/roster.json"), &config) {
            Err(SyncError::ConfigError { reason }) => assert!(reason.contains("roster")),
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }
}
