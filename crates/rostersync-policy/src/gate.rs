//! `DeactivationGate`: the confirmation step in front of the Deactivation
//! phase.
//!
//! The operator is asked once per run, and only if the phase holds at least
//! one deactivation still due to run. Anything but the exact token marks the
//! whole phase `Skipped(unconfirmed)`. On confirmation every leaver's managed
//! groups and direct reports get one `ReassignManager` operation each, placed
//! ahead of that leaver's `DeactivateUser` in the same chain. What a leaver
//! manages is read from the executor's working view, so reports already moved
//! and groups already deleted earlier in the run are left alone.

use tracing::{debug, info, warn};

use rostersync_contracts::{
    error::{SyncError, SyncResult},
    identity::IdentityKey,
    operation::{ExecutionPhase, Operation, OperationKind, SkipReason},
    snapshot::Snapshot,
};
use rostersync_core::traits::{Confirmer, PhaseGate};

use crate::config::SyncConfig;

pub struct DeactivationGate {
    confirmer: Box<dyn Confirmer>,
    token: String,
    fallback_manager: Option<IdentityKey>,
}

impl DeactivationGate {
    pub fn new(
        confirmer: Box<dyn Confirmer>,
        token: impl Into<String>,
        fallback_manager: Option<IdentityKey>,
    ) -> Self {
        Self {
            confirmer,
            token: token.into(),
            fallback_manager,
        }
    }

    pub fn from_config(config: &SyncConfig, confirmer: Box<dyn Confirmer>) -> Self {
        Self::new(
            confirmer,
            config.deactivation.confirmation_token.clone(),
            config.fallback_manager(),
        )
    }

    fn confirmed(&self, pending: usize) -> SyncResult<bool> {
        let prompt = format!(
            "{} user(s) will be deactivated. Type '{}' to proceed",
            pending, self.token
        );
        let answer = self.confirmer.request_token(&prompt)?;
        Ok(answer.as_deref() == Some(self.token.as_str()))
    }
}

fn is_pending_deactivation(op: &Operation) -> bool {
    matches!(op.kind, OperationKind::DeactivateUser { .. }) && op.skip.is_none()
}

impl PhaseGate for DeactivationGate {
    fn before_phase(
        &self,
        phase: ExecutionPhase,
        mut operations: Vec<Operation>,
        snapshot: &Snapshot,
    ) -> SyncResult<Vec<Operation>> {
        if phase != ExecutionPhase::Deactivation {
            return Ok(operations);
        }
        let pending = operations.iter().filter(|op| is_pending_deactivation(op)).count();
        if pending == 0 {
            return Ok(operations);
        }

        if !self.confirmed(pending)? {
            warn!(pending, "deactivation not confirmed, phase skipped");
            for op in operations.iter_mut().filter(|op| op.skip.is_none()) {
                op.skip_with(SkipReason::Unconfirmed);
            }
            return Ok(operations);
        }

        let fallback = self
            .fallback_manager
            .as_ref()
            .ok_or_else(|| SyncError::GateFailed {
                reason: "deactivation confirmed but no fallback manager is configured".to_string(),
            })?;
        info!(pending, fallback = %fallback, "deactivation confirmed");

        let mut gated = Vec::with_capacity(operations.len());
        for op in operations {
            if let (OperationKind::DeactivateUser { user }, true) =
                (&op.kind, is_pending_deactivation(&op))
            {
                let entities = snapshot.managed_entities(user);
                debug!(user = %user, entities = entities.len(), "reassigning managed entities");
                for entity in entities {
                    gated.push(Operation::new(
                        OperationKind::ReassignManager {
                            from: user.clone(),
                            entity,
                            to: fallback.clone(),
                        },
                        op.position,
                    ));
                }
            }
            gated.push(op);
        }
        Ok(gated)
    }
}

/// A confirmer with a fixed answer, for unattended runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticConfirmer {
    answer: Option<String>,
}

impl StaticConfirmer {
    pub fn new(answer: Option<String>) -> Self {
        Self { answer }
    }

    pub fn answering(token: impl Into<String>) -> Self {
        Self::new(Some(token.into()))
    }

    pub fn declining() -> Self {
        Self::new(None)
    }
}

impl Confirmer for StaticConfirmer {
    fn request_token(&self, _prompt: &str) -> SyncResult<Option<String>> {
        Ok(self.answer.clone())
    }
}
