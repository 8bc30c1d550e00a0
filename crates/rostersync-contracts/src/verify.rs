//! Convergence verification report types.
//!
//! The Verification phase compares each roster user's expected end state with
//! a freshly loaded snapshot. Every difference is collected before the report
//! is returned so operators see the full drift set in one pass.

use serde::{Deserialize, Serialize};

use crate::identity::IdentityKey;

/// One attribute that did not converge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drift {
    /// Attribute path, e.g. `"profile.work_capacity"` or `"group:team-a"`.
    pub field: String,
    pub expected: String,
    pub actual: String,
}

/// The result of verifying one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
    pub key: IdentityKey,
    /// Empty when the user has converged.
    pub drifts: Vec<Drift>,
}

impl DriftReport {
    pub fn converged(&self) -> bool {
        self.drifts.is_empty()
    }

    /// `field: expected 'x', found 'y'` entries joined with `"; "`.
    pub fn summary(&self) -> String {
        self.drifts
            .iter()
            .map(|d| format!("{}: expected '{}', found '{}'", d.field, d.expected, d.actual))
            .collect::<Vec<_>>()
            .join("; ")
    }
}
