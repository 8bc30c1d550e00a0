//! `SyncConfig`: the TOML run configuration.
//!
//! Every table and key is optional; missing values take the defaults below.
//! `from_toml_str` and `from_file` validate before returning, so a config in
//! hand is always usable.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use rostersync_contracts::{
    error::{SyncError, SyncResult},
    identity::{GroupKey, IdentityKey},
};
use rostersync_core::{BackoffPolicy, EngineSettings, RateLimiter};
use rostersync_planner::{FieldMapping, PlannerOptions};

/// Token the operator must type when none is configured.
pub const DEFAULT_CONFIRMATION_TOKEN: &str = "I UNDERSTAND";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub workspace: WorkspaceSection,
    pub transport: TransportSection,
    pub deactivation: DeactivationSection,
    pub cleanup: CleanupSection,
    pub verification: VerificationSection,
    pub mapping: FieldMapping,
}

/// Identities and protected entities of the target workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSection {
    /// Identity key of the fallback manager. Required when deactivation is
    /// enabled.
    pub fallback_manager: Option<String>,
    /// Team group for users without a valid manager.
    pub fallback_group: Option<String>,
    /// Case-insensitive group names never removed from or deleted.
    pub protected_groups: Vec<String>,
    /// Identity keys never deactivated or stripped of memberships.
    pub protected_users: Vec<String>,
    /// Derive one team group per manager.
    pub team_groups: bool,
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            fallback_manager: None,
            fallback_group: None,
            protected_groups: Vec::new(),
            protected_users: Vec::new(),
            team_groups: true,
        }
    }
}

/// Rate-limit budget, retries and worker pool size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    pub requests_per_second: u32,
    /// Token bucket capacity.
    pub burst: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_retries: u32,
    pub max_concurrency: usize,
    /// Short-circuit every mutating call.
    pub dry_run: bool,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            requests_per_second: 6,
            burst: 6,
            base_backoff_ms: 1_000,
            max_backoff_ms: 16_000,
            max_retries: 3,
            max_concurrency: 4,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeactivationSection {
    pub enabled: bool,
    pub confirmation_token: String,
}

impl Default for DeactivationSection {
    fn default() -> Self {
        Self {
            enabled: false,
            confirmation_token: DEFAULT_CONFIRMATION_TOKEN.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupSection {
    pub delete_stale_groups: bool,
    pub remove_stale_manager_roles: bool,
}

impl Default for CleanupSection {
    fn default() -> Self {
        Self {
            delete_stale_groups: false,
            remove_stale_manager_roles: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSection {
    pub enabled: bool,
}

impl Default for VerificationSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl SyncConfig {
    /// Parse and validate a TOML document.
    ///
    /// Returns `SyncError::ConfigError` if the TOML is malformed or a value
    /// fails validation.
    pub fn from_toml_str(s: &str) -> SyncResult<Self> {
        let config: SyncConfig = toml::from_str(s).map_err(|e| SyncError::ConfigError {
            reason: format!("failed to parse sync config TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the file at `path`.
    pub fn from_file(path: &Path) -> SyncResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| SyncError::ConfigError {
            reason: format!("failed to read sync config '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> SyncResult<()> {
        let t = &self.transport;
        let fail = |reason: &str| {
            Err(SyncError::ConfigError {
                reason: reason.to_string(),
            })
        };
        if t.requests_per_second == 0 {
            return fail("transport.requests_per_second must be at least 1");
        }
        if t.burst == 0 {
            return fail("transport.burst must be at least 1");
        }
        if t.max_concurrency == 0 {
            return fail("transport.max_concurrency must be at least 1");
        }
        if t.base_backoff_ms > t.max_backoff_ms {
            return fail("transport.base_backoff_ms must not exceed transport.max_backoff_ms");
        }
        if self.deactivation.confirmation_token.trim().is_empty() {
            return fail("deactivation.confirmation_token must not be empty");
        }
        if self.deactivation.enabled && self.fallback_manager().is_none() {
            return fail("workspace.fallback_manager is required when deactivation is enabled");
        }
        if self.mapping.email_column.trim().is_empty() {
            return fail("mapping.email_column must not be empty");
        }
        if self.mapping.working_days_per_week == 0 {
            return fail("mapping.working_days_per_week must be at least 1");
        }
        Ok(())
    }

    pub fn fallback_manager(&self) -> Option<IdentityKey> {
        self.workspace
            .fallback_manager
            .as_deref()
            .map(IdentityKey::new)
            .filter(|k| !k.is_empty())
    }

    pub fn protected_groups(&self) -> BTreeSet<GroupKey> {
        self.workspace
            .protected_groups
            .iter()
            .map(GroupKey::new)
            .collect()
    }

    pub fn protected_users(&self) -> BTreeSet<IdentityKey> {
        self.workspace
            .protected_users
            .iter()
            .map(IdentityKey::new)
            .collect()
    }

    pub fn planner_options(&self) -> PlannerOptions {
        PlannerOptions {
            fallback_manager: self.fallback_manager(),
            fallback_group: self
                .workspace
                .fallback_group
                .clone()
                .filter(|g| !g.trim().is_empty()),
            team_groups: self.workspace.team_groups,
            deactivate_missing: self.deactivation.enabled,
            protected_users: self.protected_users(),
            delete_stale_groups: self.cleanup.delete_stale_groups,
            remove_stale_manager_roles: self.cleanup.remove_stale_manager_roles,
            verify: self.verification.enabled,
            custom_fields: self.mapping.custom_field_names(),
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.transport.base_backoff_ms),
            Duration::from_millis(self.transport.max_backoff_ms),
            self.transport.max_retries,
        )
    }

    /// A fresh limiter sized from `[transport]`, to be shared by the whole run.
    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::per_second(
            self.transport.requests_per_second,
            self.transport.burst,
        ))
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            planner: self.planner_options(),
            protected_groups: self.protected_groups(),
            max_concurrency: self.transport.max_concurrency,
        }
    }
}
