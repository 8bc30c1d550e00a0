//! Permission probe: confirms the credential's scopes before any state is
//! loaded.
//!
//! Read scopes are checked with the API's no-op probe call. Group write
//! access is checked by re-asserting an existing membership of a
//! non-protected group, which the service treats as a no-op when permitted.
//! All scopes are probed before the verdict so the error names every missing
//! one. A dry run sends no mutating call, so it does not probe group write
//! access either.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use rostersync_contracts::{
    error::{SyncError, SyncResult},
    identity::GroupKey,
    remote::RemoteCall,
    scope::{Scope, ScopeSet},
};

use crate::transport::RateLimitedTransport;

pub struct PermissionProbe<'a> {
    transport: &'a RateLimitedTransport,
    protected_groups: &'a BTreeSet<GroupKey>,
}

impl<'a> PermissionProbe<'a> {
    pub fn new(transport: &'a RateLimitedTransport, protected_groups: &'a BTreeSet<GroupKey>) -> Self {
        Self {
            transport,
            protected_groups,
        }
    }

    /// Probe every required scope.
    ///
    /// # Errors
    ///
    /// `SyncError::InsufficientScope` listing each scope that was refused.
    pub async fn run(&self) -> SyncResult<ScopeSet> {
        let mut granted = ScopeSet::default();
        for scope in Scope::REQUIRED {
            let ok = match scope {
                Scope::GroupsWrite => self.probe_group_write().await,
                read => self.probe_read(read).await,
            };
            if ok {
                granted.grant(scope);
            } else {
                warn!(scope = %scope, "credential lacks scope");
            }
        }

        let missing = granted.missing(&Scope::REQUIRED);
        if missing.is_empty() {
            info!("permission probe passed");
            Ok(granted)
        } else {
            Err(SyncError::InsufficientScope {
                missing: missing.iter().map(|s| s.to_string()).collect(),
            })
        }
    }

    async fn probe_read(&self, scope: Scope) -> bool {
        let api = self.transport.api();
        let attempted = self.transport.send("probe", || api.probe(scope)).await;
        match attempted.result {
            Ok(()) => true,
            Err(error) => {
                debug!(scope = %scope, error = %error, "probe call refused");
                false
            }
        }
    }

    // With no usable group the probe has nothing safe to re-assert and lets
    // the run proceed.
    async fn probe_group_write(&self) -> bool {
        if self.transport.is_dry_run() {
            debug!("dry run; group write access not probed");
            return true;
        }
        let api = self.transport.api();
        let groups = match self.transport.send("probe", || api.list_groups()).await.result {
            Ok(groups) => groups,
            Err(error) => {
                debug!(error = %error, "could not list groups for write probe");
                return false;
            }
        };

        let candidate = groups.iter().find_map(|g| {
            if self.protected_groups.contains(&GroupKey::new(&g.name)) {
                return None;
            }
            g.member_ids.first().map(|member| (g, member))
        });
        let Some((group, member)) = candidate else {
            debug!("no non-protected group with members; skipping write probe");
            return true;
        };

        debug!(group = %group.name, "probing group write access");
        let call = RemoteCall::AddGroupMember {
            group: group.id.clone(),
            user: member.clone(),
        };
        match self.transport.send("probe", || api.apply(&call)).await.result {
            Ok(_) => true,
            Err(error) => {
                debug!(group = %group.name, error = %error, "write probe refused");
                false
            }
        }
    }
}
