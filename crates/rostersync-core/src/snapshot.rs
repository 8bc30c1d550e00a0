//! Observed-state loading.
//!
//! Fetches users, groups and custom-field definitions through the
//! rate-limited transport and assembles them into a keyed `Snapshot`.
//! Remote ids are translated to identity keys here so nothing downstream
//! handles raw ids except the executor's id map.

use std::collections::HashMap;
use std::future::Future;

use tracing::{info, warn};

use rostersync_contracts::{
    error::{SyncError, SyncResult},
    identity::{GroupKey, IdentityKey, RemoteId},
    remote::{ApiResult, RemoteGroup, RemoteUser},
    snapshot::{CustomFieldDef, ObservedGroup, ObservedUser, Snapshot},
};

use crate::transport::RateLimitedTransport;

pub struct SnapshotLoader<'a> {
    transport: &'a RateLimitedTransport,
}

impl<'a> SnapshotLoader<'a> {
    pub fn new(transport: &'a RateLimitedTransport) -> Self {
        Self { transport }
    }

    /// Fetch and assemble a fresh snapshot.
    ///
    /// # Errors
    ///
    /// `SyncError::SnapshotLoad` when any listing fails after retries, and
    /// `SyncError::DuplicateIdentity` when two remote users share a key.
    pub async fn load(&self) -> SyncResult<Snapshot> {
        let api = self.transport.api();
        let users = self.fetch("list_users", || api.list_users()).await?;
        let groups = self.fetch("list_groups", || api.list_groups()).await?;
        let fields = self
            .fetch("list_custom_fields", || api.list_custom_fields())
            .await?;

        let snapshot = assemble(users, groups, fields)?;
        info!(
            users = snapshot.users.len(),
            groups = snapshot.groups.len(),
            custom_fields = snapshot.custom_fields.len(),
            "snapshot loaded"
        );
        Ok(snapshot)
    }

    async fn fetch<T, F, Fut>(&self, label: &str, call: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        self.transport
            .send(label, call)
            .await
            .result
            .map_err(|e| SyncError::SnapshotLoad {
                reason: format!("{label}: {e}"),
            })
    }
}

/// Key the raw listings by identity and derive memberships.
///
/// Users without an email cannot be matched to the roster and are left out.
/// References to ids that are not in the listings (members, managers, field
/// values) are dropped.
pub fn assemble(
    users: Vec<RemoteUser>,
    groups: Vec<RemoteGroup>,
    fields: Vec<CustomFieldDef>,
) -> SyncResult<Snapshot> {
    let keys: HashMap<RemoteId, IdentityKey> = users
        .iter()
        .map(|u| (u.id.clone(), IdentityKey::new(&u.email)))
        .filter(|(_, key)| !key.is_empty())
        .collect();
    let field_names: HashMap<&RemoteId, &str> =
        fields.iter().map(|f| (&f.remote_id, f.name.as_str())).collect();

    let mut observed_users = Vec::with_capacity(users.len());
    for user in &users {
        let Some(key) = keys.get(&user.id) else {
            warn!(remote_id = %user.id, "remote user has no email; ignored");
            continue;
        };
        let custom_fields = user
            .custom_fields
            .iter()
            .filter_map(|(id, value)| field_names.get(id).map(|n| (n.to_string(), value.clone())))
            .collect();
        observed_users.push(ObservedUser {
            remote_id: user.id.clone(),
            key: key.clone(),
            display_name: display_name(user),
            status: user.status,
            profile: user.profile.clone(),
            custom_fields,
            manager: user.manager_id.as_ref().and_then(|m| keys.get(m).cloned()),
            groups: Default::default(),
        });
    }

    let observed_groups = groups
        .into_iter()
        .map(|g| ObservedGroup {
            key: GroupKey::new(&g.name),
            members: g.member_ids.iter().filter_map(|id| keys.get(id).cloned()).collect(),
            managers: g.manager_ids.iter().filter_map(|id| keys.get(id).cloned()).collect(),
            remote_id: g.id,
            name: g.name,
        })
        .collect();

    Snapshot::new(observed_users, observed_groups, fields)
}

/// The user's trimmed name, or the trimmed email when the name is blank.
fn display_name(user: &RemoteUser) -> String {
    let name = user.name.trim();
    if name.is_empty() {
        user.email.trim().to_string()
    } else {
        name.to_string()
    }
}
