//! Desired-state types produced from the roster.
//!
//! The roster is authoritative. Its rows arrive already parsed (column names
//! trimmed) and are turned into `DesiredRecord`s by the planner's field
//! mapping before the differencer sees them.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::identity::{GroupKey, IdentityKey};

/// One raw roster row: column name to cell value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RosterRow(pub BTreeMap<String, String>);

impl RosterRow {
    /// Return the trimmed cell for `column`, or `None` when absent or blank.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0
            .get(column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Builder-style helper used by fixtures and tests.
    pub fn with(mut self, column: &str, value: &str) -> Self {
        self.0.insert(column.to_string(), value.to_string());
        self
    }
}

/// One user as the roster wants it to exist remotely.
///
/// Immutable input to a run. `groups` holds the explicit memberships from the
/// roster; derived team groups are added by the planner, not stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredRecord {
    /// Identity key (normalised email).
    pub key: IdentityKey,
    /// Display name to show in the workspace.
    pub display_name: String,
    /// Built-in profile fields (e.g. `work_capacity`) keyed by field name.
    #[serde(default)]
    pub profile: BTreeMap<String, String>,
    /// Custom-field values keyed by custom-field name.
    #[serde(default)]
    pub custom_fields: BTreeMap<String, String>,
    /// Identity key of the user's manager, if the roster names one.
    #[serde(default)]
    pub manager: Option<IdentityKey>,
    /// Explicit group memberships, keyed by normalised group name, with the
    /// roster's display casing as the value.
    #[serde(default)]
    pub groups: BTreeMap<GroupKey, String>,
}

impl DesiredRecord {
    /// Minimal record: a key and a display name, no fields or memberships.
    pub fn new(key: impl AsRef<str>, display_name: impl Into<String>) -> Self {
        Self {
            key: IdentityKey::new(key),
            display_name: display_name.into(),
            profile: BTreeMap::new(),
            custom_fields: BTreeMap::new(),
            manager: None,
            groups: BTreeMap::new(),
        }
    }

    pub fn with_manager(mut self, manager: impl AsRef<str>) -> Self {
        self.manager = Some(IdentityKey::new(manager));
        self
    }

    pub fn with_group(mut self, name: &str) -> Self {
        self.groups.insert(GroupKey::new(name), name.trim().to_string());
        self
    }

    pub fn with_profile(mut self, field: &str, value: &str) -> Self {
        self.profile.insert(field.to_string(), value.to_string());
        self
    }

    pub fn with_custom_field(mut self, field: &str, value: &str) -> Self {
        self.custom_fields.insert(field.to_string(), value.to_string());
        self
    }

    /// The set of explicit group keys.
    pub fn group_keys(&self) -> BTreeSet<GroupKey> {
        self.groups.keys().cloned().collect()
    }
}
