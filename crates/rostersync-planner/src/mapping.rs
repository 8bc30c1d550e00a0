//! Roster row to `DesiredRecord` mapping.
//!
//! Rows arrive as column→value maps with trimmed column names. The mapping
//! names the columns that carry identity, display name, manager, explicit
//! groups, weekly hours and custom fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use rostersync_contracts::{
    error::{SyncError, SyncResult},
    identity::IdentityKey,
    roster::{DesiredRecord, RosterRow},
};

/// Profile field that receives the daily work capacity.
pub const WORK_CAPACITY_FIELD: &str = "work_capacity";

/// Which roster columns feed which desired attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMapping {
    pub email_column: String,
    pub name_column: String,
    pub manager_column: String,
    pub groups_column: String,
    pub group_separator: String,
    pub weekly_hours_column: String,
    pub working_days_per_week: u32,
    /// Weekly hours assumed when the hours cell is missing or blank.
    pub default_weekly_hours: f64,
    /// Roster column → custom-field name.
    pub custom_fields: BTreeMap<String, String>,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            email_column: "NTID email".to_string(),
            name_column: "Name".to_string(),
            manager_column: "Manager NTID email".to_string(),
            groups_column: "Groups".to_string(),
            group_separator: ";".to_string(),
            weekly_hours_column: "Weekly Working Hours".to_string(),
            working_days_per_week: 5,
            default_weekly_hours: 40.0,
            custom_fields: BTreeMap::new(),
        }
    }
}

impl FieldMapping {
    /// Custom-field names the mapping writes to.
    pub fn custom_field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.custom_fields.values().cloned().collect();
        names.sort();
        names.dedup();
        names
    }

    /// Map rows to desired records, keeping roster order.
    ///
    /// # Errors
    ///
    /// `SyncError::ConfigError` naming the 1-based row whose identity cell is
    /// empty.
    pub fn to_desired(&self, rows: &[RosterRow]) -> SyncResult<Vec<DesiredRecord>> {
        rows.iter()
            .enumerate()
            .map(|(index, row)| self.map_row(index, row))
            .collect()
    }

    fn map_row(&self, index: usize, row: &RosterRow) -> SyncResult<DesiredRecord> {
        let key = row
            .get(&self.email_column)
            .map(IdentityKey::new)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| SyncError::ConfigError {
                reason: format!(
                    "roster row {} has no value in column '{}'",
                    index + 1,
                    self.email_column
                ),
            })?;

        let name = row
            .get(&self.name_column)
            .map(str::to_string)
            .unwrap_or_else(|| key.to_string());
        let mut record = DesiredRecord::new(key.as_str(), name);

        if let Some(manager) = row.get(&self.manager_column) {
            record = record.with_manager(manager);
        }

        if let Some(groups) = row.get(&self.groups_column) {
            for group in groups
                .split(self.group_separator.as_str())
                .map(str::trim)
                .filter(|g| !g.is_empty())
            {
                record = record.with_group(group);
            }
        }

        let weekly_hours = row
            .get(&self.weekly_hours_column)
            .map(clean_number)
            .unwrap_or(self.default_weekly_hours);
        let days = f64::from(self.working_days_per_week.max(1));
        record = record.with_profile(WORK_CAPACITY_FIELD, &to_iso8601(weekly_hours / days));

        for (column, field) in &self.custom_fields {
            record = record.with_custom_field(field, row.get(column).unwrap_or(""));
        }

        Ok(record)
    }
}

/// Parse an hours figure leniently: `,` is accepted as the decimal separator
/// and anything unparseable (or non-finite) is 0.
pub fn clean_number(raw: &str) -> f64 {
    raw.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .unwrap_or(0.0)
}

/// Render hours as an ISO-8601 duration, `PT{h}H{m}M`, minutes rounded.
pub fn to_iso8601(hours: f64) -> String {
    let total_minutes = (hours.max(0.0) * 60.0).round() as u64;
    format!("PT{}H{}M", total_minutes / 60, total_minutes % 60)
}
