//! `DriftVerifier`: compares expected and observed user state.
//!
//! All drifts are collected before returning. A missing or deactivated user
//! yields a single drift, since nothing else about it can be compared.

use std::collections::HashMap;
use std::fmt::Display;

use tracing::{debug, warn};

use rostersync_contracts::{
    identity::IdentityKey,
    operation::ExpectedUser,
    snapshot::{ObservedUser, UserStatus},
    verify::{Drift, DriftReport},
};
use rostersync_core::traits::ConvergenceVerifier;

/// A caller-supplied check. Returns `Some(drift)` when the user has not
/// converged in the way the check cares about.
pub type CustomCheckFn = Box<dyn Fn(&ExpectedUser, &ObservedUser) -> Option<Drift> + Send + Sync>;

pub struct DriftVerifier {
    custom_checks: HashMap<String, CustomCheckFn>,
}

fn drift(field: impl Into<String>, expected: impl Display, actual: impl Display) -> Drift {
    Drift {
        field: field.into(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

fn manager_label(manager: Option<&IdentityKey>) -> String {
    manager.map(|m| m.to_string()).unwrap_or_else(|| "none".to_string())
}

impl DriftVerifier {
    pub fn new() -> Self {
        Self {
            custom_checks: HashMap::new(),
        }
    }

    /// Register `f` under `name`. The same name twice replaces the earlier
    /// check.
    pub fn register_check(&mut self, name: impl Into<String>, f: CustomCheckFn) {
        self.custom_checks.insert(name.into(), f);
    }

    fn attribute_drifts(expected: &ExpectedUser, observed: &ObservedUser, drifts: &mut Vec<Drift>) {
        if expected.display_name != observed.display_name {
            drifts.push(drift("name", &expected.display_name, &observed.display_name));
        }

        for (field, want) in &expected.profile {
            let have = observed.profile.get(field).map(String::as_str).unwrap_or("");
            if want != have {
                drifts.push(drift(format!("profile.{field}"), want, have));
            }
        }

        for (field, want) in &expected.custom_fields {
            let have = observed
                .custom_fields
                .get(field)
                .map(String::as_str)
                .unwrap_or("");
            if want != have {
                drifts.push(drift(format!("custom.{field}"), want, have));
            }
        }

        if expected.manager.is_some() && expected.manager != observed.manager {
            drifts.push(drift(
                "manager",
                manager_label(expected.manager.as_ref()),
                manager_label(observed.manager.as_ref()),
            ));
        }

        for group in expected.groups.difference(&observed.groups) {
            drifts.push(drift(format!("group:{group}"), "member", "absent"));
        }
    }
}

impl Default for DriftVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ConvergenceVerifier for DriftVerifier {
    fn verify(&self, expected: &ExpectedUser, observed: Option<&ObservedUser>) -> DriftReport {
        let mut drifts = Vec::new();

        match observed {
            None => drifts.push(drift("user", "present", "absent")),
            Some(user) if user.status == UserStatus::Inactive => {
                drifts.push(drift("status", "active", "inactive"))
            }
            Some(user) => {
                Self::attribute_drifts(expected, user, &mut drifts);

                let mut names: Vec<_> = self.custom_checks.keys().collect();
                names.sort();
                for name in names {
                    if let Some(f) = self.custom_checks.get(name) {
                        if let Some(d) = f(expected, user) {
                            debug!(check = %name, user = %expected.key, "custom check reported drift");
                            drifts.push(d);
                        }
                    }
                }
            }
        }

        let report = DriftReport {
            key: expected.key.clone(),
            drifts,
        };
        if report.converged() {
            debug!(user = %expected.key, "user converged");
        } else {
            warn!(user = %expected.key, drifts = report.drifts.len(), summary = %report.summary(), "user drifted");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::{BTreeMap, BTreeSet};

    use rostersync_contracts::identity::{GroupKey, RemoteId};

    fn key(s: &str) -> IdentityKey {
        IdentityKey::new(s)
    }

    fn expected() -> ExpectedUser {
        ExpectedUser {
            key: key("ann@example.com"),
            display_name: "Ann Lee".to_string(),
            profile: BTreeMap::from([("work_capacity".to_string(), "PT8H0M".to_string())]),
            custom_fields: BTreeMap::from([("Cost Center".to_string(), "CC-1".to_string())]),
            manager: Some(key("bob@example.com")),
            groups: BTreeSet::from([GroupKey::new("Bob Team"), GroupKey::new("All Staff")]),
        }
    }

    fn observed() -> ObservedUser {
        ObservedUser {
            remote_id: RemoteId::new("u1"),
            key: key("ann@example.com"),
            display_name: "Ann Lee".to_string(),
            status: UserStatus::Active,
            profile: BTreeMap::from([("work_capacity".to_string(), "PT8H0M".to_string())]),
            custom_fields: BTreeMap::from([("Cost Center".to_string(), "CC-1".to_string())]),
            manager: Some(key("bob@example.com")),
            groups: BTreeSet::from([
                GroupKey::new("bob team"),
                GroupKey::new("all staff"),
                GroupKey::new("extra"),
            ]),
        }
    }

    #[test]
    fn converged_user_has_no_drift() {
        let report = DriftVerifier::new().verify(&expected(), Some(&observed()));
        assert!(report.converged(), "unexpected drift: {}", report.summary());
    }

    #[test]
    fn pending_invite_counts_as_present() {
        let mut user = observed();
        user.status = UserStatus::Pending;
        assert!(DriftVerifier::new().verify(&expected(), Some(&user)).converged());
    }

    #[test]
    fn missing_user_is_a_single_drift() {
        let report = DriftVerifier::new().verify(&expected(), None);
        assert_eq!(report.drifts, vec![drift("user", "present", "absent")]);
    }

    #[test]
    fn deactivated_user_is_a_single_drift() {
        let mut user = observed();
        user.status = UserStatus::Inactive;
        user.display_name = "Someone Else".to_string();
        let report = DriftVerifier::new().verify(&expected(), Some(&user));
        assert_eq!(report.drifts.len(), 1);
        assert_eq!(report.drifts[0].field, "status");
    }

    #[test]
    fn every_drift_is_collected() {
        let mut user = observed();
        user.display_name = "Ann".to_string();
        user.profile.clear();
        user.custom_fields.insert("Cost Center".to_string(), "CC-9".to_string());
        user.manager = None;
        user.groups.remove(&GroupKey::new("bob team"));

        let report = DriftVerifier::new().verify(&expected(), Some(&user));
        let fields: Vec<_> = report.drifts.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["name", "profile.work_capacity", "custom.Cost Center", "manager", "group:bob team"]
        );
        assert!(report
            .summary()
            .contains("manager: expected 'bob@example.com', found 'none'"));
    }

    #[test]
    fn empty_expected_value_matches_absent_field() {
        let mut exp = expected();
        exp.custom_fields.insert("Country".to_string(), String::new());
        assert!(DriftVerifier::new().verify(&exp, Some(&observed())).converged());
    }

    #[test]
    fn no_expected_manager_accepts_any() {
        let mut exp = expected();
        exp.manager = None;
        let mut user = observed();
        user.manager = Some(key("carol@example.com"));
        assert!(DriftVerifier::new().verify(&exp, Some(&user)).converged());
    }

    #[test]
    fn custom_checks_run_after_built_in_ones() {
        let mut verifier = DriftVerifier::new();
        verifier.register_check(
            "title-set",
            Box::new(|_, observed| {
                (!observed.profile.contains_key("title")).then(|| drift("profile.title", "set", ""))
            }),
        );
        let mut user = observed();
        user.display_name = "Ann".to_string();

        let report = verifier.verify(&expected(), Some(&user));
        let fields: Vec<_> = report.drifts.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(fields, vec!["name", "profile.title"]);
    }
}
