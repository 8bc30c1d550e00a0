//! # rostersync-contracts
//!
//! Shared types, remote-boundary contracts and the error taxonomy for the
//! rostersync reconciliation engine.
//!
//! All crates in the workspace import from here. No reconciliation logic lives
//! in this crate, only data definitions, their invariants and error types.

pub mod error;
pub mod identity;
pub mod operation;
pub mod outcome;
pub mod remote;
pub mod roster;
pub mod scope;
pub mod snapshot;
pub mod verify;

#[cfg(test)]
mod tests {
    use super::*;
    use error::SyncError;
    use identity::{GroupKey, IdentityKey, RemoteId};
    use operation::{
        ExecutionPhase, ManagedEntity, Operation, OperationKind, Plan, SkipReason,
    };
    use outcome::{AuditStream, FailureKind, OutcomeRecord, OutcomeStatus};
    use remote::{ApiError, ApiErrorKind};
    use scope::{Scope, ScopeSet};
    use snapshot::{ObservedGroup, ObservedUser, Snapshot, UserStatus};

    fn user(key: &str, id: &str) -> ObservedUser {
        ObservedUser {
            remote_id: RemoteId::new(id),
            key: IdentityKey::new(key),
            display_name: key.to_string(),
            status: UserStatus::Active,
            profile: Default::default(),
            custom_fields: Default::default(),
            manager: None,
            groups: Default::default(),
        }
    }

    fn group(name: &str, id: &str, members: &[&str], managers: &[&str]) -> ObservedGroup {
        ObservedGroup {
            remote_id: RemoteId::new(id),
            key: GroupKey::new(name),
            name: name.to_string(),
            members: members.iter().map(IdentityKey::new).collect(),
            managers: managers.iter().map(IdentityKey::new).collect(),
        }
    }

    // ── Identity keys ────────────────────────────────────────────────────────

    #[test]
    fn identity_key_normalises_case_and_whitespace() {
        assert_eq!(IdentityKey::new("  Jane.Doe@Example.COM "), IdentityKey::new("jane.doe@example.com"));
        assert_eq!(GroupKey::new("Holiday-Calendar-FR"), GroupKey::new(" holiday-calendar-fr"));
    }

    // ── Snapshot ─────────────────────────────────────────────────────────────

    #[test]
    fn snapshot_derives_memberships_from_groups() {
        let snap = Snapshot::new(
            vec![user("a@x.io", "u1"), user("b@x.io", "u2")],
            vec![group("Team A", "g1", &["a@x.io"], &["b@x.io"])],
            vec![],
        )
        .unwrap();

        let a = snap.user(&IdentityKey::new("a@x.io")).unwrap();
        assert!(a.groups.contains(&GroupKey::new("team a")));
        let b = snap.user(&IdentityKey::new("b@x.io")).unwrap();
        assert!(b.groups.is_empty(), "managers are not members");
    }

    #[test]
    fn snapshot_rejects_duplicate_user_keys() {
        let result = Snapshot::new(
            vec![user("a@x.io", "u1"), user("A@X.io", "u2")],
            vec![],
            vec![],
        );
        match result {
            Err(SyncError::DuplicateIdentity { key, .. }) => assert_eq!(key, "a@x.io"),
            other => panic!("expected DuplicateIdentity, got {:?}", other),
        }
    }

    #[test]
    fn managed_entities_lists_groups_then_reports() {
        let mut report = user("r@x.io", "u2");
        report.manager = Some(IdentityKey::new("boss@x.io"));
        let snap = Snapshot::new(
            vec![user("boss@x.io", "u1"), report],
            vec![
                group("Zeta", "g2", &[], &["boss@x.io"]),
                group("Alpha", "g1", &[], &["boss@x.io"]),
            ],
            vec![],
        )
        .unwrap();

        let managed = snap.managed_entities(&IdentityKey::new("boss@x.io"));
        assert_eq!(
            managed,
            vec![
                ManagedEntity::Group(GroupKey::new("alpha")),
                ManagedEntity::Group(GroupKey::new("zeta")),
                ManagedEntity::Report(IdentityKey::new("r@x.io")),
            ]
        );
    }

    #[test]
    fn converged_changes_move_entities_off_the_old_manager() {
        let mut report = user("r@x.io", "u2");
        report.manager = Some(IdentityKey::new("boss@x.io"));
        let mut snap = Snapshot::new(
            vec![user("boss@x.io", "u1"), report, user("new@x.io", "u3")],
            vec![
                group("Keep", "g1", &["r@x.io"], &["boss@x.io"]),
                group("Stale", "g2", &["r@x.io"], &["boss@x.io"]),
            ],
            vec![],
        )
        .unwrap();

        snap.record_converged(&OperationKind::SetManager {
            user: IdentityKey::new("r@x.io"),
            manager: IdentityKey::new("new@x.io"),
            previous: Some(IdentityKey::new("boss@x.io")),
        });
        snap.record_converged(&OperationKind::DeleteGroup { group: GroupKey::new("stale") });

        assert_eq!(
            snap.managed_entities(&IdentityKey::new("boss@x.io")),
            vec![ManagedEntity::Group(GroupKey::new("keep"))]
        );
        let moved = snap.user(&IdentityKey::new("r@x.io")).unwrap();
        assert_eq!(moved.manager, Some(IdentityKey::new("new@x.io")));
        assert!(!moved.groups.contains(&GroupKey::new("stale")));

        snap.record_converged(&OperationKind::ReassignManager {
            from: IdentityKey::new("boss@x.io"),
            entity: ManagedEntity::Group(GroupKey::new("keep")),
            to: IdentityKey::new("new@x.io"),
        });
        snap.record_converged(&OperationKind::DeactivateUser { user: IdentityKey::new("boss@x.io") });
        assert!(snap.managed_entities(&IdentityKey::new("boss@x.io")).is_empty());
        assert!(!snap.user(&IdentityKey::new("boss@x.io")).unwrap().is_active());
    }

    // ── Operations and plans ─────────────────────────────────────────────────

    #[test]
    fn operation_phase_follows_kind() {
        let op = Operation::new(
            OperationKind::DeleteGroup { group: GroupKey::new("old") },
            0,
        );
        assert_eq!(op.phase, ExecutionPhase::Cleanup);
        assert!(op.kind.is_destructive());

        let op = Operation::new(
            OperationKind::CreateUser {
                user: IdentityKey::new("a@x.io"),
                display_name: "A".into(),
            },
            0,
        );
        assert_eq!(op.phase, ExecutionPhase::Provision);
        assert!(!op.kind.is_destructive());
    }

    #[test]
    fn plan_orders_by_phase_then_position_stably() {
        let assign = |u: &str, g: &str, pos| {
            Operation::new(
                OperationKind::AssignUserToGroup {
                    user: IdentityKey::new(u),
                    group: GroupKey::new(g),
                },
                pos,
            )
        };
        let create = Operation::new(
            OperationKind::CreateUser {
                user: IdentityKey::new("c@x.io"),
                display_name: "C".into(),
            },
            2,
        );
        let plan = Plan::from_operations(vec![
            assign("b@x.io", "one", 1),
            assign("a@x.io", "two", 0),
            create,
            assign("a@x.io", "one", 0),
        ]);

        let tags: Vec<String> = plan
            .operations()
            .iter()
            .map(|op| format!("{}:{}", op.phase, op.kind.group().map(|g| g.as_str()).unwrap_or("-")))
            .collect();
        assert_eq!(
            tags,
            vec!["provision:-", "group-sync:two", "group-sync:one", "group-sync:one"]
        );
    }

    #[test]
    fn into_phases_contains_every_phase_in_order() {
        let phases = Plan::default().into_phases();
        let keys: Vec<ExecutionPhase> = phases.keys().copied().collect();
        assert_eq!(keys, ExecutionPhase::ALL.to_vec());
    }

    #[test]
    fn pending_changes_ignores_skipped_and_verification() {
        let mut removal = Operation::new(
            OperationKind::RemoveUserFromGroup {
                user: IdentityKey::new("a@x.io"),
                group: GroupKey::new("g"),
            },
            0,
        );
        removal.skip_with(SkipReason::Protected);
        let plan = Plan::from_operations(vec![removal]);
        assert_eq!(plan.pending_changes().count(), 0);
    }

    // ── Outcomes ─────────────────────────────────────────────────────────────

    #[test]
    fn outcome_streams_split_converged_from_attention() {
        let op = Operation::new(OperationKind::DeactivateUser { user: IdentityKey::new("a@x.io") }, 0);

        assert_eq!(
            OutcomeRecord::for_operation(&op, OutcomeStatus::AlreadySatisfied).stream(),
            AuditStream::Converged
        );
        assert_eq!(
            OutcomeRecord::skipped(&op, SkipReason::Unconfirmed).stream(),
            AuditStream::Attention
        );
        assert_eq!(
            OutcomeRecord::failed(&op, FailureKind::NotFound, "gone").stream(),
            AuditStream::Attention
        );
    }

    #[test]
    fn outcome_status_serializes_with_reason() {
        let status = OutcomeStatus::Skipped { reason: SkipReason::Protected };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("protected"), "{json}");
    }

    // ── Scopes ───────────────────────────────────────────────────────────────

    #[test]
    fn scope_set_reports_missing_in_required_order() {
        let mut granted = ScopeSet::default();
        granted.grant(Scope::GroupsRead);
        granted.grant(Scope::GroupsRead);

        assert_eq!(granted.all().count(), 1);
        assert_eq!(
            granted.missing(&Scope::REQUIRED),
            vec![Scope::UsersRead, Scope::CustomFieldsRead, Scope::GroupsWrite]
        );
    }

    #[test]
    fn scopes_order_as_required() {
        let forbidden: std::collections::BTreeSet<Scope> =
            [Scope::GroupsWrite, Scope::UsersRead].into_iter().collect();
        assert!(forbidden.contains(&Scope::GroupsWrite));
        assert_eq!(
            forbidden.into_iter().collect::<Vec<_>>(),
            vec![Scope::UsersRead, Scope::GroupsWrite]
        );
    }

    // ── Errors ───────────────────────────────────────────────────────────────

    #[test]
    fn api_error_retryability() {
        assert!(ApiError::rate_limited().is_retryable());
        assert!(ApiError::new(ApiErrorKind::Server, "503").is_retryable());
        assert!(!ApiError::new(ApiErrorKind::NotFound, "no such user").is_retryable());
    }

    #[test]
    fn error_insufficient_scope_display_lists_scopes() {
        let err = SyncError::InsufficientScope {
            missing: vec!["users:read".to_string(), "groups:write".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("users:read"));
        assert!(msg.contains("groups:write"));
    }

    #[test]
    fn error_config_display() {
        let err = SyncError::ConfigError { reason: "burst must be at least 1".to_string() };
        assert!(err.to_string().contains("configuration error"));
    }
}
