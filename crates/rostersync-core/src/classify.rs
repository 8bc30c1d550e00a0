//! Turning raw HTTP status/body pairs into call outcomes.
//!
//! HTTP clients implementing `WorkspaceApi` feed every response through
//! `classify_response` so the "already done" conventions of the service are
//! interpreted in one place.

use rostersync_contracts::remote::{ApiError, ApiErrorKind, ApiResult, CallOutcome, RemoteCall};

/// Longest response-body excerpt carried into an error message.
const BODY_EXCERPT: usize = 200;

/// Phrases the service uses when a create or assign was already in effect.
const ALREADY_MARKERS: [&str; 3] = ["already", "exists", "duplicate"];

/// Classify one response to `call`.
///
/// - 2xx is applied.
/// - 400/404 on a removal, deletion or deactivation means the target is
///   already gone.
/// - 400/409 on a create or assign whose body says it already exists means
///   the state is already set.
/// - 429 is a rate limit (retryable), 5xx a server error (retryable).
///
/// Created entity ids are the client's to extract; this returns
/// `Applied { created: None }` for every 2xx.
pub fn classify_response(call: &RemoteCall, status: u16, body: &str) -> ApiResult<CallOutcome> {
    if (200..300).contains(&status) {
        return Ok(CallOutcome::applied());
    }

    if call.is_cleanup() && matches!(status, 400 | 404) {
        return Ok(CallOutcome::AlreadySatisfied);
    }

    if call.is_idempotent_assert() && matches!(status, 400 | 409) {
        let lowered = body.to_lowercase();
        if ALREADY_MARKERS.iter().any(|m| lowered.contains(m)) {
            return Ok(CallOutcome::AlreadySatisfied);
        }
    }

    let kind = match status {
        429 => ApiErrorKind::RateLimited {
            retry_after_ms: None,
        },
        401 | 403 => ApiErrorKind::Unauthorized,
        404 => ApiErrorKind::NotFound,
        409 => ApiErrorKind::Conflict,
        500..=599 => ApiErrorKind::Server,
        _ => ApiErrorKind::Other,
    };
    Err(ApiError::new(kind, format!("HTTP {status}: {}", excerpt(body))))
}

fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(BODY_EXCERPT) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rostersync_contracts::identity::RemoteId;

    fn add_member() -> RemoteCall {
        RemoteCall::AddGroupMember {
            group: RemoteId::new("g1"),
            user: RemoteId::new("u1"),
        }
    }

    fn remove_member() -> RemoteCall {
        RemoteCall::RemoveGroupMember {
            group: RemoteId::new("g1"),
            user: RemoteId::new("u1"),
        }
    }

    #[test]
    fn success_codes_are_applied() {
        assert_eq!(classify_response(&add_member(), 200, ""), Ok(CallOutcome::applied()));
        assert_eq!(classify_response(&add_member(), 204, ""), Ok(CallOutcome::applied()));
    }

    #[test]
    fn missing_target_on_removal_is_already_clean() {
        assert_eq!(
            classify_response(&remove_member(), 404, "not found"),
            Ok(CallOutcome::AlreadySatisfied)
        );
        assert_eq!(
            classify_response(&RemoteCall::DeleteGroup { group: RemoteId::new("g") }, 400, ""),
            Ok(CallOutcome::AlreadySatisfied)
        );
    }

    #[test]
    fn already_member_conflict_is_already_set() {
        assert_eq!(
            classify_response(&add_member(), 409, "User is Already a member"),
            Ok(CallOutcome::AlreadySatisfied)
        );
        assert_eq!(
            classify_response(
                &RemoteCall::CreateGroup { name: "Team".into() },
                400,
                "group name exists"
            ),
            Ok(CallOutcome::AlreadySatisfied)
        );
    }

    #[test]
    fn conflict_without_marker_is_an_error() {
        let err = classify_response(&add_member(), 409, "version mismatch").unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::Conflict);
    }

    #[test]
    fn not_found_on_assert_is_an_error() {
        let err = classify_response(&add_member(), 404, "no such group").unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::NotFound);
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        let call = RemoteCall::SetCustomField {
            user: RemoteId::new("u"),
            field: RemoteId::new("f"),
            value: "x".into(),
        };
        assert!(classify_response(&call, 429, "").unwrap_err().is_rate_limited());
        assert_eq!(
            classify_response(&call, 403, "").unwrap_err().kind,
            ApiErrorKind::Unauthorized
        );
        let server = classify_response(&call, 503, "").unwrap_err();
        assert_eq!(server.kind, ApiErrorKind::Server);
        assert!(server.is_retryable());
        assert_eq!(
            classify_response(&call, 418, "").unwrap_err().kind,
            ApiErrorKind::Other
        );
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1_000);
        let err = classify_response(&add_member(), 500, &body).unwrap_err();
        assert!(err.message.len() < 220);
    }
}
