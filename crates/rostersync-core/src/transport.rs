//! Rate-limited transport: the only path from the engine to the remote API.
//!
//! Every outbound call first takes a token from the process-wide
//! `RateLimiter`, waiting (by sleeping until the next refill, never spinning)
//! when the bucket is empty. Retryable failures are retried with capped
//! exponential backoff; a rate-limit rejection additionally pauses the shared
//! limiter so every other worker backs off with it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use rostersync_contracts::{
    identity::RemoteId,
    remote::{ApiError, ApiErrorKind, ApiResult, CallOutcome, RemoteCall},
};

use crate::traits::WorkspaceApi;

// ── Backoff policy ───────────────────────────────────────────────────────────

/// Retry budget and backoff curve for one operation's calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Ceiling for any single delay.
    pub max: Duration,
    /// Retries after the first attempt (0 = never retry).
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(16),
            max_retries: 3,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, max_retries: u32) -> Self {
        Self { base, max, max_retries }
    }

    /// Delay before retry number `retry` (0-based).
    ///
    /// A `retry_after` hint from the service wins over the curve; both are
    /// capped at `max`.
    pub fn delay_for(&self, retry: u32, error: &ApiError) -> Duration {
        if let ApiErrorKind::RateLimited {
            retry_after_ms: Some(ms),
        } = error.kind
        {
            return Duration::from_millis(ms).min(self.max);
        }
        self.base
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max)
    }
}

// ── Rate limiter ─────────────────────────────────────────────────────────────

/// Observable state of the shared limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterState {
    /// Tokens handed out since the limiter was created.
    pub consumed: u64,
    /// Tokens currently in the bucket.
    pub available: u32,
    /// Most recent backoff interval imposed by a rate-limit rejection; zero
    /// once a call succeeds again.
    pub backoff: Duration,
}

struct Bucket {
    tokens: u32,
    last_refill: Instant,
    consumed: u64,
    backoff: Duration,
    paused_until: Option<Instant>,
}

/// Token bucket shared by every worker of a run.
///
/// All state sits behind one mutex: acquiring a token, refilling and pausing
/// are serialised, so no worker can bypass the budget.
pub struct RateLimiter {
    capacity: u32,
    refill_every: Duration,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// A full bucket of `capacity` tokens, one token added every `refill_every`.
    pub fn new(capacity: u32, refill_every: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            refill_every: refill_every.max(Duration::from_micros(1)),
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
                consumed: 0,
                backoff: Duration::ZERO,
                paused_until: None,
            }),
        }
    }

    /// `requests_per_second` sustained, bursts of up to `burst`.
    pub fn per_second(requests_per_second: u32, burst: u32) -> Self {
        Self::new(burst, Duration::from_secs(1) / requests_per_second.max(1))
    }

    /// Take one token, sleeping until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                match bucket.paused_until {
                    Some(until) if until > now => until - now,
                    _ => {
                        bucket.paused_until = None;
                        self.refill(&mut bucket, now);
                        if bucket.tokens > 0 {
                            bucket.tokens -= 1;
                            bucket.consumed += 1;
                            return;
                        }
                        (bucket.last_refill + self.refill_every).saturating_duration_since(now)
                    }
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Hold back every caller of `acquire` for at least `delay`.
    pub async fn pause_for(&self, delay: Duration) {
        let mut bucket = self.bucket.lock().await;
        let until = Instant::now() + delay;
        bucket.paused_until = Some(match bucket.paused_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
        bucket.backoff = delay;
    }

    pub async fn clear_backoff(&self) {
        self.bucket.lock().await.backoff = Duration::ZERO;
    }

    pub async fn state(&self) -> RateLimiterState {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket, Instant::now());
        RateLimiterState {
            consumed: bucket.consumed,
            available: bucket.tokens,
            backoff: bucket.backoff,
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let intervals = elapsed.as_nanos() / self.refill_every.as_nanos();
        if intervals == 0 {
            return;
        }
        let missing = u128::from(self.capacity - bucket.tokens);
        if intervals >= missing {
            bucket.tokens = self.capacity;
            bucket.last_refill = now;
        } else {
            // intervals < capacity here, so the cast is lossless.
            bucket.tokens += intervals as u32;
            bucket.last_refill += self.refill_every * intervals as u32;
        }
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

/// The result of a call after rate limiting and retries.
#[derive(Debug, Clone)]
pub struct Attempted<T> {
    pub result: ApiResult<T>,
    /// Calls actually sent; 0 for dry-run short-circuits.
    pub attempts: u32,
    /// Backoff delays slept before each retry, in order.
    pub delays: Vec<Duration>,
    /// True when the final error was retryable but the retry budget ran out.
    pub exhausted: bool,
}

impl<T> Attempted<T> {
    pub fn delays_ms(&self) -> Vec<u64> {
        self.delays.iter().map(|d| d.as_millis() as u64).collect()
    }
}

/// Wraps a `WorkspaceApi` with the shared limiter and the backoff policy.
pub struct RateLimitedTransport {
    api: Arc<dyn WorkspaceApi>,
    limiter: Arc<RateLimiter>,
    policy: BackoffPolicy,
    dry_run: bool,
}

impl RateLimitedTransport {
    pub fn new(api: Arc<dyn WorkspaceApi>, limiter: Arc<RateLimiter>, policy: BackoffPolicy) -> Self {
        Self {
            api,
            limiter,
            policy,
            dry_run: false,
        }
    }

    /// In dry-run mode `call` never contacts the service; reads still do.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn api(&self) -> &dyn WorkspaceApi {
        self.api.as_ref()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run `call` under the rate limiter, retrying retryable errors.
    ///
    /// `call` is invoked once per attempt. Non-retryable errors return
    /// immediately; retryable ones are retried up to `max_retries` times.
    pub async fn send<T, F, Fut>(&self, label: &str, mut call: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut attempts: u32 = 0;
        let mut delays = Vec::new();

        loop {
            self.limiter.acquire().await;
            attempts += 1;

            match call().await {
                Ok(value) => {
                    if !delays.is_empty() {
                        self.limiter.clear_backoff().await;
                        debug!(call = label, attempts, "call succeeded after retries");
                    }
                    return Attempted {
                        result: Ok(value),
                        attempts,
                        delays,
                        exhausted: false,
                    };
                }
                Err(error) if error.is_retryable() => {
                    let retry = attempts - 1;
                    if retry >= self.policy.max_retries {
                        warn!(
                            call = label,
                            attempts,
                            error = %error,
                            "retry budget exhausted"
                        );
                        return Attempted {
                            result: Err(error),
                            attempts,
                            delays,
                            exhausted: true,
                        };
                    }

                    let delay = self.policy.delay_for(retry, &error);
                    if error.is_rate_limited() {
                        self.limiter.pause_for(delay).await;
                    }
                    debug!(
                        call = label,
                        attempt = attempts,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                    delays.push(delay);
                }
                Err(error) => {
                    return Attempted {
                        result: Err(error),
                        attempts,
                        delays,
                        exhausted: false,
                    };
                }
            }
        }
    }

    /// Send one mutating call (or pretend to, in dry-run mode).
    pub async fn call(&self, call: &RemoteCall) -> Attempted<CallOutcome> {
        if self.dry_run {
            debug!(call = call_label(call), "dry run: call not sent");
            return Attempted {
                result: Ok(dry_run_outcome(call)),
                attempts: 0,
                delays: Vec::new(),
                exhausted: false,
            };
        }
        let api = self.api.as_ref();
        self.send(call_label(call), || api.apply(call)).await
    }
}

/// Stable, low-cardinality name for a call, used in log fields.
pub fn call_label(call: &RemoteCall) -> &'static str {
    match call {
        RemoteCall::CreateUser { .. } => "create_user",
        RemoteCall::UpdateProfile { .. } => "update_profile",
        RemoteCall::CreateCustomField { .. } => "create_custom_field",
        RemoteCall::SetCustomField { .. } => "set_custom_field",
        RemoteCall::SetManager { .. } => "set_manager",
        RemoteCall::CreateGroup { .. } => "create_group",
        RemoteCall::AddGroupMember { .. } => "add_group_member",
        RemoteCall::RemoveGroupMember { .. } => "remove_group_member",
        RemoteCall::AssignGroupManager { .. } => "assign_group_manager",
        RemoteCall::RemoveManagerRole { .. } => "remove_manager_role",
        RemoteCall::DeleteGroup { .. } => "delete_group",
        RemoteCall::DeactivateUser { .. } => "deactivate_user",
    }
}

// Creation calls get a placeholder id so later phases can still resolve the
// entity and the dry run walks the whole plan.
fn dry_run_outcome(call: &RemoteCall) -> CallOutcome {
    match call {
        RemoteCall::CreateUser { email, .. } => {
            CallOutcome::created(RemoteId::new(format!("dry-run:user:{email}")))
        }
        RemoteCall::CreateGroup { name } => {
            CallOutcome::created(RemoteId::new(format!("dry-run:group:{name}")))
        }
        RemoteCall::CreateCustomField { name } => {
            CallOutcome::created(RemoteId::new(format!("dry-run:field:{name}")))
        }
        _ => CallOutcome::applied(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::testing::ScriptedApi;

    fn fast_policy(max_retries: u32) -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(4), max_retries)
    }

    fn transport(api: Arc<ScriptedApi>, max_retries: u32) -> RateLimitedTransport {
        RateLimitedTransport::new(
            api,
            Arc::new(RateLimiter::new(100, Duration::from_millis(1))),
            fast_policy(max_retries),
        )
    }

    #[test]
    fn delay_doubles_up_to_ceiling() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(10), 8);
        let err = ApiError::rate_limited();
        assert_eq!(policy.delay_for(0, &err), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3, &err), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4, &err), Duration::from_secs(10));
        assert_eq!(policy.delay_for(30, &err), Duration::from_secs(10));
    }

    #[test]
    fn retry_after_hint_is_capped() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(10), 3);
        let err = ApiError::new(
            ApiErrorKind::RateLimited {
                retry_after_ms: Some(120_000),
            },
            "slow down",
        );
        assert_eq!(policy.delay_for(0, &err), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn limiter_hands_out_burst_then_waits_for_refill() {
        let limiter = RateLimiter::new(3, Duration::from_millis(20));
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.state().await.available, 0);

        let started = Instant::now();
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(10));
        assert_eq!(limiter.state().await.consumed, 4);
    }

    #[tokio::test]
    async fn limiter_pause_blocks_acquire() {
        let limiter = RateLimiter::new(5, Duration::from_millis(1));
        limiter.pause_for(Duration::from_millis(30)).await;
        assert_eq!(limiter.state().await.backoff, Duration::from_millis(30));

        let started = Instant::now();
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn three_rate_limits_then_success_records_three_delays() {
        let api = Arc::new(ScriptedApi::default());
        api.reject_next(3, ApiError::rate_limited());
        let transport = transport(api.clone(), 3);

        let call = RemoteCall::DeactivateUser { user: RemoteId::new("u1") };
        let attempted = transport.call(&call).await;

        assert_eq!(attempted.result, Ok(CallOutcome::applied()));
        assert_eq!(attempted.attempts, 4);
        assert_eq!(attempted.delays.len(), 3);
        assert!(!attempted.exhausted);
        assert_eq!(attempted.delays[0], Duration::from_millis(1));
        assert_eq!(attempted.delays[1], Duration::from_millis(2));
        assert_eq!(attempted.delays[2], Duration::from_millis(4));
        assert_eq!(transport.limiter().state().await.backoff, Duration::ZERO);
    }

    #[tokio::test]
    async fn persistent_rate_limit_exhausts_budget() {
        let api = Arc::new(ScriptedApi::default());
        api.reject_next(10, ApiError::rate_limited());
        let transport = transport(api.clone(), 2);

        let attempted = transport
            .call(&RemoteCall::DeleteGroup { group: RemoteId::new("g1") })
            .await;

        assert!(attempted.exhausted);
        assert_eq!(attempted.attempts, 3);
        assert_eq!(attempted.delays.len(), 2);
        assert!(attempted.result.unwrap_err().is_rate_limited());
    }

    #[tokio::test]
    async fn non_retryable_error_returns_after_one_attempt() {
        let counter = AtomicU32::new(0);
        let transport = transport(Arc::new(ScriptedApi::default()), 3);

        let attempted: Attempted<()> = transport
            .send("lookup", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiError::new(ApiErrorKind::NotFound, "no such user")) }
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(attempted.attempts, 1);
        assert!(!attempted.exhausted);
    }

    #[tokio::test]
    async fn dry_run_never_reaches_the_api() {
        let api = Arc::new(ScriptedApi::default());
        let transport = transport(api.clone(), 3).with_dry_run(true);

        let attempted = transport
            .call(&RemoteCall::CreateGroup { name: "Team".into() })
            .await;

        assert_eq!(attempted.attempts, 0);
        assert!(matches!(
            attempted.result,
            Ok(CallOutcome::Applied { created: Some(_) })
        ));
        assert!(api.calls().is_empty());
    }
}
