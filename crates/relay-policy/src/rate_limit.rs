//! Multi-scope token-bucket rate limiter.
//!
//! Refill is demand-driven: each admission check advances the bucket by
//! whole refill periods, so there is no background timer. Scopes compose
//! global → conversation → user and a denial short-circuits at the first
//! scope that cannot admit; tokens are only consumed once every
//! configured scope has admitted, so a later denial does not leak tokens
//! from an earlier scope.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use relay_core::ChannelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// One bucket's shape: `capacity` tokens per `refill_window`, with an
/// additive `burst` allowance the bucket may briefly hold on top.
pub struct RateLimitConfig {
    pub capacity: u32,
    pub burst: u32,
    pub refill_window: Duration,
}

impl RateLimitConfig {
    pub fn new(capacity: u32, burst: u32, refill_window: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            burst,
            refill_window: refill_window.max(Duration::from_millis(1)),
        }
    }

    /// Hint for a denied caller: `⌈refill_window / capacity⌉`.
    fn retry_after(&self) -> Duration {
        let window_ms = self.refill_window.as_millis().max(1) as u64;
        let capacity = u64::from(self.capacity.max(1));
        Duration::from_millis(window_ms.div_ceil(capacity))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What the limiter does when a scope denies admission.
pub enum RateLimitAction {
    /// Sleep `retry_after` and retry within the same call.
    Delay,
    /// Fail immediately with a `rate_limited` error.
    Reject,
    /// Fail with a `rate_limited` error flagged as a queueing signal; the
    /// caller owns durable queuing.
    Queue,
}

impl RateLimitAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delay => "delay",
            Self::Reject => "reject",
            Self::Queue => "queue",
        }
    }
}

#[derive(Debug, Clone)]
/// Full limiter configuration: a mandatory global scope plus optional
/// conversation and user scopes.
pub struct RateLimiterConfig {
    pub global: RateLimitConfig,
    pub per_conversation: Option<RateLimitConfig>,
    pub per_user: Option<RateLimitConfig>,
    pub action: RateLimitAction,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            global: RateLimitConfig::new(100, 20, Duration::from_secs(60)),
            per_conversation: None,
            per_user: None,
            action: RateLimitAction::Delay,
        }
    }
}

#[derive(Debug, Clone, Default)]
/// Scope labels for one admission request. Absent labels skip the
/// corresponding scoped bucket even when it is configured.
pub struct RateScope {
    pub conversation: Option<String>,
    pub user: Option<String>,
}

impl RateScope {
    pub fn global() -> Self {
        Self::default()
    }

    pub fn of(conversation: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            conversation: Some(conversation.into()),
            user: Some(user.into()),
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    config: RateLimitConfig,
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(config: RateLimitConfig, now: Instant) -> Self {
        Self {
            config,
            tokens: config.capacity.saturating_add(config.burst),
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let window = self.config.refill_window;
        let periods = (elapsed.as_nanos() / window.as_nanos().max(1)) as u64;
        if periods == 0 {
            return;
        }
        let ceiling = u64::from(self.config.capacity) + u64::from(self.config.burst);
        let refilled = u64::from(self.tokens)
            .saturating_add(periods.saturating_mul(u64::from(self.config.capacity)));
        self.tokens = refilled.min(ceiling) as u32;
        // Advance by whole periods so partial progress toward the next
        // refill is not discarded.
        self.last_refill += window.saturating_mul(periods.min(u64::from(u32::MAX)) as u32);
    }

    fn has_token(&self) -> bool {
        self.tokens > 0
    }

    fn consume(&mut self) {
        debug_assert!(self.tokens > 0);
        self.tokens = self.tokens.saturating_sub(1);
    }
}

#[derive(Debug, Default)]
struct LimiterBuckets {
    global: Option<TokenBucket>,
    conversations: HashMap<String, TokenBucket>,
    users: HashMap<String, TokenBucket>,
}

/// Shared admission controller. All bucket operations happen under one
/// short-lived lock, so checks and consumption are atomic against
/// concurrent callers. Fairness under contention is not promised.
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: Mutex<LimiterBuckets>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(LimiterBuckets::default()),
        }
    }

    pub fn action(&self) -> RateLimitAction {
        self.config.action
    }

    /// Single non-waiting admission attempt. On denial the error carries
    /// the denying scope and its `retry_after` hint.
    pub fn try_acquire(&self, scope: &RateScope) -> Result<(), ChannelError> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let global = buckets
            .global
            .get_or_insert_with(|| TokenBucket::new(self.config.global, now));
        global.refill(now);
        if !global.has_token() {
            return Err(ChannelError::rate_limited(
                "global",
                self.config.global.retry_after(),
            ));
        }

        let mut consume_conversation = None;
        if let (Some(config), Some(key)) = (self.config.per_conversation, &scope.conversation) {
            let bucket = buckets
                .conversations
                .entry(key.clone())
                .or_insert_with(|| TokenBucket::new(config, now));
            bucket.refill(now);
            if !bucket.has_token() {
                return Err(ChannelError::rate_limited(
                    "conversation",
                    config.retry_after(),
                ));
            }
            consume_conversation = Some(key.clone());
        }

        let mut consume_user = None;
        if let (Some(config), Some(key)) = (self.config.per_user, &scope.user) {
            let bucket = buckets
                .users
                .entry(key.clone())
                .or_insert_with(|| TokenBucket::new(config, now));
            bucket.refill(now);
            if !bucket.has_token() {
                return Err(ChannelError::rate_limited("user", config.retry_after()));
            }
            consume_user = Some(key.clone());
        }

        // Every configured scope admitted: consume one token from each.
        if let Some(bucket) = buckets.global.as_mut() {
            bucket.consume();
        }
        if let Some(key) = consume_conversation {
            if let Some(bucket) = buckets.conversations.get_mut(&key) {
                bucket.consume();
            }
        }
        if let Some(key) = consume_user {
            if let Some(bucket) = buckets.users.get_mut(&key) {
                bucket.consume();
            }
        }
        Ok(())
    }

    /// Action-aware admission. `Delay` waits out `retry_after` hints and
    /// retries in-call until admitted; the surrounding operation timeout
    /// bounds the wait.
    pub async fn acquire(&self, scope: &RateScope) -> Result<(), ChannelError> {
        match self.config.action {
            RateLimitAction::Reject => self.try_acquire(scope),
            RateLimitAction::Queue => self.try_acquire(scope).map_err(|error| {
                error.with_platform_data(
                    "rate_limit_action",
                    serde_json::Value::String("queue".to_string()),
                )
            }),
            RateLimitAction::Delay => loop {
                match self.try_acquire(scope) {
                    Ok(()) => return Ok(()),
                    Err(error) => {
                        let wait = error
                            .retry_after()
                            .unwrap_or_else(|| self.config.global.retry_after());
                        tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limit delay");
                        tokio::time::sleep(wait).await;
                    }
                }
            },
        }
    }

    /// Drops every bucket; the next admission starts from full buckets.
    pub fn reset(&self) {
        let mut buckets = self.buckets.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *buckets = LimiterBuckets::default();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relay_core::ErrorCode;
    use tokio::time::Instant;

    use super::{RateLimitAction, RateLimitConfig, RateLimiter, RateLimiterConfig, RateScope};

    fn limiter(
        global: RateLimitConfig,
        per_conversation: Option<RateLimitConfig>,
        action: RateLimitAction,
    ) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            global,
            per_conversation,
            per_user: None,
            action,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn unit_bucket_admits_at_most_capacity_plus_burst_per_window() {
        let limiter = limiter(
            RateLimitConfig::new(3, 2, Duration::from_secs(1)),
            None,
            RateLimitAction::Reject,
        );
        let scope = RateScope::global();
        for _ in 0..5 {
            limiter.try_acquire(&scope).expect("within burst budget");
        }
        let denied = limiter.try_acquire(&scope).expect_err("budget exhausted");
        assert_eq!(denied.code, ErrorCode::RateLimited);
        assert!(denied.retry_after().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn functional_demand_driven_refill_restores_capacity_per_window() {
        let limiter = limiter(
            RateLimitConfig::new(2, 0, Duration::from_secs(1)),
            None,
            RateLimitAction::Reject,
        );
        let scope = RateScope::global();
        limiter.try_acquire(&scope).expect("first");
        limiter.try_acquire(&scope).expect("second");
        assert!(limiter.try_acquire(&scope).is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        limiter.try_acquire(&scope).expect("refilled first");
        limiter.try_acquire(&scope).expect("refilled second");
        assert!(limiter.try_acquire(&scope).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn functional_delay_action_resolves_admissions_one_window_apart() {
        let limiter = limiter(
            RateLimitConfig::new(1, 0, Duration::from_secs(1)),
            None,
            RateLimitAction::Delay,
        );
        let scope = RateScope::global();
        let started = Instant::now();

        limiter.acquire(&scope).await.expect("first");
        let first = started.elapsed();
        limiter.acquire(&scope).await.expect("second");
        let second = started.elapsed();
        limiter.acquire(&scope).await.expect("third");
        let third = started.elapsed();

        assert!(first < Duration::from_millis(50), "first was {first:?}");
        assert!(
            second >= Duration::from_millis(950) && second < Duration::from_millis(1_500),
            "second was {second:?}"
        );
        assert!(
            third >= Duration::from_millis(1_950) && third < Duration::from_millis(2_500),
            "third was {third:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn functional_conversation_scope_denies_before_user_scope_consumes() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            global: RateLimitConfig::new(100, 0, Duration::from_secs(60)),
            per_conversation: Some(RateLimitConfig::new(1, 0, Duration::from_secs(60))),
            per_user: Some(RateLimitConfig::new(100, 0, Duration::from_secs(60))),
            action: RateLimitAction::Reject,
        });
        let scope = RateScope::of("slack:T1:C1", "slack:U1");
        limiter.try_acquire(&scope).expect("first admission");
        let denied = limiter.try_acquire(&scope).expect_err("conversation cap");
        assert!(denied.message.contains("conversation"));

        // A different conversation still admits: the denial did not
        // consume the global token.
        let other = RateScope::of("slack:T1:C2", "slack:U1");
        limiter.try_acquire(&other).expect("other conversation");
    }

    #[tokio::test(start_paused = true)]
    async fn unit_queue_action_marks_denial_as_queue_signal() {
        let limiter = limiter(
            RateLimitConfig::new(1, 0, Duration::from_secs(1)),
            None,
            RateLimitAction::Queue,
        );
        let scope = RateScope::global();
        limiter.acquire(&scope).await.expect("first");
        let denied = limiter.acquire(&scope).await.expect_err("second");
        assert_eq!(
            denied.platform_data.get("rate_limit_action"),
            Some(&serde_json::Value::String("queue".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn regression_reset_restores_full_buckets() {
        let limiter = limiter(
            RateLimitConfig::new(1, 0, Duration::from_secs(3600)),
            None,
            RateLimitAction::Reject,
        );
        let scope = RateScope::global();
        limiter.try_acquire(&scope).expect("first");
        assert!(limiter.try_acquire(&scope).is_err());
        limiter.reset();
        limiter.try_acquire(&scope).expect("post-reset");
    }
}
