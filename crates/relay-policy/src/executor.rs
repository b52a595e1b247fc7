//! The policy executor: one canonical composition of the four policies,
//! so the runtime's hot path stays trivial.
//!
//! Order: the operation timeout bounds everything, retry wraps each
//! attempt, each attempt acquires rate-limit admission, and the circuit
//! breaker guards the innermost operation. The breaker is consulted
//! before the limiter so an open circuit never consumes a token.

use std::future::Future;
use std::time::Duration;

use relay_core::ChannelError;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::rate_limit::{RateLimiter, RateLimiterConfig, RateScope};
use crate::retry::{RetryConfig, RetryExecutor};
use crate::timeout::{TimeoutClass, TimeoutConfig, TimeoutExecutor};

#[derive(Debug, Clone, Default)]
/// Nested policy configuration for one channel. `rate_limit: None`
/// disables admission control; the other three always apply.
pub struct ChannelPolicy {
    pub rate_limit: Option<RateLimiterConfig>,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub timeout: TimeoutConfig,
}

pub struct PolicyExecutor {
    limiter: Option<RateLimiter>,
    retry: RetryExecutor,
    breaker: CircuitBreaker,
    timeout: TimeoutExecutor,
}

impl PolicyExecutor {
    pub fn new(policy: ChannelPolicy) -> Self {
        Self {
            limiter: policy.rate_limit.map(RateLimiter::new),
            retry: RetryExecutor::new(policy.retry),
            breaker: CircuitBreaker::new(policy.circuit_breaker),
            timeout: TimeoutExecutor::new(policy.timeout),
        }
    }

    /// Full composition with the configured operation timeout.
    pub async fn execute<T, F, Fut>(&self, scope: &RateScope, op: F) -> Result<T, ChannelError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ChannelError>>,
    {
        let duration = self.timeout.duration_for(TimeoutClass::Operation);
        self.execute_inner(duration, true, scope, op).await
    }

    /// Full composition with a caller-supplied operation timeout.
    pub async fn execute_with_timeout<T, F, Fut>(
        &self,
        duration: Duration,
        scope: &RateScope,
        op: F,
    ) -> Result<T, ChannelError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ChannelError>>,
    {
        self.execute_inner(duration, true, scope, op).await
    }

    /// Composition minus admission control, for paths that must not be
    /// throttled (operator commands, health probes).
    pub async fn execute_without_rate_limit<T, F, Fut>(&self, op: F) -> Result<T, ChannelError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ChannelError>>,
    {
        let duration = self.timeout.duration_for(TimeoutClass::Operation);
        self.execute_inner(duration, false, &RateScope::global(), op)
            .await
    }

    async fn execute_inner<T, F, Fut>(
        &self,
        duration: Duration,
        use_limiter: bool,
        scope: &RateScope,
        op: F,
    ) -> Result<T, ChannelError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ChannelError>>,
    {
        let breaker = &self.breaker;
        let limiter = if use_limiter {
            self.limiter.as_ref()
        } else {
            None
        };
        let op = &op;
        let attempt = move || async move {
            // Short-circuit before a token is consumed.
            breaker.check_admission()?;
            if let Some(limiter) = limiter {
                limiter.acquire(scope).await?;
            }
            breaker.guard(op()).await
        };
        self.timeout
            .run_with(TimeoutClass::Operation, duration, self.retry.execute(attempt))
            .await
    }

    /// Fail-fast probe for callers that want to skip the timeout budget
    /// entirely when the breaker is open.
    pub fn is_circuit_allowed(&self) -> bool {
        self.breaker.is_call_allowed()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Operational reset: full buckets, closed breaker. In-flight
    /// operations are not cancelled.
    pub fn reset(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.reset();
        }
        self.breaker.reset();
    }
}
