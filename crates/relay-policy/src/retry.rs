//! Bounded retry with jittered backoff.
//!
//! The executor re-invokes an operation while attempts remain, the total
//! duration budget is not exhausted, and the failure is retryable per the
//! error taxonomy (or a caller-supplied predicate). Non-retryable errors
//! propagate unchanged. The executor adds no timeouts of its own; the
//! policy layer's operation timeout bounds it from outside.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, Instant};

use relay_core::{ChannelError, ErrorCode};

#[derive(Debug, Clone, Copy, PartialEq)]
/// How the delay before attempt `i + 1` grows with `i`.
pub enum BackoffStrategy {
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
    Linear {
        initial: Duration,
        step: Duration,
        max: Duration,
    },
    Fixed {
        delay: Duration,
    },
}

impl BackoffStrategy {
    /// Delay after the failure of attempt `attempt + 1` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let factor = multiplier.max(1.0).powi(attempt.min(64) as i32);
                if !factor.is_finite() {
                    return max;
                }
                let scaled = initial.as_secs_f64() * factor;
                if !scaled.is_finite() || scaled > max.as_secs_f64() {
                    max
                } else {
                    initial.mul_f64(factor)
                }
            }
            Self::Linear { initial, step, max } => {
                let grown = initial.saturating_add(step.saturating_mul(attempt));
                grown.min(max)
            }
            Self::Fixed { delay } => delay,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    /// When non-empty, an error must both be retryable and carry one of
    /// these codes. When empty, the error's own `retryable` flag decides.
    pub retryable_error_codes: BTreeSet<ErrorCode>,
    pub max_total_duration: Option<Duration>,
    /// Uniform jitter factor in `[0, 1]`: each delay is scaled by a
    /// random factor in `[1 - jitter, 1 + jitter]`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                initial: Duration::from_millis(100),
                max: Duration::from_secs(30),
                multiplier: 2.0,
            },
            retryable_error_codes: BTreeSet::new(),
            max_total_duration: None,
            jitter: 0.0,
        }
    }
}

pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(mut config: RetryConfig) -> Self {
        config.max_attempts = config.max_attempts.max(1);
        config.jitter = config.jitter.clamp(0.0, 1.0);
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `op` under the configured retry policy, using the taxonomy's
    /// retryability classification.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, ChannelError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChannelError>>,
    {
        self.execute_with_predicate(op, |error| self.is_retryable(error))
            .await
    }

    /// Same loop with a caller-supplied retryability predicate.
    pub async fn execute_with_predicate<T, F, Fut, P>(
        &self,
        mut op: F,
        predicate: P,
    ) -> Result<T, ChannelError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChannelError>>,
        P: Fn(&ChannelError) -> bool,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if attempt >= self.config.max_attempts || !predicate(&error) {
                return Err(error);
            }

            let delay = self.jittered(self.config.backoff.delay_for(attempt - 1));
            if let Some(budget) = self.config.max_total_duration {
                if started.elapsed().saturating_add(delay) > budget {
                    return Err(error);
                }
            }
            tracing::debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                code = error.code.as_str(),
                "retrying after backoff"
            );
            sleep(delay).await;
        }
    }

    fn is_retryable(&self, error: &ChannelError) -> bool {
        if !error.retryable {
            return false;
        }
        self.config.retryable_error_codes.is_empty()
            || self.config.retryable_error_codes.contains(&error.code)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let jitter = self.config.jitter;
        let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
        delay.mul_f64(factor.max(0.0))
    }
}
