//! Three-state circuit breaker.
//!
//! closed → open once `failure_threshold` triggering failures land within
//! a rolling `failure_window`; open → half_open lazily when an admission
//! check observes `recovery_timeout` elapsed; half_open → closed after
//! `success_threshold` consecutive successes, or back to open on any
//! failure. Only error codes in `trigger_errors` count as failures.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use relay_core::{ChannelError, ErrorCode};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub failure_window: Duration,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
    pub trigger_errors: BTreeSet<ErrorCode>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
            trigger_errors: BTreeSet::from([
                ErrorCode::NetworkError,
                ErrorCode::Timeout,
                ErrorCode::ServerError,
            ]),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(mut config: CircuitBreakerConfig) -> Self {
        config.failure_threshold = config.failure_threshold.max(1);
        config.success_threshold = config.success_threshold.max(1);
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Non-mutating fail-fast probe: false only while open with the
    /// recovery timeout still running.
    pub fn is_call_allowed(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => inner
                .opened_at
                .map(|at| at.elapsed() >= self.config.recovery_timeout)
                .unwrap_or(true),
        }
    }

    /// Admission check. Detects an elapsed recovery timeout and moves the
    /// breaker to half_open before admitting the probe.
    pub fn check_admission(&self) -> Result<(), ChannelError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let recovered = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    tracing::info!("circuit breaker half-open, admitting probe");
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    Ok(())
                } else {
                    Err(ChannelError::circuit_open())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.last_failure = None;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!("circuit breaker closed after successful probes");
                    Self::transition_closed(&mut inner);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, code: ErrorCode) {
        if !self.config.trigger_errors.contains(&code) {
            return;
        }
        let mut inner = self.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => {
                let window_expired = inner
                    .last_failure
                    .map(|at| now.saturating_duration_since(at) > self.config.failure_window)
                    .unwrap_or(false);
                if window_expired {
                    inner.failure_count = 0;
                }
                inner.failure_count += 1;
                inner.last_failure = Some(now);
                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = inner.failure_count,
                        code = code.as_str(),
                        "circuit breaker opened"
                    );
                    Self::transition_open(&mut inner, now);
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(code = code.as_str(), "probe failed, circuit breaker reopened");
                Self::transition_open(&mut inner, now);
            }
            CircuitState::Open => {
                inner.last_failure = Some(now);
            }
        }
    }

    /// Operational override: trip the breaker now.
    pub fn force_open(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        Self::transition_open(&mut inner, now);
    }

    /// Operational override: close regardless of history.
    pub fn force_close(&self) {
        let mut inner = self.lock();
        Self::transition_closed(&mut inner);
    }

    pub fn reset(&self) {
        self.force_close();
    }

    /// Admission check, run the operation, record its outcome.
    pub async fn guard<T, Fut>(&self, operation: Fut) -> Result<T, ChannelError>
    where
        Fut: std::future::Future<Output = Result<T, ChannelError>>,
    {
        self.check_admission()?;
        match operation.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure(error.code);
                Err(error)
            }
        }
    }

    fn transition_open(inner: &mut BreakerInner, now: Instant) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.success_count = 0;
    }

    fn transition_closed(inner: &mut BreakerInner) {
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure = None;
        inner.opened_at = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
