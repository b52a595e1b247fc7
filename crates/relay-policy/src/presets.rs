//! Per-platform policy presets.
//!
//! Data constructors mirroring the capability presets: each returns a
//! value tuned to the platform's published limits. Deployments start from
//! a preset and override fields as needed.

use std::collections::BTreeSet;
use std::time::Duration;

use relay_core::ErrorCode;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::executor::ChannelPolicy;
use crate::rate_limit::{RateLimitAction, RateLimitConfig, RateLimiterConfig};
use crate::retry::{BackoffStrategy, RetryConfig};
use crate::timeout::TimeoutConfig;

fn default_trigger_errors() -> BTreeSet<ErrorCode> {
    BTreeSet::from([
        ErrorCode::NetworkError,
        ErrorCode::Timeout,
        ErrorCode::ServerError,
    ])
}

impl ChannelPolicy {
    /// Slack tier-3 web API: ~1 message per second per channel.
    pub fn slack() -> Self {
        Self {
            rate_limit: Some(RateLimiterConfig {
                global: RateLimitConfig::new(100, 20, Duration::from_secs(60)),
                per_conversation: Some(RateLimitConfig::new(60, 5, Duration::from_secs(60))),
                per_user: None,
                action: RateLimitAction::Delay,
            }),
            retry: RetryConfig {
                max_attempts: 3,
                backoff: BackoffStrategy::Exponential {
                    initial: Duration::from_secs(1),
                    max: Duration::from_secs(30),
                    multiplier: 2.0,
                },
                retryable_error_codes: BTreeSet::new(),
                max_total_duration: Some(Duration::from_secs(60)),
                jitter: 0.2,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                failure_window: Duration::from_secs(60),
                recovery_timeout: Duration::from_secs(30),
                success_threshold: 2,
                trigger_errors: default_trigger_errors(),
            },
            timeout: TimeoutConfig::default(),
        }
    }

    /// Discord REST: 50 requests per second globally, strict per-route
    /// buckets; the gateway keeps a conservative per-channel budget.
    pub fn discord() -> Self {
        Self {
            rate_limit: Some(RateLimiterConfig {
                global: RateLimitConfig::new(50, 10, Duration::from_secs(1)),
                per_conversation: Some(RateLimitConfig::new(5, 0, Duration::from_secs(5))),
                per_user: None,
                action: RateLimitAction::Delay,
            }),
            retry: RetryConfig {
                max_attempts: 3,
                backoff: BackoffStrategy::Exponential {
                    initial: Duration::from_millis(500),
                    max: Duration::from_secs(15),
                    multiplier: 2.0,
                },
                retryable_error_codes: BTreeSet::new(),
                max_total_duration: Some(Duration::from_secs(45)),
                jitter: 0.2,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                failure_window: Duration::from_secs(30),
                recovery_timeout: Duration::from_secs(15),
                success_threshold: 2,
                trigger_errors: default_trigger_errors(),
            },
            timeout: TimeoutConfig::default(),
        }
    }

    /// Telegram bot API: 30 messages per second overall, ~20 per minute
    /// into a single group.
    pub fn telegram() -> Self {
        Self {
            rate_limit: Some(RateLimiterConfig {
                global: RateLimitConfig::new(30, 0, Duration::from_secs(1)),
                per_conversation: Some(RateLimitConfig::new(20, 0, Duration::from_secs(60))),
                per_user: None,
                action: RateLimitAction::Delay,
            }),
            retry: RetryConfig {
                max_attempts: 4,
                backoff: BackoffStrategy::Exponential {
                    initial: Duration::from_millis(250),
                    max: Duration::from_secs(10),
                    multiplier: 2.0,
                },
                retryable_error_codes: BTreeSet::new(),
                max_total_duration: Some(Duration::from_secs(30)),
                jitter: 0.3,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 8,
                failure_window: Duration::from_secs(60),
                recovery_timeout: Duration::from_secs(20),
                success_threshold: 2,
                trigger_errors: default_trigger_errors(),
            },
            timeout: TimeoutConfig::default(),
        }
    }

    /// Microsoft Teams / Bot Framework: conservative budgets, slower
    /// upstream.
    pub fn teams() -> Self {
        Self {
            rate_limit: Some(RateLimiterConfig {
                global: RateLimitConfig::new(60, 10, Duration::from_secs(60)),
                per_conversation: Some(RateLimitConfig::new(10, 2, Duration::from_secs(60))),
                per_user: None,
                action: RateLimitAction::Delay,
            }),
            retry: RetryConfig {
                max_attempts: 3,
                backoff: BackoffStrategy::Linear {
                    initial: Duration::from_secs(1),
                    step: Duration::from_secs(2),
                    max: Duration::from_secs(10),
                },
                retryable_error_codes: BTreeSet::new(),
                max_total_duration: Some(Duration::from_secs(60)),
                jitter: 0.2,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 4,
                failure_window: Duration::from_secs(60),
                recovery_timeout: Duration::from_secs(60),
                success_threshold: 3,
                trigger_errors: default_trigger_errors(),
            },
            timeout: TimeoutConfig {
                connection: Duration::from_secs(15),
                request: Duration::from_secs(45),
                operation: Duration::from_secs(90),
                idle: Duration::from_secs(300),
            },
        }
    }

    pub fn preset_for(platform: &str) -> Option<Self> {
        match platform {
            "slack" => Some(Self::slack()),
            "discord" => Some(Self::discord()),
            "telegram" => Some(Self::telegram()),
            "teams" => Some(Self::teams()),
            _ => None,
        }
    }
}
