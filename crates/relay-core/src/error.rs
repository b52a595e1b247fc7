//! Error taxonomy for the gateway.
//!
//! Every expected failure in the pipeline surfaces as a [`ChannelError`]
//! value carrying a stable [`ErrorCode`], a human-readable message, and a
//! retryability flag the retry executor and circuit breaker consult.
//! Panics are reserved for programmer errors.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
/// Stable failure codes shared by adapters, policy, and the runtime.
pub enum ErrorCode {
    RateLimited,
    NotFound,
    PermissionDenied,
    InvalidRequest,
    MessageTooLong,
    FileTooLarge,
    NetworkError,
    Timeout,
    ServerError,
    CircuitOpen,
    SessionNotFound,
    AlreadyProcessing,
    Cancelled,
    Unsupported,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::InvalidRequest => "invalid_request",
            Self::MessageTooLong => "message_too_long",
            Self::FileTooLarge => "file_too_large",
            Self::NetworkError => "network_error",
            Self::Timeout => "timeout",
            Self::ServerError => "server_error",
            Self::CircuitOpen => "circuit_open",
            Self::SessionNotFound => "session_not_found",
            Self::AlreadyProcessing => "already_processing",
            Self::Cancelled => "cancelled",
            Self::Unsupported => "unsupported",
            Self::Unknown => "unknown",
        }
    }

    /// Whether a failure with this code is safe to retry on the same call
    /// path. `circuit_open` is deliberately non-retryable within one call:
    /// the breaker re-admits on its own schedule.
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::NetworkError | Self::Timeout | Self::ServerError
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Error)]
#[error("{code}: {message}")]
/// Tagged failure value carried through every fallible gateway operation.
pub struct ChannelError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub platform_data: BTreeMap<String, Value>,
}

impl ChannelError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.default_retryable(),
            retry_after_ms: None,
            platform_data: BTreeMap::new(),
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after_ms = Some(delay.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    pub fn with_platform_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.platform_data.insert(key.into(), value);
        self
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_ms.map(Duration::from_millis)
    }

    pub fn rate_limited(scope: &str, retry_after: Duration) -> Self {
        Self::new(
            ErrorCode::RateLimited,
            format!("rate limit exceeded for {scope} scope"),
        )
        .with_retry_after(retry_after)
    }

    pub fn circuit_open() -> Self {
        Self::new(ErrorCode::CircuitOpen, "circuit breaker is open")
    }

    pub fn timeout(class: &str, duration: Duration) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("{class} timed out after {duration:?}"),
        )
    }

    pub fn cancelled(context: &str) -> Self {
        Self::new(ErrorCode::Cancelled, format!("{context} was cancelled"))
    }

    pub fn unsupported(operation: &str) -> Self {
        Self::new(
            ErrorCode::Unsupported,
            format!("operation '{operation}' is not supported by this channel"),
        )
    }

    pub fn session_not_found(session_id: &str) -> Self {
        Self::new(
            ErrorCode::SessionNotFound,
            format!("session '{session_id}' not found"),
        )
    }

    pub fn already_processing(event_id: &str) -> Self {
        Self::new(
            ErrorCode::AlreadyProcessing,
            format!("event '{event_id}' is already being processed by another instance"),
        )
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServerError, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message)
    }
}
