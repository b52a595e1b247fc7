//! Idempotency record model.

use serde::{Deserialize, Serialize};

use relay_envelope::ChannelResponse;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Processing,
    Completed,
    Failed,
    Expired,
}

impl IdempotencyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Cached outcome of one processed event: a success/failure discriminant,
/// the response produced (if any), and the failure text (if any).
pub struct ProcessingOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ChannelResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessingOutcome {
    pub fn success(response: Option<ChannelResponse>) -> Self {
        Self {
            success: true,
            response,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// One keyed record in the idempotency store.
///
/// Invariants: `created_at_ms ≤ completed_at_ms ≤ expires_at_ms`; while
/// `status == processing` both `lock_holder` and `lock_expires_at_ms` are
/// set.
pub struct IdempotencyRecord {
    pub event_id: String,
    pub status: IdempotencyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ProcessingOutcome>,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    pub expires_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_holder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_expires_at_ms: Option<u64>,
}

impl IdempotencyRecord {
    pub fn processing(
        event_id: impl Into<String>,
        holder: impl Into<String>,
        now_ms: u64,
        lock_ttl_ms: u64,
        record_ttl_ms: u64,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            status: IdempotencyStatus::Processing,
            result: None,
            created_at_ms: now_ms,
            completed_at_ms: None,
            expires_at_ms: now_ms.saturating_add(record_ttl_ms),
            lock_holder: Some(holder.into()),
            lock_expires_at_ms: Some(now_ms.saturating_add(lock_ttl_ms)),
        }
    }

    pub fn lock_valid(&self, now_ms: u64) -> bool {
        self.lock_expires_at_ms
            .map(|expires| now_ms < expires)
            .unwrap_or(false)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms
    }
}
