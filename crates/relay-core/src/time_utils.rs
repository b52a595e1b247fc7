//! Unix-millisecond clock helpers used by record expiry and session
//! bookkeeping. Monotonic elapsed-time measurement stays on
//! `tokio::time::Instant` inside the executors; these helpers cover the
//! wall-clock fields persisted in records.

use std::time::{SystemTime, UNIX_EPOCH};

pub fn current_unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .min(u128::from(u64::MAX)) as u64
}

/// An absent deadline never expires; a deadline at or before `now_ms` has.
pub fn is_expired_unix_ms(deadline_ms: Option<u64>, now_ms: u64) -> bool {
    match deadline_ms {
        None => false,
        Some(deadline) => now_ms >= deadline,
    }
}
