//! Idempotency store contract and in-memory reference implementation.
//!
//! `try_acquire` is the crux: it must atomically observe the current
//! record and install a fresh `processing` record in one step. The
//! in-memory store holds a mutex across the whole operation; a
//! distributed implementation must use the compare-and-set primitive of
//! its backing store instead.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use relay_core::{current_unix_timestamp_ms, ChannelError, ErrorCode};

use crate::record::{IdempotencyRecord, IdempotencyStatus, ProcessingOutcome};

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Fetch a record. Records past `expires_at_ms` are treated as absent
    /// and may be dropped as a side effect.
    async fn get(&self, event_id: &str) -> Result<Option<IdempotencyRecord>, ChannelError>;

    /// Atomically claim the processing slot for `event_id`. Succeeds when
    /// no usable record exists: absent, expired, or `processing` with an
    /// expired lock. Returns false when another holder owns a live claim.
    async fn try_acquire(
        &self,
        event_id: &str,
        holder: &str,
        lock_ttl: Duration,
        record_ttl: Duration,
    ) -> Result<bool, ChannelError>;

    /// Transition to `completed`, attach the outcome, clear the lock.
    /// `created_at_ms` and `expires_at_ms` are preserved.
    async fn complete(&self, event_id: &str, result: ProcessingOutcome)
        -> Result<(), ChannelError>;

    /// Transition to `failed` with a failure outcome; same preservation
    /// rules as `complete`.
    async fn fail(&self, event_id: &str, error_message: &str) -> Result<(), ChannelError>;

    /// Delete the record, abandoning the lock without recording an
    /// outcome.
    async fn release(&self, event_id: &str) -> Result<(), ChannelError>;

    /// Remove every expired record; returns the count removed.
    async fn cleanup(&self) -> Result<usize, ChannelError>;
}

/// Reference implementation guarding a map with a mutex.
#[derive(Default)]
pub struct MemoryIdempotencyStore {
    records: Mutex<HashMap<String, IdempotencyRecord>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn get(&self, event_id: &str) -> Result<Option<IdempotencyRecord>, ChannelError> {
        let now_ms = current_unix_timestamp_ms();
        let mut records = self.records.lock().await;
        match records.get(event_id) {
            Some(record) if record.is_expired(now_ms) => {
                records.remove(event_id);
                Ok(None)
            }
            Some(record) => Ok(Some(record.clone())),
            None => Ok(None),
        }
    }

    async fn try_acquire(
        &self,
        event_id: &str,
        holder: &str,
        lock_ttl: Duration,
        record_ttl: Duration,
    ) -> Result<bool, ChannelError> {
        let now_ms = current_unix_timestamp_ms();
        let mut records = self.records.lock().await;
        let claimable = match records.get(event_id) {
            None => true,
            Some(record) if record.is_expired(now_ms) => true,
            Some(record) if record.status == IdempotencyStatus::Expired => true,
            Some(record) => {
                record.status == IdempotencyStatus::Processing && !record.lock_valid(now_ms)
            }
        };
        if !claimable {
            return Ok(false);
        }
        records.insert(
            event_id.to_string(),
            IdempotencyRecord::processing(
                event_id,
                holder,
                now_ms,
                duration_ms(lock_ttl),
                duration_ms(record_ttl),
            ),
        );
        Ok(true)
    }

    async fn complete(
        &self,
        event_id: &str,
        result: ProcessingOutcome,
    ) -> Result<(), ChannelError> {
        let now_ms = current_unix_timestamp_ms();
        let mut records = self.records.lock().await;
        let record = records.get_mut(event_id).ok_or_else(|| {
            ChannelError::new(
                ErrorCode::NotFound,
                format!("no idempotency record for event '{event_id}'"),
            )
        })?;
        record.status = IdempotencyStatus::Completed;
        record.result = Some(result);
        record.completed_at_ms = Some(now_ms.max(record.created_at_ms));
        record.lock_holder = None;
        record.lock_expires_at_ms = None;
        Ok(())
    }

    async fn fail(&self, event_id: &str, error_message: &str) -> Result<(), ChannelError> {
        let now_ms = current_unix_timestamp_ms();
        let mut records = self.records.lock().await;
        let record = records.get_mut(event_id).ok_or_else(|| {
            ChannelError::new(
                ErrorCode::NotFound,
                format!("no idempotency record for event '{event_id}'"),
            )
        })?;
        record.status = IdempotencyStatus::Failed;
        record.result = Some(ProcessingOutcome::failure(error_message));
        record.completed_at_ms = Some(now_ms.max(record.created_at_ms));
        record.lock_holder = None;
        record.lock_expires_at_ms = None;
        Ok(())
    }

    async fn release(&self, event_id: &str) -> Result<(), ChannelError> {
        self.records.lock().await.remove(event_id);
        Ok(())
    }

    async fn cleanup(&self) -> Result<usize, ChannelError> {
        let now_ms = current_unix_timestamp_ms();
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now_ms));
        Ok(before - records.len())
    }
}
