//! The exactly-once guard.
//!
//! `process` is the single entry point the runtime wraps event handling
//! in. Under a correct `try_acquire`, at most one invocation of the inner
//! function per `event_id` reaches the completed transition across all
//! gateway instances; every other caller observes either the cached
//! outcome or an `already being processed` failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_core::{current_unix_timestamp_ms, new_instance_id, ChannelError};
use relay_envelope::ChannelResponse;

use crate::record::{IdempotencyStatus, ProcessingOutcome};
use crate::store::IdempotencyStore;

#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// How long completed/failed records stay visible for duplicate
    /// detection.
    pub record_ttl: Duration,
    /// How long a processing lock protects its holder before another
    /// instance may reclaim it.
    pub lock_timeout: Duration,
    /// Re-run events whose previous attempt failed instead of echoing the
    /// recorded failure.
    pub retry_failed: bool,
    pub cleanup_interval: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            record_ttl: Duration::from_secs(24 * 60 * 60),
            lock_timeout: Duration::from_secs(5 * 60),
            retry_failed: false,
            cleanup_interval: Duration::from_secs(60 * 60),
        }
    }
}

pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
    config: IdempotencyConfig,
    instance_id: String,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn IdempotencyStore>, config: IdempotencyConfig) -> Self {
        Self {
            store,
            config,
            instance_id: new_instance_id(),
        }
    }

    /// The UUID this instance writes as `lock_holder`.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn store(&self) -> &Arc<dyn IdempotencyStore> {
        &self.store
    }

    /// Run `operation` exactly once for `event_id`.
    ///
    /// Expected contention outcomes (duplicate delivery, lost lock race,
    /// recorded prior failure) come back as failed [`ProcessingOutcome`]s;
    /// the `Err` branch is reserved for store I/O failures.
    pub async fn process<F, Fut>(
        &self,
        event_id: &str,
        operation: F,
    ) -> Result<ProcessingOutcome, ChannelError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<ChannelResponse>, ChannelError>>,
    {
        let now_ms = current_unix_timestamp_ms();
        if let Some(existing) = self.store.get(event_id).await? {
            match existing.status {
                IdempotencyStatus::Completed => {
                    tracing::debug!(event_id, "duplicate event, returning cached outcome");
                    return Ok(existing
                        .result
                        .unwrap_or_else(|| ProcessingOutcome::success(None)));
                }
                IdempotencyStatus::Failed => {
                    if !self.config.retry_failed {
                        let prior = existing
                            .result
                            .and_then(|outcome| outcome.error)
                            .unwrap_or_else(|| "processing previously failed".to_string());
                        return Ok(ProcessingOutcome::failure(prior));
                    }
                    // Failed records are not claimable through try_acquire
                    // until they expire; drop the record so this retry can
                    // claim the slot.
                    self.store.release(event_id).await?;
                }
                IdempotencyStatus::Processing if existing.lock_valid(now_ms) => {
                    tracing::debug!(
                        event_id,
                        holder = existing.lock_holder.as_deref().unwrap_or(""),
                        "event locked by another instance"
                    );
                    return Ok(ProcessingOutcome::failure(format!(
                        "event '{event_id}' is already being processed by another instance"
                    )));
                }
                // expired-lock processing or expired record: fall through
                // to re-acquisition.
                _ => {}
            }
        }

        let acquired = self
            .store
            .try_acquire(
                event_id,
                &self.instance_id,
                self.config.lock_timeout,
                self.config.record_ttl,
            )
            .await?;
        if !acquired {
            // A concurrent instance won the race between get and acquire.
            return Ok(ProcessingOutcome::failure(format!(
                "lock acquisition failed for event '{event_id}'"
            )));
        }

        match operation().await {
            Ok(response) => {
                let outcome = ProcessingOutcome::success(response);
                self.store.complete(event_id, outcome.clone()).await?;
                Ok(outcome)
            }
            Err(error) => {
                let text = error.to_string();
                tracing::warn!(event_id, error = %text, "processing failed, recording failure");
                self.store.fail(event_id, &text).await?;
                Ok(ProcessingOutcome::failure(text))
            }
        }
    }

    /// Periodic store cleanup, cancelled via `cancel`.
    pub fn spawn_cleanup(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let guard = Arc::clone(self);
        let period = self.config.cleanup_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::spawn(async move {
            // The first tick fires immediately; skip it so startup does
            // not race adapter registration.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        match guard.store.cleanup().await {
                            Ok(removed) if removed > 0 => {
                                tracing::debug!(removed, "idempotency cleanup removed records");
                            }
                            Ok(_) => {}
                            Err(error) => {
                                tracing::warn!(error = %error, "idempotency cleanup failed");
                            }
                        }
                    }
                }
            }
        })
    }
}
