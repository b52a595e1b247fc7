//! Session manager: the single mutation path for sessions.
//!
//! Every mutator reads the current value from the store, derives an
//! updated copy, and writes it back. Last-write-wins across concurrent
//! mutations of the same session; callers needing compare-and-swap must
//! sequence at a higher layer.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_core::{current_unix_timestamp_ms, ChannelError};
use relay_envelope::{ChannelEvent, ConversationKey};

use crate::model::{Principal, Session, SessionMessage, SessionState};
use crate::store::{SessionStore, SessionStoreConfig};

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    config: SessionStoreConfig,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, config: SessionStoreConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn config(&self) -> &SessionStoreConfig {
        &self.config
    }

    /// Session for the event's conversation: the live one if it exists, a
    /// fresh one otherwise. A paused session is returned as-is (processing
    /// in a paused conversation is the caller's policy call); terminal and
    /// deadline-expired sessions are replaced, with the lapsed session
    /// marked `expired` first.
    pub async fn get_or_create_session(
        &self,
        event: &ChannelEvent,
    ) -> Result<Session, ChannelError> {
        let now_ms = current_unix_timestamp_ms();
        if let Some(mut existing) = self.store.get_by_conversation(&event.conversation).await? {
            if !existing.state.is_terminal() && !existing.is_expired(now_ms) {
                existing.last_activity_ms = now_ms;
                self.store.put(existing.clone()).await?;
                return Ok(existing);
            }
            if !existing.state.is_terminal() {
                existing.state = SessionState::Expired;
                existing.last_activity_ms = now_ms;
                self.store.put(existing).await?;
            }
        }
        let principal = Principal::for_identity(
            event.sender.clone(),
            event.conversation.tenant.clone(),
            now_ms,
        );
        self.create_session(event.conversation.clone(), principal).await
    }

    pub async fn create_session(
        &self,
        conversation: ConversationKey,
        principal: Principal,
    ) -> Result<Session, ChannelError> {
        let now_ms = current_unix_timestamp_ms();
        let expires_at_ms = now_ms.checked_add(self.config.default_timeout.as_millis() as u64);
        let session = Session::new(conversation, principal, now_ms, expires_at_ms);
        tracing::debug!(
            session_id = %session.id,
            conversation = %session.conversation.label(),
            "created session"
        );
        self.store.put(session.clone()).await?;
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>, ChannelError> {
        self.store.get(session_id).await
    }

    pub async fn get_session_by_conversation(
        &self,
        conversation: &ConversationKey,
    ) -> Result<Option<Session>, ChannelError> {
        self.store.get_by_conversation(conversation).await
    }

    /// Append a message, trim history FIFO to the configured bound, bump
    /// activity.
    pub async fn add_message(
        &self,
        session_id: &str,
        message: SessionMessage,
    ) -> Result<Session, ChannelError> {
        self.mutate(session_id, |session| {
            session.history.push(message);
            let max = self.config.max_history_size.max(1);
            if session.history.len() > max {
                let drop = session.history.len() - max;
                session.history.drain(..drop);
            }
            Ok(())
        })
        .await
    }

    pub async fn update_context(
        &self,
        session_id: &str,
        updates: BTreeMap<String, Value>,
    ) -> Result<Session, ChannelError> {
        self.mutate(session_id, |session| {
            session.context.extend(updates);
            Ok(())
        })
        .await
    }

    pub async fn set_context_value(
        &self,
        session_id: &str,
        key: impl Into<String>,
        value: Value,
    ) -> Result<Session, ChannelError> {
        let key = key.into();
        self.mutate(session_id, move |session| {
            session.context.insert(key, value);
            Ok(())
        })
        .await
    }

    pub async fn remove_context_value(
        &self,
        session_id: &str,
        key: &str,
    ) -> Result<Session, ChannelError> {
        self.mutate(session_id, |session| {
            session.context.remove(key);
            Ok(())
        })
        .await
    }

    pub async fn clear_context(&self, session_id: &str) -> Result<Session, ChannelError> {
        self.mutate(session_id, |session| {
            session.context.clear();
            Ok(())
        })
        .await
    }

    /// Refresh activity and extend the expiry deadline by the configured
    /// default timeout.
    pub async fn touch(&self, session_id: &str) -> Result<Session, ChannelError> {
        let timeout_ms = self.config.default_timeout.as_millis() as u64;
        self.mutate(session_id, move |session| {
            session.expires_at_ms = current_unix_timestamp_ms().checked_add(timeout_ms);
            Ok(())
        })
        .await
    }

    pub async fn pause(&self, session_id: &str) -> Result<Session, ChannelError> {
        self.transition(session_id, SessionState::Paused, &[SessionState::Active])
            .await
    }

    pub async fn resume(&self, session_id: &str) -> Result<Session, ChannelError> {
        self.transition(session_id, SessionState::Active, &[SessionState::Paused])
            .await
    }

    pub async fn close(&self, session_id: &str) -> Result<Session, ChannelError> {
        self.transition(
            session_id,
            SessionState::Closed,
            &[SessionState::Active, SessionState::Paused],
        )
        .await
    }

    pub async fn delete(&self, session_id: &str) -> Result<bool, ChannelError> {
        self.store.remove(session_id).await
    }

    pub async fn list(
        &self,
        offset: usize,
        limit: usize,
        state: Option<SessionState>,
    ) -> Result<Vec<Session>, ChannelError> {
        self.store.list(offset, limit, state).await
    }

    pub async fn cleanup_expired(&self) -> Result<usize, ChannelError> {
        self.store.cleanup_expired().await
    }

    /// Periodic expiry sweep, cancelled via `cancel`.
    pub fn spawn_cleanup(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = self.config.cleanup_interval.max(std::time::Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::spawn(async move {
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        match manager.cleanup_expired().await {
                            Ok(removed) if removed > 0 => {
                                tracing::debug!(removed, "session cleanup removed sessions");
                            }
                            Ok(_) => {}
                            Err(error) => {
                                tracing::warn!(error = %error, "session cleanup failed");
                            }
                        }
                    }
                }
            }
        })
    }

    async fn mutate<F>(&self, session_id: &str, apply: F) -> Result<Session, ChannelError>
    where
        F: FnOnce(&mut Session) -> Result<(), ChannelError>,
    {
        let mut session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| ChannelError::session_not_found(session_id))?;
        if session.state.is_terminal() {
            return Err(ChannelError::invalid_request(format!(
                "session '{session_id}' is {} and cannot be mutated",
                session.state.as_str()
            )));
        }
        apply(&mut session)?;
        session.last_activity_ms = current_unix_timestamp_ms().max(session.last_activity_ms);
        self.store.put(session.clone()).await?;
        Ok(session)
    }

    async fn transition(
        &self,
        session_id: &str,
        target: SessionState,
        allowed_from: &[SessionState],
    ) -> Result<Session, ChannelError> {
        let mut session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| ChannelError::session_not_found(session_id))?;
        if session.state == target {
            return Ok(session);
        }
        if !allowed_from.contains(&session.state) {
            return Err(ChannelError::invalid_request(format!(
                "invalid session transition {} -> {}",
                session.state.as_str(),
                target.as_str()
            )));
        }
        session.state = target;
        session.last_activity_ms = current_unix_timestamp_ms().max(session.last_activity_ms);
        self.store.put(session.clone()).await?;
        Ok(session)
    }
}
