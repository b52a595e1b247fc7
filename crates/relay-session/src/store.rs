//! Session store contract and in-memory reference implementation.
//!
//! Lookup is indexed three ways: by session id, by conversation key, and
//! by `(platform, user id)`. The write path enforces the history bound so
//! a direct store write can never violate the trimming invariant.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use relay_core::{current_unix_timestamp_ms, ChannelError};
use relay_envelope::ConversationKey;

use crate::model::{Session, SessionState};

#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// Inactivity window granted on creation and on every `touch`.
    pub default_timeout: Duration,
    pub max_history_size: usize,
    pub cleanup_interval: Duration,
    /// Reserved for durable backends behind the same contract; the
    /// in-memory store ignores it.
    pub persistent: bool,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(24 * 60 * 60),
            max_history_size: 100,
            cleanup_interval: Duration::from_secs(15 * 60),
            persistent: false,
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, ChannelError>;

    async fn get_by_conversation(
        &self,
        conversation: &ConversationKey,
    ) -> Result<Option<Session>, ChannelError>;

    async fn get_by_user(
        &self,
        platform: &str,
        user_id: &str,
    ) -> Result<Option<Session>, ChannelError>;

    /// Insert or replace. Implementations trim history to the configured
    /// bound before persisting.
    async fn put(&self, session: Session) -> Result<(), ChannelError>;

    /// Returns true when a session was removed.
    async fn remove(&self, session_id: &str) -> Result<bool, ChannelError>;

    /// Sessions sorted by `last_activity_ms` descending, optionally
    /// filtered by state, then paginated.
    async fn list(
        &self,
        offset: usize,
        limit: usize,
        state: Option<SessionState>,
    ) -> Result<Vec<Session>, ChannelError>;

    /// Remove every expired session; returns the count removed.
    async fn cleanup_expired(&self) -> Result<usize, ChannelError>;

    async fn count(&self) -> Result<usize, ChannelError>;
}

#[derive(Default)]
struct SessionIndexes {
    by_id: HashMap<String, Session>,
    by_conversation: HashMap<ConversationKey, String>,
    by_user: HashMap<(String, String), String>,
}

impl SessionIndexes {
    fn unlink(&mut self, session: &Session) {
        if self
            .by_conversation
            .get(&session.conversation)
            .is_some_and(|id| *id == session.id)
        {
            self.by_conversation.remove(&session.conversation);
        }
        let user_key = (
            session.principal.identity.platform.clone(),
            session.principal.identity.id.clone(),
        );
        if self.by_user.get(&user_key).is_some_and(|id| *id == session.id) {
            self.by_user.remove(&user_key);
        }
    }
}

pub struct MemorySessionStore {
    max_history_size: usize,
    inner: RwLock<SessionIndexes>,
}

impl MemorySessionStore {
    pub fn new(config: &SessionStoreConfig) -> Self {
        Self {
            max_history_size: config.max_history_size.max(1),
            inner: RwLock::new(SessionIndexes::default()),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, ChannelError> {
        Ok(self.inner.read().await.by_id.get(session_id).cloned())
    }

    async fn get_by_conversation(
        &self,
        conversation: &ConversationKey,
    ) -> Result<Option<Session>, ChannelError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_conversation
            .get(conversation)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    async fn get_by_user(
        &self,
        platform: &str,
        user_id: &str,
    ) -> Result<Option<Session>, ChannelError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_user
            .get(&(platform.to_string(), user_id.to_string()))
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    async fn put(&self, mut session: Session) -> Result<(), ChannelError> {
        // Store-level trimming invariant: history stays oldest-first and
        // bounded regardless of which path wrote the session.
        if session.history.len() > self.max_history_size {
            let drop = session.history.len() - self.max_history_size;
            session.history.drain(..drop);
        }
        let mut inner = self.inner.write().await;
        if let Some(previous) = inner.by_id.remove(&session.id) {
            inner.unlink(&previous);
        }
        inner
            .by_conversation
            .insert(session.conversation.clone(), session.id.clone());
        inner.by_user.insert(
            (
                session.principal.identity.platform.clone(),
                session.principal.identity.id.clone(),
            ),
            session.id.clone(),
        );
        inner.by_id.insert(session.id.clone(), session);
        Ok(())
    }

    async fn remove(&self, session_id: &str) -> Result<bool, ChannelError> {
        let mut inner = self.inner.write().await;
        match inner.by_id.remove(session_id) {
            Some(session) => {
                inner.unlink(&session);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(
        &self,
        offset: usize,
        limit: usize,
        state: Option<SessionState>,
    ) -> Result<Vec<Session>, ChannelError> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<Session> = inner
            .by_id
            .values()
            .filter(|session| state.map_or(true, |wanted| session.state == wanted))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| {
            b.last_activity_ms
                .cmp(&a.last_activity_ms)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(sessions.into_iter().skip(offset).take(limit).collect())
    }

    async fn cleanup_expired(&self) -> Result<usize, ChannelError> {
        let now_ms = current_unix_timestamp_ms();
        let mut inner = self.inner.write().await;
        let expired: Vec<String> = inner
            .by_id
            .values()
            .filter(|session| session.is_expired(now_ms))
            .map(|session| session.id.clone())
            .collect();
        for id in &expired {
            if let Some(session) = inner.by_id.remove(id) {
                inner.unlink(&session);
            }
        }
        Ok(expired.len())
    }

    async fn count(&self) -> Result<usize, ChannelError> {
        Ok(self.inner.read().await.by_id.len())
    }
}

#[cfg(test)]
mod tests {
    use relay_core::current_unix_timestamp_ms;
    use relay_envelope::{ChannelIdentity, ConversationKey};

    use super::{MemorySessionStore, SessionStore, SessionStoreConfig};
    use crate::model::{Principal, Session, SessionMessage, SessionState};

    fn store_with_history(max: usize) -> MemorySessionStore {
        MemorySessionStore::new(&SessionStoreConfig {
            max_history_size: max,
            ..SessionStoreConfig::default()
        })
    }

    fn session(room: &str, user: &str, now_ms: u64) -> Session {
        Session::new(
            ConversationKey::new("slack", "T1", room),
            Principal::for_identity(ChannelIdentity::new("slack", user), "T1", now_ms),
            now_ms,
            None,
        )
    }

    #[tokio::test]
    async fn functional_store_indexes_by_id_conversation_and_user() {
        let store = store_with_history(10);
        let now = current_unix_timestamp_ms();
        let session = session("C1", "U1", now);
        store.put(session.clone()).await.expect("put");

        assert_eq!(
            store.get(&session.id).await.expect("by id").map(|s| s.id),
            Some(session.id.clone())
        );
        assert_eq!(
            store
                .get_by_conversation(&session.conversation)
                .await
                .expect("by conversation")
                .map(|s| s.id),
            Some(session.id.clone())
        );
        assert_eq!(
            store
                .get_by_user("slack", "U1")
                .await
                .expect("by user")
                .map(|s| s.id),
            Some(session.id.clone())
        );
        assert!(store.get("missing").await.expect("miss").is_none());
    }

    #[tokio::test]
    async fn regression_put_trims_history_at_the_store_boundary() {
        let store = store_with_history(5);
        let now = current_unix_timestamp_ms();
        let mut session = session("C1", "U1", now);
        for index in 1..=10 {
            session
                .history
                .push(SessionMessage::user(format!("m{index}"), now, format!("e{index}")));
        }
        store.put(session.clone()).await.expect("put");
        let stored = store.get(&session.id).await.expect("get").expect("session");
        assert_eq!(stored.history.len(), 5);
        let contents: Vec<&str> = stored
            .history
            .iter()
            .map(|message| message.content.as_str())
            .collect();
        assert_eq!(contents, vec!["m6", "m7", "m8", "m9", "m10"]);
    }

    #[tokio::test]
    async fn functional_list_sorts_by_recency_and_paginates() {
        let store = store_with_history(10);
        let now = current_unix_timestamp_ms();
        let mut ids = Vec::new();
        for index in 0..4u64 {
            let mut s = session(&format!("C{index}"), &format!("U{index}"), now);
            s.last_activity_ms = now + index * 10;
            ids.push(s.id.clone());
            store.put(s).await.expect("put");
        }

        let page = store.list(0, 2, None).await.expect("list");
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, ids[3]);
        assert_eq!(page[1].id, ids[2]);

        let rest = store.list(2, 10, None).await.expect("list rest");
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].id, ids[1]);
        assert_eq!(rest[1].id, ids[0]);
    }

    #[tokio::test]
    async fn functional_list_filters_by_state() {
        let store = store_with_history(10);
        let now = current_unix_timestamp_ms();
        let mut paused = session("C1", "U1", now);
        paused.state = SessionState::Paused;
        store.put(paused.clone()).await.expect("put paused");
        store.put(session("C2", "U2", now)).await.expect("put active");

        let paused_only = store
            .list(0, 10, Some(SessionState::Paused))
            .await
            .expect("list paused");
        assert_eq!(paused_only.len(), 1);
        assert_eq!(paused_only[0].id, paused.id);
    }

    #[tokio::test]
    async fn functional_cleanup_removes_expired_sessions_and_their_indexes() {
        let store = store_with_history(10);
        let now = current_unix_timestamp_ms();
        let mut stale = session("C1", "U1", now);
        stale.expires_at_ms = Some(now.saturating_sub(1));
        let conversation = stale.conversation.clone();
        store.put(stale).await.expect("put stale");
        store.put(session("C2", "U2", now)).await.expect("put live");

        let removed = store.cleanup_expired().await.expect("cleanup");
        assert_eq!(removed, 1);
        assert_eq!(store.count().await.expect("count"), 1);
        assert!(store
            .get_by_conversation(&conversation)
            .await
            .expect("lookup")
            .is_none());
    }

    #[tokio::test]
    async fn regression_reindex_on_put_drops_stale_conversation_links() {
        let store = store_with_history(10);
        let now = current_unix_timestamp_ms();
        let mut original = session("C1", "U1", now);
        store.put(original.clone()).await.expect("put");

        // The conversation moves to a thread-scoped key; the old link must
        // not survive.
        let old_key = original.conversation.clone();
        original.conversation = ConversationKey::new("slack", "T1", "C1").with_thread("ts-1");
        store.put(original.clone()).await.expect("re-put");

        assert!(store
            .get_by_conversation(&old_key)
            .await
            .expect("old key")
            .is_none());
        assert_eq!(
            store
                .get_by_conversation(&original.conversation)
                .await
                .expect("new key")
                .map(|s| s.id),
            Some(original.id)
        );
    }
}
