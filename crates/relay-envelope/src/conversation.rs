//! Conversation addressing.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// Unique addressable context on a platform: `(platform, tenant, room, thread?)`.
/// Total equality; the ordering domain for per-conversation guarantees.
pub struct ConversationKey {
    pub platform: String,
    pub tenant: String,
    pub room: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
}

impl ConversationKey {
    pub fn new(
        platform: impl Into<String>,
        tenant: impl Into<String>,
        room: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            tenant: tenant.into(),
            room: room.into(),
            thread: None,
        }
    }

    pub fn with_thread(mut self, thread: impl Into<String>) -> Self {
        self.thread = Some(thread.into());
        self
    }

    /// Stable display form `platform:tenant:room[:thread]`, used for rate
    /// limiter scope keys and log fields.
    pub fn label(&self) -> String {
        match &self.thread {
            Some(thread) => format!("{}:{}:{}:{}", self.platform, self.tenant, self.room, thread),
            None => format!("{}:{}:{}", self.platform, self.tenant, self.room),
        }
    }
}
