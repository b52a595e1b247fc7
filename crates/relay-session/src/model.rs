//! Session, message, and principal models.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use relay_core::{is_expired_unix_ms, new_session_id};
use relay_envelope::{ChannelIdentity, ConversationKey};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Paused,
    Expired,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Expired => "expired",
            Self::Closed => "closed",
        }
    }

    /// Terminal states never transition back to `active`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Expired | Self::Closed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// A tool invocation requested by an assistant turn.
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// One entry in a session's history, oldest-first.
pub struct SessionMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp_ms: u64,
    /// Source event for user messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<Value>,
}

impl SessionMessage {
    pub fn user(content: impl Into<String>, timestamp_ms: u64, event_id: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            timestamp_ms,
            event_id: Some(event_id.into()),
            tool_calls: Vec::new(),
            tool_result: None,
        }
    }

    pub fn assistant(content: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            timestamp_ms,
            event_id: None,
            tool_calls: Vec::new(),
            tool_result: None,
        }
    }

    pub fn system(content: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            timestamp_ms,
            event_id: None,
            tool_calls: Vec::new(),
            tool_result: None,
        }
    }

    pub fn tool(content: impl Into<String>, timestamp_ms: u64, result: Value) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            timestamp_ms,
            event_id: None,
            tool_calls: Vec::new(),
            tool_result: Some(result),
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Authenticated actor bound to a session. `"*"` in `permissions` grants
/// everything.
pub struct Principal {
    pub identity: ChannelIdentity,
    pub tenant_id: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    pub authenticated_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
}

impl Principal {
    pub fn for_identity(
        identity: ChannelIdentity,
        tenant_id: impl Into<String>,
        authenticated_at_ms: u64,
    ) -> Self {
        Self {
            identity,
            tenant_id: tenant_id.into(),
            roles: BTreeSet::new(),
            permissions: BTreeSet::new(),
            authenticated_at_ms,
            expires_at_ms: None,
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains("*") || self.permissions.contains(permission)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn is_authenticated(&self, now_ms: u64) -> bool {
        !is_expired_unix_ms(self.expires_at_ms, now_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Durable per-conversation state.
pub struct Session {
    pub id: String,
    pub conversation: ConversationKey,
    pub principal: Principal,
    pub state: SessionState,
    pub created_at_ms: u64,
    pub last_activity_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    #[serde(default)]
    pub history: Vec<SessionMessage>,
}

impl Session {
    pub fn new(
        conversation: ConversationKey,
        principal: Principal,
        now_ms: u64,
        expires_at_ms: Option<u64>,
    ) -> Self {
        Self {
            id: new_session_id(),
            conversation,
            principal,
            state: SessionState::Active,
            created_at_ms: now_ms,
            last_activity_ms: now_ms,
            expires_at_ms,
            context: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    pub fn is_active(&self, now_ms: u64) -> bool {
        self.state == SessionState::Active && !is_expired_unix_ms(self.expires_at_ms, now_ms)
    }

    /// Expired either explicitly or because the deadline elapsed while the
    /// session was still non-terminal.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        match self.state {
            SessionState::Expired => true,
            SessionState::Closed => false,
            SessionState::Active | SessionState::Paused => {
                is_expired_unix_ms(self.expires_at_ms, now_ms)
            }
        }
    }
}
