//! Outbound response envelope and send receipts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use relay_core::{current_unix_timestamp_ms, ChannelError};

use crate::conversation::ConversationKey;
use crate::event::FileInfo;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "payload_kind", rename_all = "snake_case")]
/// Shape of an outbound response. Exhaustive matching at every dispatch
/// site: adding a variant is a compile-time obligation for all adapters.
pub enum ResponsePayload {
    Text {
        text: String,
    },
    Blocks {
        blocks: Vec<Value>,
        #[serde(default)]
        fallback_text: String,
    },
    File {
        file: FileInfo,
        #[serde(default)]
        caption: String,
    },
    Update {
        message_id: String,
        text: String,
    },
    Delete {
        message_id: String,
    },
    Ephemeral {
        user_id: String,
        text: String,
    },
    Reaction {
        emoji: String,
        target_message_id: String,
    },
    Typing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Normalized outbound response targeting one conversation.
pub struct ChannelResponse {
    pub conversation: ConversationKey,
    pub payload: ResponsePayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_message_id: Option<String>,
}

impl ChannelResponse {
    pub fn text(conversation: ConversationKey, text: impl Into<String>) -> Self {
        Self {
            conversation,
            payload: ResponsePayload::Text { text: text.into() },
            reply_to: None,
            target_message_id: None,
        }
    }

    pub fn typing(conversation: ConversationKey) -> Self {
        Self {
            conversation,
            payload: ResponsePayload::Typing,
            reply_to: None,
            target_message_id: None,
        }
    }

    pub fn with_reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Receipt for one `send` call. Every adapter send path returns one of
/// these; failures are carried as a value, never silently dropped.
pub struct SendResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ChannelError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub platform_data: BTreeMap<String, Value>,
}

impl SendResult {
    pub fn ok(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            error: None,
            timestamp_ms: Some(current_unix_timestamp_ms()),
            platform_data: BTreeMap::new(),
        }
    }

    pub fn failed(error: ChannelError) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error),
            timestamp_ms: Some(current_unix_timestamp_ms()),
            platform_data: BTreeMap::new(),
        }
    }

    pub fn into_result(self) -> Result<Option<String>, ChannelError> {
        if self.success {
            Ok(self.message_id)
        } else {
            Err(self
                .error
                .unwrap_or_else(|| ChannelError::unknown("send failed without error detail")))
        }
    }
}
