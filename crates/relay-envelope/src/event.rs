//! Inbound event envelope.
//!
//! Adapters translate platform deliveries into [`ChannelEvent`] values.
//! `event_id` is the idempotency key: it must be unique per platform
//! delivery and stable across redeliveries of the same upstream event.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use relay_core::ChannelError;

use crate::conversation::ConversationKey;
use crate::identity::ChannelIdentity;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported inbound event kinds.
pub enum EventKind {
    Message,
    Command,
    Button,
    File,
    Reaction,
    Mention,
    Join,
    Leave,
    Webhook,
    Unknown,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Command => "command",
            Self::Button => "button",
            Self::File => "file",
            Self::Reaction => "reaction",
            Self::Mention => "mention",
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Webhook => "webhook",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Metadata describing a platform-hosted file.
pub struct FileInfo {
    pub id: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "payload_kind", rename_all = "snake_case")]
/// Kind-specific payload attached to a [`ChannelEvent`].
pub enum EventPayload {
    Text {
        text: String,
    },
    Command {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Button {
        button_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    File {
        file: FileInfo,
        #[serde(default)]
        caption: String,
    },
    Reaction {
        emoji: String,
        target_message_id: String,
    },
    Webhook {
        body: Value,
    },
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Normalized inbound event from a platform adapter.
pub struct ChannelEvent {
    pub event_id: String,
    pub kind: EventKind,
    pub conversation: ConversationKey,
    pub sender: ChannelIdentity,
    pub timestamp_ms: u64,
    pub payload: EventPayload,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl ChannelEvent {
    /// Convenience constructor for plain text messages, the common case in
    /// adapters and tests.
    pub fn text_message(
        event_id: impl Into<String>,
        conversation: ConversationKey,
        sender: ChannelIdentity,
        timestamp_ms: u64,
        text: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            kind: EventKind::Message,
            conversation,
            sender,
            timestamp_ms,
            payload: EventPayload::Text { text: text.into() },
            metadata: BTreeMap::new(),
        }
    }

    /// Textual content of the event, if it has any.
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Text { text } => Some(text.as_str()),
            EventPayload::File { caption, .. } if !caption.is_empty() => Some(caption.as_str()),
            _ => None,
        }
    }

    /// Command line for `direct_tool` dispatch: either an explicit command
    /// payload or the raw text of a message. Whitespace tokenization only;
    /// quoting is not interpreted.
    pub fn command_line(&self) -> Option<(String, Vec<String>)> {
        match &self.payload {
            EventPayload::Command { command, args } => Some((command.clone(), args.clone())),
            EventPayload::Text { text } => {
                let mut parts = text.split_whitespace().map(str::to_string);
                let command = parts.next()?;
                Some((command, parts.collect()))
            }
            _ => None,
        }
    }
}

/// Structural checks applied before an event enters the pipeline. Adapters
/// that synthesize events must pass these; the runtime rejects events that
/// do not.
pub fn validate_channel_event(event: &ChannelEvent) -> Result<(), ChannelError> {
    if event.event_id.trim().is_empty() {
        return Err(ChannelError::invalid_request("event has empty event_id"));
    }
    if event.conversation.platform.trim().is_empty() {
        return Err(ChannelError::invalid_request(
            "event conversation has empty platform",
        ));
    }
    if event.conversation.room.trim().is_empty() {
        return Err(ChannelError::invalid_request(
            "event conversation has empty room",
        ));
    }
    if event.sender.id.trim().is_empty() {
        return Err(ChannelError::invalid_request("event has empty sender id"));
    }
    if event.timestamp_ms == 0 {
        return Err(ChannelError::invalid_request("event has zero timestamp_ms"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use relay_core::ErrorCode;

    use super::{
        validate_channel_event, ChannelEvent, ChannelIdentity, ConversationKey, EventKind,
        EventPayload,
    };

    fn sample_event(text: &str) -> ChannelEvent {
        ChannelEvent::text_message(
            "evt-1",
            ConversationKey::new("slack", "T1", "C1"),
            ChannelIdentity::new("slack", "U1"),
            1_700_000_000_000,
            text,
        )
    }

    #[test]
    fn unit_text_message_constructor_sets_message_kind() {
        let event = sample_event("hello");
        assert_eq!(event.kind, EventKind::Message);
        assert_eq!(event.text(), Some("hello"));
    }

    #[test]
    fn unit_command_line_tokenizes_on_whitespace_only() {
        let event = sample_event("weather  london   today");
        let (command, args) = event.command_line().expect("command line");
        assert_eq!(command, "weather");
        assert_eq!(args, vec!["london".to_string(), "today".to_string()]);

        let quoted = sample_event("echo \"two words\"");
        let (_, args) = quoted.command_line().expect("command line");
        assert_eq!(args, vec!["\"two".to_string(), "words\"".to_string()]);
    }

    #[test]
    fn unit_command_payload_bypasses_tokenization() {
        let mut event = sample_event("ignored");
        event.kind = EventKind::Command;
        event.payload = EventPayload::Command {
            command: "deploy".to_string(),
            args: vec!["prod".to_string()],
        };
        let (command, args) = event.command_line().expect("command line");
        assert_eq!(command, "deploy");
        assert_eq!(args, vec!["prod".to_string()]);
    }

    #[test]
    fn functional_event_round_trips_through_json() {
        let mut event = sample_event("hello");
        event
            .metadata
            .insert("team".to_string(), serde_json::json!("T1"));
        let encoded = serde_json::to_string(&event).expect("encode");
        let decoded: ChannelEvent = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, event);
    }

    #[test]
    fn regression_validation_rejects_blank_identifiers() {
        let mut event = sample_event("hello");
        event.event_id = "  ".to_string();
        let error = validate_channel_event(&event).expect_err("blank event id");
        assert_eq!(error.code, ErrorCode::InvalidRequest);

        let mut event = sample_event("hello");
        event.timestamp_ms = 0;
        assert!(validate_channel_event(&event).is_err());
    }
}
