//! Channel capability descriptors.
//!
//! Presets are plain data constructors; there is no process-wide mutable
//! capability registry. An adapter may start from a preset and override
//! what its deployment actually supports.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Video,
    Audio,
    Document,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
/// What a connected channel can do. The runtime consults these before
/// dispatching optional operations; adapters reject unsupported calls
/// with an `unsupported` error regardless.
pub struct ChannelCapabilities {
    pub text: bool,
    pub rich_messages: bool,
    pub attachments: bool,
    pub reactions: bool,
    pub threads: bool,
    pub editing: bool,
    pub deleting: bool,
    pub typing: bool,
    pub files: bool,
    pub buttons: bool,
    pub menus: bool,
    pub modals: bool,
    pub ephemeral: bool,
    pub commands: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_blocks_per_message: Option<usize>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub attachment_kinds: BTreeSet<AttachmentKind>,
}

const MIB: u64 = 1024 * 1024;

impl ChannelCapabilities {
    /// Minimal profile: plain text only. The default for adapters that do
    /// not declare anything richer.
    pub fn text_only() -> Self {
        Self {
            text: true,
            ..Self::default()
        }
    }

    pub fn slack() -> Self {
        Self {
            text: true,
            rich_messages: true,
            attachments: true,
            reactions: true,
            threads: true,
            editing: true,
            deleting: true,
            typing: false,
            files: true,
            buttons: true,
            menus: true,
            modals: true,
            ephemeral: true,
            commands: true,
            max_message_length: Some(40_000),
            max_file_size: Some(1024 * MIB),
            max_blocks_per_message: Some(50),
            attachment_kinds: all_attachment_kinds(),
        }
    }

    pub fn discord() -> Self {
        Self {
            text: true,
            rich_messages: true,
            attachments: true,
            reactions: true,
            threads: true,
            editing: true,
            deleting: true,
            typing: true,
            files: true,
            buttons: true,
            menus: true,
            modals: true,
            ephemeral: true,
            commands: true,
            max_message_length: Some(2_000),
            max_file_size: Some(25 * MIB),
            max_blocks_per_message: Some(10),
            attachment_kinds: all_attachment_kinds(),
        }
    }

    pub fn telegram() -> Self {
        Self {
            text: true,
            rich_messages: true,
            attachments: true,
            reactions: true,
            threads: false,
            editing: true,
            deleting: true,
            typing: true,
            files: true,
            buttons: true,
            menus: false,
            modals: false,
            ephemeral: false,
            commands: true,
            max_message_length: Some(4_096),
            max_file_size: Some(50 * MIB),
            max_blocks_per_message: None,
            attachment_kinds: all_attachment_kinds(),
        }
    }

    pub fn teams() -> Self {
        Self {
            text: true,
            rich_messages: true,
            attachments: true,
            reactions: true,
            threads: true,
            editing: true,
            deleting: true,
            typing: true,
            files: true,
            buttons: true,
            menus: true,
            modals: true,
            ephemeral: false,
            commands: true,
            max_message_length: Some(28_000),
            max_file_size: Some(250 * MIB),
            max_blocks_per_message: Some(60),
            attachment_kinds: all_attachment_kinds(),
        }
    }

    pub fn preset_for(platform: &str) -> Option<Self> {
        match platform {
            "slack" => Some(Self::slack()),
            "discord" => Some(Self::discord()),
            "telegram" => Some(Self::telegram()),
            "teams" => Some(Self::teams()),
            _ => None,
        }
    }
}

fn all_attachment_kinds() -> BTreeSet<AttachmentKind> {
    BTreeSet::from([
        AttachmentKind::Image,
        AttachmentKind::Video,
        AttachmentKind::Audio,
        AttachmentKind::Document,
    ])
}

#[cfg(test)]
mod tests {
    use super::ChannelCapabilities;

    #[test]
    fn unit_text_only_profile_has_no_optional_features() {
        let caps = ChannelCapabilities::text_only();
        assert!(caps.text);
        assert!(!caps.rich_messages);
        assert!(!caps.files);
        assert!(caps.max_message_length.is_none());
    }

    #[test]
    fn unit_presets_are_value_constructors() {
        let first = ChannelCapabilities::discord();
        let second = ChannelCapabilities::discord();
        assert_eq!(first, second);
        assert_eq!(first.max_message_length, Some(2_000));
    }

    #[test]
    fn functional_preset_lookup_covers_supported_platforms() {
        for platform in ["slack", "discord", "telegram", "teams"] {
            let caps = ChannelCapabilities::preset_for(platform).expect("preset");
            assert!(caps.text, "{platform} preset must support text");
        }
        assert!(ChannelCapabilities::preset_for("irc").is_none());
    }

    #[test]
    fn functional_capabilities_round_trip_through_json() {
        let caps = ChannelCapabilities::slack();
        let encoded = serde_json::to_string(&caps).expect("encode");
        let decoded: ChannelCapabilities = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, caps);
    }
}
