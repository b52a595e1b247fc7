//! The `ChannelPort` contract.
//!
//! Required surface: platform identity, capabilities, hot event and
//! connection-state streams, lifecycle, and `send`. Optional operations
//! default to an `unsupported` failure so adapters only implement what
//! their platform actually offers.

use async_trait::async_trait;
use tokio::sync::broadcast;

use relay_core::ChannelError;
use relay_envelope::{
    ChannelCapabilities, ChannelEvent, ChannelIdentity, ChannelResponse, ConnectionState,
    ConversationKey, FileInfo, SendResult,
};

#[derive(Debug, Clone, PartialEq)]
/// Platform-side view of a conversation, for adapters that can resolve
/// one.
pub struct ConversationInfo {
    pub key: ConversationKey,
    pub name: Option<String>,
    pub member_count: Option<u32>,
}

#[derive(Debug, Clone)]
/// Arguments for an adapter file upload.
pub struct FileUpload {
    pub conversation: ConversationKey,
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[async_trait]
/// Contract every platform adapter satisfies.
///
/// Streams are hot broadcasts: a late subscriber sees no history, and a
/// lagging subscriber drops. `start`/`stop` are idempotent; `stop` must
/// cancel in-flight sends or fail them with `cancelled`. Adapters must be
/// safe under concurrent `send` calls.
pub trait ChannelPort: Send + Sync {
    fn platform(&self) -> &str;

    fn capabilities(&self) -> ChannelCapabilities;

    fn is_running(&self) -> bool;

    /// Subscribe to the event stream. Restartable after `stop`/`start`;
    /// events are never replayed.
    fn subscribe_events(&self) -> broadcast::Receiver<ChannelEvent>;

    fn subscribe_connection_state(&self) -> broadcast::Receiver<ConnectionState>;

    async fn start(&self) -> Result<(), ChannelError>;

    async fn stop(&self) -> Result<(), ChannelError>;

    async fn send(&self, response: &ChannelResponse) -> SendResult;

    async fn get_identity(&self, user_id: &str) -> Result<ChannelIdentity, ChannelError> {
        let _ = user_id;
        Err(ChannelError::unsupported("get_identity"))
    }

    async fn get_conversation(
        &self,
        key: &ConversationKey,
    ) -> Result<ConversationInfo, ChannelError> {
        let _ = key;
        Err(ChannelError::unsupported("get_conversation"))
    }

    async fn upload_file(&self, upload: FileUpload) -> Result<FileInfo, ChannelError> {
        let _ = upload;
        Err(ChannelError::unsupported("upload_file"))
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ChannelError> {
        let _ = file_id;
        Err(ChannelError::unsupported("download_file"))
    }

    async fn edit(
        &self,
        conversation: &ConversationKey,
        message_id: &str,
        text: &str,
    ) -> Result<(), ChannelError> {
        let _ = (conversation, message_id, text);
        Err(ChannelError::unsupported("edit"))
    }

    async fn delete(
        &self,
        conversation: &ConversationKey,
        message_id: &str,
    ) -> Result<(), ChannelError> {
        let _ = (conversation, message_id);
        Err(ChannelError::unsupported("delete"))
    }

    async fn react(
        &self,
        conversation: &ConversationKey,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), ChannelError> {
        let _ = (conversation, message_id, emoji);
        Err(ChannelError::unsupported("react"))
    }

    async fn send_typing(&self, conversation: &ConversationKey) -> Result<(), ChannelError> {
        let _ = conversation;
        Err(ChannelError::unsupported("send_typing"))
    }
}
