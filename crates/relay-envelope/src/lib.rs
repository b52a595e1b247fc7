//! Normalized envelope types for the relay gateway.
//!
//! Every connected platform adapter translates its wire format into these
//! values on ingress and back out on egress. The core pipeline consumes
//! them as opaque data; nothing here references a processor or adapter.

pub mod capabilities;
pub mod connection;
pub mod conversation;
pub mod event;
pub mod identity;
pub mod response;

pub use capabilities::{AttachmentKind, ChannelCapabilities};
pub use connection::ConnectionState;
pub use conversation::ConversationKey;
pub use event::{validate_channel_event, ChannelEvent, EventKind, EventPayload, FileInfo};
pub use identity::ChannelIdentity;
pub use response::{ChannelResponse, ResponsePayload, SendResult};
