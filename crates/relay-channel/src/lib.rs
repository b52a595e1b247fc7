//! Adapter-facing contracts for the relay gateway.
//!
//! Every platform connector implements [`ChannelPort`]; the runtime
//! consumes adapters solely through that trait. Transport I/O itself
//! (websockets, HTTP long-poll, webhooks) lives in the adapter crates,
//! not here. The [`ScriptedChannel`] is an in-memory implementation used
//! by the integration tests and usable as a harness downstream.

pub mod port;
pub mod reconnect;
pub mod scripted;

pub use port::{ChannelPort, ConversationInfo, FileUpload};
pub use reconnect::{ChannelStreams, ReconnectPolicy, ReconnectTracker};
pub use scripted::ScriptedChannel;
