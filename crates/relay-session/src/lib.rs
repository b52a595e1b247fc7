//! Per-conversation session state for the relay gateway.
//!
//! A session carries the conversation's principal, free-form context, and
//! bounded message history. All mutation goes through the
//! [`SessionManager`], which applies copy-on-write updates and persists
//! through the [`SessionStore`]; no shared mutable session state escapes
//! the manager.

pub mod manager;
pub mod model;
pub mod store;

pub use manager::SessionManager;
pub use model::{MessageRole, Principal, Session, SessionMessage, SessionState, ToolCall};
pub use store::{MemorySessionStore, SessionStore, SessionStoreConfig};
