//! Foundational low-level utilities shared across relay crates.
//!
//! Provides the gateway-wide error taxonomy, unix-millisecond time helpers
//! used by record expiry and session bookkeeping, and id generation for
//! runtime instances and sessions.

pub mod error;
pub mod ids;
pub mod time_utils;

pub use error::{ChannelError, ErrorCode};
pub use ids::{new_instance_id, new_session_id};
pub use time_utils::{current_unix_timestamp_ms, is_expired_unix_ms};
