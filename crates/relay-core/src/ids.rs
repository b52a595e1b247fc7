//! Id generation for runtime instances and sessions.

use uuid::Uuid;

/// Per-process runtime instance id, used as the idempotency lock holder.
pub fn new_instance_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}
