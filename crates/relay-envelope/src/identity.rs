//! Actor identity.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
/// Identifies a user, bot, or system actor on a platform.
pub struct ChannelIdentity {
    pub platform: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl ChannelIdentity {
    pub fn new(platform: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            id: id.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Scope key for the per-user rate limiter bucket.
    pub fn scope_key(&self) -> String {
        format!("{}:{}", self.platform, self.id)
    }
}
