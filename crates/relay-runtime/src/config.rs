//! Runtime configuration.

use std::time::Duration;

use relay_idempotency::IdempotencyConfig;
use relay_policy::ChannelPolicy;
use relay_session::SessionStoreConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// How the inner processor answers events when no custom
/// `MessageProcessor` is configured.
pub enum ProcessingMode {
    /// Generate through the configured `ResponseGenerator`, executing
    /// tool calls between rounds.
    Llm,
    /// Parse `<tool> <args…>` from the event text and run it through the
    /// `ToolProvider`.
    DirectTool,
    /// Produce no response; the embedding application handles replies.
    #[default]
    Custom,
}

impl ProcessingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::DirectTool => "direct_tool",
            Self::Custom => "custom",
        }
    }
}

#[derive(Clone)]
pub struct RuntimeConfig {
    pub default_mode: ProcessingMode,
    pub policy: ChannelPolicy,
    /// `None` disables the idempotency guard entirely.
    pub idempotency: Option<IdempotencyConfig>,
    pub session: SessionStoreConfig,
    /// Bound on draining in-flight pipelines during `stop`.
    pub shutdown_grace: Duration,
    /// Capacity of the `events`/`responses`/`errors` broadcast streams.
    pub stream_capacity: usize,
    /// Ceiling on generator↔tool roundtrips per event in `llm` mode.
    pub max_tool_rounds: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl RuntimeConfig {
    pub fn with_defaults() -> Self {
        Self {
            default_mode: ProcessingMode::default(),
            policy: ChannelPolicy::default(),
            idempotency: Some(IdempotencyConfig::default()),
            session: SessionStoreConfig::default(),
            shutdown_grace: Duration::from_secs(5),
            stream_capacity: 256,
            max_tool_rounds: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ProcessingMode, RuntimeConfig};

    #[test]
    fn unit_defaults_enable_the_guard_and_bound_shutdown() {
        let config = RuntimeConfig::with_defaults();
        assert!(config.idempotency.is_some());
        assert!(config.shutdown_grace.as_millis() > 0);
        assert!(config.stream_capacity > 0);
        assert_eq!(config.default_mode, ProcessingMode::Custom);
        assert_eq!(config.default_mode.as_str(), "custom");
    }
}
