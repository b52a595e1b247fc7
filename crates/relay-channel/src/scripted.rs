//! In-memory scripted adapter.
//!
//! Replays injected events into its event stream and records every send.
//! Used by the runtime's integration tests; also a convenient harness for
//! downstream crates that want to exercise a pipeline without a real
//! platform connection.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;

use relay_core::ChannelError;
use relay_envelope::{
    ChannelCapabilities, ChannelEvent, ChannelResponse, ConnectionState, SendResult,
};

use crate::port::ChannelPort;
use crate::reconnect::ChannelStreams;

pub struct ScriptedChannel {
    platform: String,
    capabilities: ChannelCapabilities,
    streams: ChannelStreams,
    running: AtomicBool,
    sent: Mutex<Vec<ChannelResponse>>,
    send_failures: Mutex<VecDeque<ChannelError>>,
    message_counter: AtomicU64,
}

impl ScriptedChannel {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            capabilities: ChannelCapabilities::text_only(),
            streams: ChannelStreams::new(64),
            running: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            send_failures: Mutex::new(VecDeque::new()),
            message_counter: AtomicU64::new(0),
        }
    }

    pub fn with_capabilities(mut self, capabilities: ChannelCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Publish an event into the stream, as the platform would.
    pub fn emit(&self, event: ChannelEvent) {
        self.streams.publish_event(event);
    }

    /// Queue a failure for an upcoming `send`; failures are consumed in
    /// order before sends succeed again.
    pub fn fail_next_send(&self, error: ChannelError) {
        self.send_failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(error);
    }

    pub fn sent(&self) -> Vec<ChannelResponse> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl ChannelPort for ScriptedChannel {
    fn platform(&self) -> &str {
        &self.platform
    }

    fn capabilities(&self) -> ChannelCapabilities {
        self.capabilities.clone()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.streams.subscribe_events()
    }

    fn subscribe_connection_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.streams.subscribe_connection_state()
    }

    async fn start(&self) -> Result<(), ChannelError> {
        if !self.running.swap(true, Ordering::SeqCst) {
            self.streams
                .publish_connection_state(ConnectionState::Connected);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        if self.running.swap(false, Ordering::SeqCst) {
            self.streams
                .publish_connection_state(ConnectionState::Disconnected);
        }
        Ok(())
    }

    async fn send(&self, response: &ChannelResponse) -> SendResult {
        if !self.is_running() {
            return SendResult::failed(ChannelError::cancelled("send on stopped channel"));
        }
        if let Some(error) = self
            .send_failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
        {
            return SendResult::failed(error);
        }
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(response.clone());
        let id = self.message_counter.fetch_add(1, Ordering::SeqCst) + 1;
        SendResult::ok(format!("{}-m-{}", self.platform, id))
    }
}
