//! Reconnection bookkeeping and the broadcast stream pair adapters
//! publish through.
//!
//! The tracker is deliberately transport-agnostic: it only decides
//! *whether* and *after how long* the adapter should reconnect; the
//! adapter owns the actual transport work. Events arriving while
//! disconnected are platform-dependent and not buffered here.

use std::time::Duration;

use tokio::sync::broadcast;

use relay_envelope::{ChannelEvent, ConnectionState};

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
/// Counts reconnect attempts against the policy. A successful connection
/// resets the counter.
pub struct ReconnectTracker {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectTracker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Decide what follows a disconnect or non-fatal error:
    /// `Some(delay)` means schedule a reconnect after `delay` and report
    /// `reconnecting`; `None` means give up and report `failed`.
    pub fn on_disconnect(&mut self) -> Option<Duration> {
        if self.policy.auto_reconnect && self.attempts < self.policy.max_reconnect_attempts {
            self.attempts += 1;
            tracing::debug!(
                attempt = self.attempts,
                max = self.policy.max_reconnect_attempts,
                "scheduling reconnect"
            );
            Some(self.policy.reconnect_delay)
        } else {
            None
        }
    }

    pub fn on_connected(&mut self) {
        self.attempts = 0;
    }
}

#[derive(Debug, Clone)]
/// The broadcast pair backing `ChannelPort::subscribe_events` and
/// `subscribe_connection_state`. Publishing with no subscribers drops the
/// value; the gateway operates fine unobserved.
pub struct ChannelStreams {
    events_tx: broadcast::Sender<ChannelEvent>,
    state_tx: broadcast::Sender<ConnectionState>,
}

impl ChannelStreams {
    pub fn new(capacity: usize) -> Self {
        let (events_tx, _) = broadcast::channel(capacity.max(1));
        let (state_tx, _) = broadcast::channel(capacity.max(1));
        Self { events_tx, state_tx }
    }

    pub fn publish_event(&self, event: ChannelEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn publish_connection_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events_tx.subscribe()
    }

    pub fn subscribe_connection_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relay_envelope::{ChannelEvent, ChannelIdentity, ConnectionState, ConversationKey};

    use super::{ChannelStreams, ReconnectPolicy, ReconnectTracker};

    #[test]
    fn unit_tracker_schedules_until_the_attempt_budget_is_spent() {
        let mut tracker = ReconnectTracker::new(ReconnectPolicy {
            auto_reconnect: true,
            max_reconnect_attempts: 2,
            reconnect_delay: Duration::from_millis(100),
        });
        assert_eq!(tracker.on_disconnect(), Some(Duration::from_millis(100)));
        assert_eq!(tracker.on_disconnect(), Some(Duration::from_millis(100)));
        assert_eq!(tracker.on_disconnect(), None);
        assert_eq!(tracker.attempts(), 2);
    }

    #[test]
    fn unit_successful_connection_resets_the_counter() {
        let mut tracker = ReconnectTracker::new(ReconnectPolicy {
            max_reconnect_attempts: 1,
            ..ReconnectPolicy::default()
        });
        assert!(tracker.on_disconnect().is_some());
        assert!(tracker.on_disconnect().is_none());
        tracker.on_connected();
        assert_eq!(tracker.attempts(), 0);
        assert!(tracker.on_disconnect().is_some());
    }

    #[test]
    fn unit_disabled_auto_reconnect_never_schedules() {
        let mut tracker = ReconnectTracker::new(ReconnectPolicy {
            auto_reconnect: false,
            ..ReconnectPolicy::default()
        });
        assert!(tracker.on_disconnect().is_none());
    }

    #[tokio::test]
    async fn functional_streams_broadcast_to_all_live_subscribers_only() {
        let streams = ChannelStreams::new(8);

        // Published with no subscribers: dropped, not buffered.
        streams.publish_connection_state(ConnectionState::Connecting);

        let mut first = streams.subscribe_connection_state();
        let mut second = streams.subscribe_connection_state();
        streams.publish_connection_state(ConnectionState::Connected);
        assert_eq!(first.recv().await.expect("first"), ConnectionState::Connected);
        assert_eq!(second.recv().await.expect("second"), ConnectionState::Connected);

        let mut events = streams.subscribe_events();
        let event = ChannelEvent::text_message(
            "evt-1",
            ConversationKey::new("slack", "T1", "C1"),
            ChannelIdentity::new("slack", "U1"),
            1,
            "hello",
        );
        streams.publish_event(event.clone());
        assert_eq!(events.recv().await.expect("event"), event);
    }
}
