//! Event types for the kiosk event system
//!
//! Provides shared event definitions and the EventBus used to fan session
//! notifications out to SSE clients and other async listeners.

mod session_types;

pub use session_types::{SessionState, TriggerSource};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Kiosk event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
/// Field names are camelCase on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KioskEvent {
    /// Session state machine moved to a new state
    ///
    /// Emitted once per transition, in transition order. `sequence` is
    /// strictly increasing so listeners can detect gaps after lagging.
    #[serde(rename_all = "camelCase")]
    SessionStateChanged {
        /// State before the transition
        previous_state: SessionState,
        /// State after the transition
        new_state: SessionState,
        /// Active player after the transition (retained through Finished)
        player: Option<String>,
        /// Session the transition belongs to
        session_id: Option<Uuid>,
        /// Raw game exit code (only on entering Finished)
        exit_code: Option<i32>,
        /// Transition counter
        sequence: u64,
        /// When the transition happened
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A session proposal arrived while the kiosk was not idle
    #[serde(rename_all = "camelCase")]
    SessionRejected {
        /// Player that was proposed
        player: String,
        /// Trigger that made the proposal
        source: TriggerSource,
        /// State at the time of rejection
        state: SessionState,
        /// When the proposal was rejected
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Command bus message with an unrecognized verb
    #[serde(rename_all = "camelCase")]
    CommandIgnored {
        /// Verb as received
        verb: String,
        /// When the command arrived
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Point-in-time status, published in answer to a status command
    #[serde(rename_all = "camelCase")]
    StatusSnapshot {
        /// Current session state
        state: SessionState,
        /// Current player, if any
        player: Option<String>,
        /// Active decode strategy name, if the pipeline is running
        strategy: Option<String>,
        /// When the snapshot was taken
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl KioskEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            KioskEvent::SessionStateChanged { .. } => "SessionStateChanged",
            KioskEvent::SessionRejected { .. } => "SessionRejected",
            KioskEvent::CommandIgnored { .. } => "CommandIgnored",
            KioskEvent::StatusSnapshot { .. } => "StatusSnapshot",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// Wraps `tokio::sync::broadcast`:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use kiosk_common::events::{EventBus, KioskEvent, SessionState};
///
/// let event_bus = EventBus::new(100);
/// let _rx = event_bus.subscribe();
///
/// event_bus.emit(KioskEvent::SessionStateChanged {
///     previous_state: SessionState::Idle,
///     new_state: SessionState::Starting,
///     player: Some("ada".to_string()),
///     session_id: None,
///     exit_code: None,
///     sequence: 1,
///     timestamp: chrono::Utc::now(),
/// }).ok();
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<KioskEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<KioskEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: KioskEvent,
    ) -> Result<usize, broadcast::error::SendError<KioskEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: KioskEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_changed(previous: SessionState, new: SessionState, sequence: u64) -> KioskEvent {
        KioskEvent::SessionStateChanged {
            previous_state: previous,
            new_state: new,
            player: Some("ada".to_string()),
            session_id: Some(Uuid::new_v4()),
            exit_code: None,
            sequence,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.emit(state_changed(SessionState::Idle, SessionState::Starting, 1)).is_err());

        // Lossy emit never fails
        bus.emit_lossy(state_changed(SessionState::Idle, SessionState::Starting, 2));
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        assert_eq!(bus.emit(state_changed(SessionState::Idle, SessionState::Starting, 1)).unwrap(), 1);
        bus.emit(state_changed(SessionState::Starting, SessionState::Running, 2)).unwrap();

        match rx.recv().await.unwrap() {
            KioskEvent::SessionStateChanged { sequence, new_state, .. } => {
                assert_eq!(sequence, 1);
                assert_eq!(new_state, SessionState::Starting);
            }
            other => panic!("unexpected event {:?}", other),
        }
        match rx.recv().await.unwrap() {
            KioskEvent::SessionStateChanged { sequence, .. } => assert_eq!(sequence, 2),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_state_changed_wire_format() {
        let event = state_changed(SessionState::Running, SessionState::Finished, 7);
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "SessionStateChanged");
        assert_eq!(value["previousState"], "running");
        assert_eq!(value["newState"], "finished");
        assert_eq!(value["player"], "ada");
        assert_eq!(value["sequence"], 7);
        assert!(value.get("timestamp").is_some());
        assert_eq!(event.event_type(), "SessionStateChanged");
    }

    #[test]
    fn test_capacity_reported() {
        let bus = EventBus::new(42);
        assert_eq!(bus.capacity(), 42);
        let _rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
    }
}
