//! State-change notifications

use chrono::{DateTime, Utc};
use kiosk_common::events::{EventBus, KioskEvent, SessionState};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// One state machine transition
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub previous: SessionState,
    pub new: SessionState,
    /// Player after the transition
    pub player: Option<String>,
    pub session_id: Option<Uuid>,
    /// Raw exit code, set on entering Finished
    pub exit_code: Option<i32>,
    /// Strictly increasing, starting at 1
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl StateChange {
    pub fn to_event(&self) -> KioskEvent {
        KioskEvent::SessionStateChanged {
            previous_state: self.previous,
            new_state: self.new,
            player: self.player.clone(),
            session_id: self.session_id,
            exit_code: self.exit_code,
            sequence: self.sequence,
            timestamp: self.timestamp,
        }
    }
}

/// Transition callback
///
/// Runs synchronously on the thread performing the transition, with the
/// transition lock held. Must be quick and must not call back into the
/// orchestrator.
pub type Observer = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Append-only observer list, notified in registration order
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<Observer>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Observer) {
        self.observers.write().unwrap().push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(&self, change: &StateChange) {
        let observers = self.observers.read().unwrap().clone();
        for observer in observers {
            observer(change);
        }
    }
}

/// Observer forwarding every transition to the event bus
pub fn event_bus_observer(bus: EventBus) -> Observer {
    Arc::new(move |change: &StateChange| {
        bus.emit_lossy(change.to_event());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn change(sequence: u64) -> StateChange {
        StateChange {
            previous: SessionState::Idle,
            new: SessionState::Starting,
            player: Some("ada".to_string()),
            session_id: None,
            exit_code: None,
            sequence,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_registration_order() {
        let registry = ObserverRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            let calls = Arc::clone(&calls);
            registry.register(Arc::new(move |c: &StateChange| {
                calls.lock().unwrap().push((id, c.sequence));
            }));
        }

        registry.notify(&change(1));
        registry.notify(&change(2));
        assert_eq!(
            *calls.lock().unwrap(),
            vec![(0, 1), (1, 1), (2, 1), (0, 2), (1, 2), (2, 2)]
        );
    }

    #[tokio::test]
    async fn test_event_bus_forwarding() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let registry = ObserverRegistry::new();
        registry.register(event_bus_observer(bus));

        registry.notify(&change(7));
        match rx.recv().await.unwrap() {
            KioskEvent::SessionStateChanged { new_state, sequence, player, .. } => {
                assert_eq!(new_state, SessionState::Starting);
                assert_eq!(sequence, 7);
                assert_eq!(player.as_deref(), Some("ada"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
