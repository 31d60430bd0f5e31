//! Trigger adapters
//!
//! Every trigger translates its own input into one call:
//! [`SessionProposer::propose_session`]. The orchestrator never knows which
//! trigger made a proposal; the source is only used for logging and for the
//! rejection event.
//!
//! - [`command_bus`]: JSON intents (`launch`/`stop`/`status`) over HTTP
//! - [`drop_file`]: single-shot JSON file polled on an interval
//! - [`secret_sequence`]: button sequence from the input endpoint or a gamepad

pub mod command_bus;
pub mod drop_file;
#[cfg(feature = "gamepad")]
pub mod gamepad;
pub mod secret_sequence;

use crate::session::{RequestOutcome, SessionOrchestrator};
use crate::supervisor::LaunchOverrides;
use kiosk_common::events::{EventBus, KioskEvent, SessionState, TriggerSource};
use std::sync::Arc;
use tracing::info;

/// A trigger's request to start a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProposal {
    pub player: String,
    pub source: TriggerSource,
    pub overrides: LaunchOverrides,
}

impl SessionProposal {
    pub fn new(player: impl Into<String>, source: TriggerSource) -> Self {
        Self {
            player: player.into(),
            source,
            overrides: LaunchOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: LaunchOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// The single contract between triggers and the orchestrator
///
/// Blocking: implementations may spawn the game process. Async callers run
/// it on the blocking pool.
pub trait SessionProposer: Send + Sync {
    fn propose_session(&self, proposal: &SessionProposal) -> RequestOutcome;
}

impl SessionProposer for SessionOrchestrator {
    fn propose_session(&self, proposal: &SessionProposal) -> RequestOutcome {
        info!("Session proposed for {} via {}", proposal.player, proposal.source);
        self.request_session_with(&proposal.player, &proposal.overrides)
    }
}

/// Proposer that reports busy rejections on the event bus
///
/// Triggers are handed this rather than the orchestrator so that every
/// source surfaces "busy, try again" the same way.
#[derive(Clone)]
pub struct EventingProposer {
    inner: Arc<dyn SessionProposer>,
    bus: EventBus,
}

impl EventingProposer {
    pub fn new(inner: Arc<dyn SessionProposer>, bus: EventBus) -> Self {
        Self { inner, bus }
    }
}

impl SessionProposer for EventingProposer {
    fn propose_session(&self, proposal: &SessionProposal) -> RequestOutcome {
        let outcome = self.inner.propose_session(proposal);
        let rejected_in = match outcome {
            RequestOutcome::Busy(state) => Some(state),
            RequestOutcome::ShuttingDown => Some(SessionState::Idle),
            _ => None,
        };
        if let Some(state) = rejected_in {
            self.bus.emit_lossy(KioskEvent::SessionRejected {
                player: proposal.player.clone(),
                source: proposal.source,
                state,
                timestamp: chrono::Utc::now(),
            });
        }
        outcome
    }
}
