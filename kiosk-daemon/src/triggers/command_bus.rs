//! Command bus adapter
//!
//! Translates `{ "verb": ..., "player": ..., "params": {...} }` intents into
//! orchestrator calls. Unknown verbs are logged, announced as
//! `CommandIgnored` and otherwise dropped.

use super::{SessionProposal, SessionProposer};
use crate::error::{Error, Result};
use crate::session::{RequestOutcome, SessionOrchestrator};
use crate::supervisor::LaunchOverrides;
use crate::video::DecodePipeline;
use kiosk_common::events::{EventBus, KioskEvent, SessionState, TriggerSource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Raw command as received
#[derive(Debug, Clone, Deserialize)]
pub struct CommandMessage {
    pub verb: String,
    #[serde(default, alias = "player_name")]
    pub player: Option<String>,
    #[serde(default)]
    pub params: Option<CommandParams>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandParams {
    pub skill: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Launch,
    Stop,
    Status,
    Unknown(String),
}

impl Verb {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "launch" | "launch_game" | "start_game" => Verb::Launch,
            "stop" | "stop_game" => Verb::Stop,
            "status" | "get_status" => Verb::Status,
            _ => Verb::Unknown(raw.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Accepted,
    /// Kiosk busy, try again later
    Rejected,
    LaunchFailed,
    InvalidPlayer,
    Stopped,
    NotRunning,
    Status,
    Ignored,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    pub status: CommandStatus,
    pub state: SessionState,
    pub player: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Stop and status access to the session state machine
pub trait SessionControl: Send + Sync {
    fn request_stop(&self) -> bool;
    fn current_state(&self) -> (SessionState, Option<String>);
}

impl SessionControl for SessionOrchestrator {
    fn request_stop(&self) -> bool {
        SessionOrchestrator::request_stop(self)
    }

    fn current_state(&self) -> (SessionState, Option<String>) {
        SessionOrchestrator::current_state(self)
    }
}

#[derive(Clone)]
pub struct CommandBus {
    proposer: Arc<dyn SessionProposer>,
    control: Arc<dyn SessionControl>,
    bus: EventBus,
    pipeline: Option<Arc<DecodePipeline>>,
}

impl CommandBus {
    pub fn new(proposer: Arc<dyn SessionProposer>, control: Arc<dyn SessionControl>, bus: EventBus) -> Self {
        Self {
            proposer,
            control,
            bus,
            pipeline: None,
        }
    }

    /// Report the active decode strategy in status answers
    pub fn with_pipeline(mut self, pipeline: Arc<DecodePipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub async fn handle(&self, message: CommandMessage) -> Result<CommandResponse> {
        match Verb::parse(&message.verb) {
            Verb::Launch => self.launch(message).await,
            Verb::Stop => {
                let control = Arc::clone(&self.control);
                let stopped = tokio::task::spawn_blocking(move || control.request_stop())
                    .await
                    .map_err(|e| Error::Internal(format!("stop task failed: {}", e)))?;
                Ok(self.respond(if stopped {
                    CommandStatus::Stopped
                } else {
                    CommandStatus::NotRunning
                }))
            }
            Verb::Status => {
                let response = self.respond(CommandStatus::Status);
                self.bus.emit_lossy(KioskEvent::StatusSnapshot {
                    state: response.state,
                    player: response.player.clone(),
                    strategy: response.strategy.clone(),
                    timestamp: chrono::Utc::now(),
                });
                Ok(response)
            }
            Verb::Unknown(verb) => {
                warn!("Ignoring command with unknown verb {:?}", verb);
                self.bus.emit_lossy(KioskEvent::CommandIgnored {
                    verb: verb.clone(),
                    timestamp: chrono::Utc::now(),
                });
                let mut response = self.respond(CommandStatus::Ignored);
                response.message = Some(format!("unknown verb {:?}", verb));
                Ok(response)
            }
        }
    }

    async fn launch(&self, message: CommandMessage) -> Result<CommandResponse> {
        let Some(player) = message.player.filter(|p| !p.trim().is_empty()) else {
            warn!("Launch command without a player");
            let mut response = self.respond(CommandStatus::InvalidPlayer);
            response.message = Some("player is required".to_string());
            return Ok(response);
        };

        let overrides = LaunchOverrides {
            skill: message.params.and_then(|p| p.skill),
        };
        let proposal = SessionProposal::new(player, TriggerSource::CommandBus).with_overrides(overrides);
        let proposer = Arc::clone(&self.proposer);
        let outcome = tokio::task::spawn_blocking(move || proposer.propose_session(&proposal))
            .await
            .map_err(|e| Error::Internal(format!("launch task failed: {}", e)))?;

        info!("Launch command outcome: {:?}", outcome);
        let mut response = self.respond(match outcome {
            RequestOutcome::Started { .. } => CommandStatus::Accepted,
            RequestOutcome::Busy(_) | RequestOutcome::ShuttingDown => CommandStatus::Rejected,
            RequestOutcome::InvalidPlayer => CommandStatus::InvalidPlayer,
            RequestOutcome::LaunchFailed => CommandStatus::LaunchFailed,
        });
        if response.status == CommandStatus::Rejected {
            response.message = Some("busy, try again".to_string());
        }
        Ok(response)
    }

    fn respond(&self, status: CommandStatus) -> CommandResponse {
        let (state, player) = self.control.current_state();
        CommandResponse {
            status,
            state,
            player,
            strategy: self
                .pipeline
                .as_ref()
                .and_then(|p| p.active_strategy())
                .map(|kind| kind.to_string()),
            message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::testing::RecordingProposer;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeControl {
        running: AtomicBool,
    }

    impl SessionControl for FakeControl {
        fn request_stop(&self) -> bool {
            self.running.swap(false, Ordering::SeqCst)
        }

        fn current_state(&self) -> (SessionState, Option<String>) {
            if self.running.load(Ordering::SeqCst) {
                (SessionState::Running, Some("ada".to_string()))
            } else {
                (SessionState::Idle, None)
            }
        }
    }

    fn command_bus(proposer: Arc<RecordingProposer>, running: bool) -> (CommandBus, EventBus) {
        let bus = EventBus::new(10);
        let control = Arc::new(FakeControl {
            running: AtomicBool::new(running),
        });
        (CommandBus::new(proposer, control, bus.clone()), bus)
    }

    fn message(json: &str) -> CommandMessage {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_verb_aliases() {
        assert_eq!(Verb::parse("launch"), Verb::Launch);
        assert_eq!(Verb::parse("start_game"), Verb::Launch);
        assert_eq!(Verb::parse("LAUNCH_GAME"), Verb::Launch);
        assert_eq!(Verb::parse("stop_game"), Verb::Stop);
        assert_eq!(Verb::parse("get_status"), Verb::Status);
        assert_eq!(Verb::parse("dance"), Verb::Unknown("dance".to_string()));
    }

    #[test]
    fn test_player_name_alias_and_params() {
        let msg = message(r#"{"verb":"launch","player_name":"ada","params":{"skill":4}}"#);
        assert_eq!(msg.player.as_deref(), Some("ada"));
        assert_eq!(msg.params.unwrap().skill, Some(4));
    }

    #[tokio::test]
    async fn test_launch_proposes_with_overrides() {
        let proposer = RecordingProposer::accepting();
        let (commands, _bus) = command_bus(Arc::clone(&proposer), false);

        let response = commands
            .handle(message(r#"{"verb":"launch","player":"Ada","params":{"skill":2}}"#))
            .await
            .unwrap();
        assert_eq!(response.status, CommandStatus::Accepted);

        let proposals = proposer.proposals.lock().unwrap();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].player, "Ada");
        assert_eq!(proposals[0].source, TriggerSource::CommandBus);
        assert_eq!(proposals[0].overrides.skill, Some(2));
    }

    #[tokio::test]
    async fn test_launch_without_player_never_proposes() {
        let proposer = RecordingProposer::accepting();
        let (commands, _bus) = command_bus(Arc::clone(&proposer), false);

        let response = commands.handle(message(r#"{"verb":"launch"}"#)).await.unwrap();
        assert_eq!(response.status, CommandStatus::InvalidPlayer);
        assert!(proposer.players().is_empty());
    }

    #[tokio::test]
    async fn test_busy_is_rejected() {
        let proposer = RecordingProposer::answering(RequestOutcome::Busy(SessionState::Running));
        let (commands, _bus) = command_bus(proposer, true);

        let response = commands.handle(message(r#"{"verb":"launch","player":"bob"}"#)).await.unwrap();
        assert_eq!(response.status, CommandStatus::Rejected);
        assert_eq!(response.state, SessionState::Running);
    }

    #[tokio::test]
    async fn test_stop_only_when_running() {
        let (commands, _bus) = command_bus(RecordingProposer::accepting(), true);
        let first = commands.handle(message(r#"{"verb":"stop"}"#)).await.unwrap();
        assert_eq!(first.status, CommandStatus::Stopped);
        let second = commands.handle(message(r#"{"verb":"stop"}"#)).await.unwrap();
        assert_eq!(second.status, CommandStatus::NotRunning);
    }

    #[tokio::test]
    async fn test_status_publishes_snapshot() {
        let (commands, bus) = command_bus(RecordingProposer::accepting(), true);
        let mut rx = bus.subscribe();

        let response = commands.handle(message(r#"{"verb":"status"}"#)).await.unwrap();
        assert_eq!(response.status, CommandStatus::Status);
        assert_eq!(response.player.as_deref(), Some("ada"));

        match rx.recv().await.unwrap() {
            KioskEvent::StatusSnapshot { state, .. } => assert_eq!(state, SessionState::Running),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_verb_ignored() {
        let proposer = RecordingProposer::accepting();
        let (commands, bus) = command_bus(Arc::clone(&proposer), false);
        let mut rx = bus.subscribe();

        let response = commands.handle(message(r#"{"verb":"explode","player":"x"}"#)).await.unwrap();
        assert_eq!(response.status, CommandStatus::Ignored);
        assert!(proposer.players().is_empty());
        assert!(matches!(
            rx.recv().await.unwrap(),
            KioskEvent::CommandIgnored { verb, .. } if verb == "explode"
        ));
    }
}
