//! Session-related type definitions
//!
//! Supporting types for the session lifecycle and trigger provenance.

use serde::{Deserialize, Serialize};

/// Kiosk session state
///
/// Exactly one state holds at any time. `Starting` and `Running` imply an
/// active player; `Running` additionally implies a live game process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Attract loop playing, no player
    #[default]
    Idle,
    /// Game launch in progress
    Starting,
    /// Game process owns display and input
    Running,
    /// Game exited, grace delay before returning to idle
    Finished,
}

impl SessionState {
    /// True while the game side owns the display (Starting or Running)
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Running)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Starting => write!(f, "starting"),
            SessionState::Running => write!(f, "running"),
            SessionState::Finished => write!(f, "finished"),
        }
    }
}

/// Where a session proposal came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// Remote command over the command bus
    CommandBus,
    /// Secret button sequence entered at the cabinet
    SecretSequence,
    /// Single-shot file dropped into the trigger location
    DropFile,
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerSource::CommandBus => write!(f, "command_bus"),
            TriggerSource::SecretSequence => write!(f, "secret_sequence"),
            TriggerSource::DropFile => write!(f, "drop_file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_serializes_lowercase() {
        let json = serde_json::to_string(&SessionState::Running).unwrap();
        assert_eq!(json, "\"running\"");

        let parsed: SessionState = serde_json::from_str("\"finished\"").unwrap();
        assert_eq!(parsed, SessionState::Finished);
    }

    #[test]
    fn test_only_starting_and_running_are_active() {
        assert!(!SessionState::Idle.is_active());
        assert!(SessionState::Starting.is_active());
        assert!(SessionState::Running.is_active());
        assert!(!SessionState::Finished.is_active());
    }

    #[test]
    fn test_trigger_source_display_matches_serde() {
        for source in [
            TriggerSource::CommandBus,
            TriggerSource::SecretSequence,
            TriggerSource::DropFile,
        ] {
            let json = serde_json::to_string(&source).unwrap();
            assert_eq!(json, format!("\"{}\"", source));
        }
    }
}
