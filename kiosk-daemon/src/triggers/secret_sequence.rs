//! Secret button sequence trigger
//!
//! Staff enter a fixed button sequence at the cabinet to start a test
//! session. Presses arrive over an mpsc channel, from the HTTP input endpoint
//! or the gamepad thread.

use super::{SessionProposal, SessionProposer};
use crate::config::TriggersConfig;
use crate::error::{Error, Result};
use kiosk_common::events::TriggerSource;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Buffered presses waiting for the detector
pub const INPUT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputButton {
    Up,
    Down,
    Left,
    Right,
    A,
    B,
    Start,
    Select,
}

impl FromStr for InputButton {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(InputButton::Up),
            "down" => Ok(InputButton::Down),
            "left" => Ok(InputButton::Left),
            "right" => Ok(InputButton::Right),
            "a" => Ok(InputButton::A),
            "b" => Ok(InputButton::B),
            "start" => Ok(InputButton::Start),
            "select" => Ok(InputButton::Select),
            other => Err(Error::BadRequest(format!("unknown button {:?}", other))),
        }
    }
}

impl std::fmt::Display for InputButton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InputButton::Up => "up",
            InputButton::Down => "down",
            InputButton::Left => "left",
            InputButton::Right => "right",
            InputButton::A => "a",
            InputButton::B => "b",
            InputButton::Start => "start",
            InputButton::Select => "select",
        };
        write!(f, "{}", name)
    }
}

/// Parse a configured sequence
pub fn parse_sequence(names: &[String]) -> Result<Vec<InputButton>> {
    names.iter().map(|name| name.parse()).collect()
}

/// Matches the most recent presses against the configured sequence
///
/// Keeps a window of the last `sequence.len()` presses, so a stray press
/// before a correct entry does not spoil it. A gap longer than `timeout`
/// clears the window.
#[derive(Debug, Clone)]
pub struct SecretSequenceDetector {
    sequence: Vec<InputButton>,
    timeout: Duration,
    recent: VecDeque<InputButton>,
    last_input: Option<Instant>,
}

impl SecretSequenceDetector {
    pub fn new(sequence: Vec<InputButton>, timeout: Duration) -> Self {
        Self {
            recent: VecDeque::with_capacity(sequence.len()),
            sequence,
            timeout,
            last_input: None,
        }
    }

    pub fn from_config(triggers: &TriggersConfig) -> Result<Self> {
        Ok(Self::new(
            parse_sequence(&triggers.secret_sequence)?,
            Duration::from_millis(triggers.secret_timeout_ms),
        ))
    }

    /// Feed one press; true when it completes the sequence
    pub fn feed(&mut self, button: InputButton, now: Instant) -> bool {
        if self.sequence.is_empty() {
            return false;
        }
        if let Some(last) = self.last_input {
            if now.saturating_duration_since(last) > self.timeout {
                debug!("Secret sequence timed out at step {}", self.progress());
                self.recent.clear();
            }
        }
        self.last_input = Some(now);

        if self.recent.len() == self.sequence.len() {
            self.recent.pop_front();
        }
        self.recent.push_back(button);

        if self.recent.iter().eq(self.sequence.iter()) {
            self.reset();
            return true;
        }
        false
    }

    /// Length of the longest run of recent presses that starts the sequence
    pub fn progress(&self) -> usize {
        let max = self.recent.len().min(self.sequence.len());
        (1..=max)
            .rev()
            .find(|&n| {
                self.recent
                    .iter()
                    .skip(self.recent.len() - n)
                    .eq(self.sequence[..n].iter())
            })
            .unwrap_or(0)
    }

    pub fn reset(&mut self) {
        self.recent.clear();
        self.last_input = None;
    }
}

/// Run the detector over `inputs` until shutdown or the channel closes
pub fn spawn_listener(
    mut detector: SecretSequenceDetector,
    player: String,
    proposer: Arc<dyn SessionProposer>,
    mut inputs: mpsc::Receiver<InputButton>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Secret sequence listener started");
        loop {
            tokio::select! {
                input = inputs.recv() => {
                    let Some(button) = input else {
                        break;
                    };
                    if !detector.feed(button, Instant::now()) {
                        continue;
                    }

                    info!("Secret sequence entered, proposing session for {}", player);
                    let proposal = SessionProposal::new(player.clone(), TriggerSource::SecretSequence);
                    let proposer = Arc::clone(&proposer);
                    match tokio::task::spawn_blocking(move || proposer.propose_session(&proposal)).await {
                        Ok(outcome) => debug!("Secret sequence proposal: {:?}", outcome),
                        Err(e) => error!("Secret sequence proposal task failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Secret sequence listener stopped");
    })
}
