//! Filesystem drop-trigger
//!
//! A collaborator writes `{"player": "..."}` to a known path; the poller
//! consumes (deletes) the file and proposes a session. The file is
//! single-shot: it is deleted whether or not the proposal is accepted, and a
//! malformed file is deleted too so it is not re-read on every poll.

use super::{SessionProposal, SessionProposer};
use crate::session::RequestOutcome;
use kiosk_common::events::TriggerSource;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
struct DropPayload {
    #[serde(alias = "player_name")]
    player: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    NoFile,
    Malformed,
    Proposed(RequestOutcome),
}

pub struct DropFilePoller {
    path: PathBuf,
    proposer: Arc<dyn SessionProposer>,
}

impl DropFilePoller {
    pub fn new(path: impl Into<PathBuf>, proposer: Arc<dyn SessionProposer>) -> Self {
        Self {
            path: path.into(),
            proposer,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check the drop location once (blocking)
    pub fn poll_once(&self) -> PollResult {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return PollResult::NoFile,
            Err(e) => {
                warn!("Failed to read drop file {}: {}", self.path.display(), e);
                return PollResult::NoFile;
            }
        };

        // Consume before proposing: a launch takes a while and the next poll must not see this file
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to delete drop file {}: {}", self.path.display(), e);
        }

        let payload: DropPayload = match serde_json::from_str(&contents) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Discarding malformed drop file {}: {}", self.path.display(), e);
                return PollResult::Malformed;
            }
        };

        info!("Drop file requests a session for {}", payload.player);
        let outcome = self
            .proposer
            .propose_session(&SessionProposal::new(payload.player, TriggerSource::DropFile));
        PollResult::Proposed(outcome)
    }

    /// Poll every `interval` until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Watching {} for drop-file triggers every {:?}",
            self.path.display(),
            interval
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let poller = Arc::clone(&self);
                    match tokio::task::spawn_blocking(move || poller.poll_once()).await {
                        Ok(PollResult::NoFile) => {}
                        Ok(result) => debug!("Drop file poll: {:?}", result),
                        Err(e) => error!("Drop file poll task failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Drop file poller stopped");
    }
}
