//! Session Orchestrator
//!
//! Owns the kiosk state machine:
//!
//! ```text
//! Idle --request accepted--> Starting --spawned--> Running
//! Running --process exits--> Finished --grace delay--> Idle
//! Starting --spawn failure--> Idle
//! ```
//!
//! Every transition runs under the transition lock in three steps: write the
//! new state, perform its side effects, notify observers. The state mutex is
//! only ever held for the write itself, so snapshots stay cheap.

use super::observers::{Observer, ObserverRegistry, StateChange};
use super::BackgroundPlayback;
use crate::display::DisplaySurface;
use crate::supervisor::{ExitCallback, ExitReport, LaunchOverrides, LaunchParams, ProcessHandle, ProcessSupervisor};
use chrono::{DateTime, Utc};
use kiosk_common::events::SessionState;
use kiosk_common::player::sanitize_player_name;
use serde::Serialize;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long `request_stop` waits for the monitor to record the exit
const STOP_SETTLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of a session request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Game spawned; state is Running (or already past it)
    Started { session_id: Uuid },
    /// Kiosk was not idle
    Busy(SessionState),
    /// Player name had no usable characters
    InvalidPlayer,
    /// Spawn failed; state rolled back to Idle
    LaunchFailed,
    ShuttingDown,
}

impl RequestOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, RequestOutcome::Started { .. })
    }
}

/// Consistent view of the state machine
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub player: Option<String>,
    pub session_id: Option<Uuid>,
    pub pid: Option<u32>,
    pub last_exit_code: Option<i32>,
    pub sequence: u64,
    /// When the current state was entered
    pub since: DateTime<Utc>,
}

struct SessionSlot {
    state: SessionState,
    player: Option<String>,
    session_id: Option<Uuid>,
    handle: Option<ProcessHandle>,
    last_exit_code: Option<i32>,
    sequence: u64,
    since: DateTime<Utc>,
    shutting_down: bool,
}

pub struct SessionOrchestrator {
    slot: Mutex<SessionSlot>,
    /// Signalled on every state write and on shutdown
    state_changed: Condvar,
    /// Linearizes write, effects and notify across transitions
    transition_lock: Mutex<()>,
    observers: ObserverRegistry,
    supervisor: Arc<ProcessSupervisor>,
    playback: Arc<dyn BackgroundPlayback>,
    display: Arc<dyn DisplaySurface>,
    launch_defaults: LaunchParams,
    grace_delay: Duration,
    this: Weak<SessionOrchestrator>,
}

impl SessionOrchestrator {
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        playback: Arc<dyn BackgroundPlayback>,
        display: Arc<dyn DisplaySurface>,
        launch_defaults: LaunchParams,
        grace_delay: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            slot: Mutex::new(SessionSlot {
                state: SessionState::Idle,
                player: None,
                session_id: None,
                handle: None,
                last_exit_code: None,
                sequence: 0,
                since: Utc::now(),
                shutting_down: false,
            }),
            state_changed: Condvar::new(),
            transition_lock: Mutex::new(()),
            observers: ObserverRegistry::new(),
            supervisor,
            playback,
            display,
            launch_defaults,
            grace_delay,
            this: this.clone(),
        })
    }

    /// Propose a session with default launch parameters
    ///
    /// True only if the game was spawned.
    pub fn request_session(&self, player: &str) -> bool {
        self.request_session_with(player, &LaunchOverrides::default())
            .is_started()
    }

    /// Propose a session; accepted only from Idle, never queued
    pub fn request_session_with(&self, player: &str, overrides: &LaunchOverrides) -> RequestOutcome {
        let player = match sanitize_player_name(player) {
            Ok(player) => player,
            Err(e) => {
                warn!("Session request rejected: {}", e);
                return RequestOutcome::InvalidPlayer;
            }
        };

        if let Some(outcome) = self.check_idle(&self.slot.lock().unwrap(), &player) {
            return outcome;
        }

        let _transition = self.transition_lock.lock().unwrap();
        // Another request may have won while we waited for the transition lock
        if let Some(outcome) = self.check_idle(&self.slot.lock().unwrap(), &player) {
            return outcome;
        }

        let session_id = Uuid::new_v4();
        self.apply(SessionState::Starting, None, |slot| {
            slot.player = Some(player.clone());
            slot.session_id = Some(session_id);
        });

        // Shutdown may have begun while Starting side effects ran
        if self.slot.lock().unwrap().shutting_down {
            info!("Shutdown began during launch for {}, not spawning", player);
            self.apply(SessionState::Idle, None, |slot| {
                slot.player = None;
                slot.session_id = None;
            });
            return RequestOutcome::ShuttingDown;
        }

        let params = self.launch_defaults.with_overrides(overrides);
        let this = self.this.clone();
        let on_exit: ExitCallback = Box::new(move |report| match this.upgrade() {
            Some(orchestrator) => orchestrator.on_process_exit(report),
            None => debug!("Orchestrator gone, dropping exit of session {}", report.session_id),
        });

        match self.supervisor.launch(&player, session_id, &params, on_exit) {
            Ok(handle) => {
                self.apply(SessionState::Running, None, |slot| {
                    slot.handle = Some(handle);
                });
                RequestOutcome::Started { session_id }
            }
            Err(e) => {
                error!("Failed to launch game for {}: {}", player, e);
                self.apply(SessionState::Idle, None, |slot| {
                    slot.player = None;
                    slot.session_id = None;
                    slot.handle = None;
                });
                RequestOutcome::LaunchFailed
            }
        }
    }

    fn check_idle(&self, slot: &SessionSlot, player: &str) -> Option<RequestOutcome> {
        if slot.shutting_down {
            info!("Session request for {} rejected: shutting down", player);
            return Some(RequestOutcome::ShuttingDown);
        }
        if slot.state != SessionState::Idle {
            info!(
                "Session request for {} rejected: kiosk is {} ({})",
                player,
                slot.state,
                slot.player.as_deref().unwrap_or("-")
            );
            return Some(RequestOutcome::Busy(slot.state));
        }
        None
    }

    /// Stop the running game with the graceful-then-forceful escalation
    ///
    /// False if no game is running.
    pub fn request_stop(&self) -> bool {
        let handle = {
            // Starting is never observable here: launches hold the transition lock
            let _transition = self.transition_lock.lock().unwrap();
            let slot = self.slot.lock().unwrap();
            match (slot.state, slot.handle.as_ref()) {
                (SessionState::Running, Some(handle)) => handle.clone(),
                (state, _) => {
                    debug!("Stop request ignored in state {}", state);
                    return false;
                }
            }
        };

        info!("Stopping game for {} (pid {})", handle.player(), handle.pid());
        if let Err(e) = self.supervisor.terminate(&handle) {
            error!("Failed to stop game pid {}: {}", handle.pid(), e);
        }

        let session_id = handle.session_id();
        self.wait_until(STOP_SETTLE_TIMEOUT, |slot| {
            slot.session_id != Some(session_id) || slot.state != SessionState::Running
        });
        true
    }

    pub fn current_state(&self) -> (SessionState, Option<String>) {
        let slot = self.slot.lock().unwrap();
        (slot.state, slot.player.clone())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let slot = self.slot.lock().unwrap();
        SessionSnapshot {
            state: slot.state,
            player: slot.player.clone(),
            session_id: slot.session_id,
            pid: slot.handle.as_ref().map(|h| h.pid()),
            last_exit_code: slot.last_exit_code,
            sequence: slot.sequence,
            since: slot.since,
        }
    }

    /// Register an observer; there is no unsubscribe
    pub fn subscribe(&self, observer: Observer) {
        self.observers.register(observer);
    }

    /// Block until the state machine reaches `state`
    pub fn wait_for_state(&self, state: SessionState, timeout: Duration) -> bool {
        self.wait_until(timeout, |slot| slot.state == state)
    }

    fn wait_until(&self, timeout: Duration, done: impl Fn(&SessionSlot) -> bool) -> bool {
        let slot = self.slot.lock().unwrap();
        let (slot, _) = self
            .state_changed
            .wait_timeout_while(slot, timeout, |slot| !done(slot))
            .unwrap();
        done(&slot)
    }

    /// Terminate any game, join monitor threads and stop playback
    ///
    /// Later session requests are rejected. A launch already past its
    /// busy check either backs out before spawning or finishes spawning
    /// first, so its game is stopped here as well.
    pub fn shutdown(&self) {
        {
            let mut slot = self.slot.lock().unwrap();
            slot.shutting_down = true;
            self.state_changed.notify_all();
        }

        // Wait out any launch in flight so its process is seen here
        let handle = {
            let _transition = self.transition_lock.lock().unwrap();
            self.slot.lock().unwrap().handle.clone()
        };

        if let Some(handle) = handle {
            info!("Shutdown: stopping game pid {}", handle.pid());
            if let Err(e) = self.supervisor.terminate(&handle) {
                error!("Failed to stop game pid {} during shutdown: {}", handle.pid(), e);
            }
        }

        self.supervisor.join_monitors();
        self.playback.suspend();
        info!("Session orchestrator shut down");
    }

    /// Exit callback, runs on the monitor thread
    fn on_process_exit(&self, report: ExitReport) {
        {
            let _transition = self.transition_lock.lock().unwrap();
            if !self.is_current(&report.session_id, SessionState::Running) {
                debug!("Ignoring exit of stale session {}", report.session_id);
                return;
            }
            info!(
                "Game pid {} exited with code {} after {:.1}s{}",
                report.pid,
                report.exit_code,
                report.runtime.as_secs_f64(),
                if report.stop_requested { " (stop requested)" } else { "" }
            );
            self.apply(SessionState::Finished, Some(report.exit_code), |slot| {
                slot.handle = None;
                slot.last_exit_code = Some(report.exit_code);
            });
        }

        // Let the game release display and audio before playback restarts
        {
            let slot = self.slot.lock().unwrap();
            let _ = self
                .state_changed
                .wait_timeout_while(slot, self.grace_delay, |slot| !slot.shutting_down)
                .unwrap();
        }

        let _transition = self.transition_lock.lock().unwrap();
        if !self.is_current(&report.session_id, SessionState::Finished) {
            return;
        }
        self.apply(SessionState::Idle, None, |slot| {
            slot.player = None;
            slot.session_id = None;
        });
    }

    fn is_current(&self, session_id: &Uuid, state: SessionState) -> bool {
        let slot = self.slot.lock().unwrap();
        slot.state == state && slot.session_id.as_ref() == Some(session_id)
    }

    /// Write, side effects, notify. Caller holds the transition lock.
    fn apply(&self, new: SessionState, exit_code: Option<i32>, update: impl FnOnce(&mut SessionSlot)) {
        let (change, shutting_down) = {
            let mut slot = self.slot.lock().unwrap();
            let previous = slot.state;
            slot.state = new;
            update(&mut slot);
            slot.sequence += 1;
            slot.since = Utc::now();
            self.state_changed.notify_all();

            let change = StateChange {
                previous,
                new,
                player: slot.player.clone(),
                session_id: slot.session_id,
                exit_code,
                sequence: slot.sequence,
                timestamp: slot.since,
            };
            (change, slot.shutting_down)
        };

        info!(
            "Session state {} -> {} (player {})",
            change.previous,
            change.new,
            change.player.as_deref().unwrap_or("-")
        );

        match new {
            SessionState::Starting | SessionState::Running => {
                self.playback.suspend();
                self.display.set_visible(false);
            }
            SessionState::Idle if !shutting_down => {
                self.playback.resume();
                self.display.set_visible(true);
            }
            SessionState::Idle | SessionState::Finished => {}
        }

        self.observers.notify(&change);
    }
}
