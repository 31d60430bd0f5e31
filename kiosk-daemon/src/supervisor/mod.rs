//! Process Supervisor
//!
//! Launches the external game process, gives every launch its own monitor
//! thread, and escalates stop requests from a graceful signal to a kill.
//! There is exactly one process slot; the orchestrator guarantees at most one
//! launch is live at a time.

mod launch;
mod process;

pub use launch::{LaunchOverrides, LaunchParams, PLAYER_ENV, SESSION_ENV};
pub use process::{exit_code_of, ExitCallback, ExitReport, ProcessHandle, UNKNOWN_EXIT_CODE};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Escalation timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Wait after the graceful signal before killing
    pub stop_grace_timeout: Duration,
    /// Wait after the kill before giving up
    pub kill_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_grace_timeout: Duration::from_secs(5),
            kill_timeout: Duration::from_secs(2),
        }
    }
}

impl From<&SessionConfig> for SupervisorConfig {
    fn from(session: &SessionConfig) -> Self {
        Self {
            stop_grace_timeout: session.stop_grace_timeout(),
            kill_timeout: session.kill_timeout(),
        }
    }
}

/// Launches and supervises the game process
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    /// Monitor threads not yet joined
    monitors: Mutex<Vec<JoinHandle<()>>>,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            monitors: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> SupervisorConfig {
        self.config
    }

    /// Spawn the game for `player` and start its monitor thread
    ///
    /// `on_exit` runs on the monitor thread exactly once, after the process
    /// has been reaped. It is never called if the spawn itself fails.
    pub fn launch(
        &self,
        player: &str,
        session_id: Uuid,
        params: &LaunchParams,
        on_exit: ExitCallback,
    ) -> Result<ProcessHandle> {
        let program = params.executable.display().to_string();
        let mut cmd = params.build_command(player, session_id);

        debug!("Launching {} with args {:?}", program, params.build_args(player));

        let child = cmd.spawn().map_err(|source| Error::Spawn {
            program: program.clone(),
            source,
        })?;

        let handle = ProcessHandle::new(child, session_id, player);
        info!(
            "Launched {} for {} (pid {}, session {})",
            program,
            player,
            handle.pid(),
            session_id
        );

        let monitor_handle = handle.clone();
        let spawned = thread::Builder::new()
            .name(format!("game-monitor-{}", handle.pid()))
            .spawn(move || monitor_handle.monitor(on_exit));

        match spawned {
            Ok(join) => {
                let mut monitors = self.monitors.lock().unwrap();
                monitors.retain(|m| !m.is_finished());
                monitors.push(join);
                Ok(handle)
            }
            Err(e) => {
                // Without a monitor nobody would ever report the exit
                error!("Failed to start monitor thread: {}", e);
                handle.kill_and_reap();
                Err(Error::Process(format!("failed to start monitor thread: {}", e)))
            }
        }
    }

    /// Stop the process: graceful signal, bounded wait, kill, bounded wait
    ///
    /// Safe to call repeatedly and after the process has already exited.
    pub fn terminate(&self, handle: &ProcessHandle) -> Result<()> {
        handle.terminate(self.config.stop_grace_timeout, self.config.kill_timeout)
    }

    /// Number of monitor threads still running
    pub fn active_monitors(&self) -> usize {
        self.monitors
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !m.is_finished())
            .count()
    }

    /// Join every monitor thread
    ///
    /// Must not be called from a monitor thread or while holding locks an
    /// exit callback needs.
    pub fn join_monitors(&self) {
        let monitors: Vec<_> = std::mem::take(&mut *self.monitors.lock().unwrap());
        for join in monitors {
            if let Err(e) = join.join() {
                error!("Game monitor thread panicked: {:?}", e);
            }
        }
    }
}
