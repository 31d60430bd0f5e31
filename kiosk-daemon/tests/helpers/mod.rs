//! Test helpers for kioskd integration tests
//!
//! - RecordingPlayback / RecordingDisplay: count attract-loop hand-offs
//! - ScriptGame: shell scripts standing in for the game executable
//! - orchestrator(): a fully wired SessionOrchestrator with short timeouts

#![allow(dead_code)]

use kiosk_common::events::SessionState;
use kiosk_daemon::display::DisplaySurface;
use kiosk_daemon::session::{BackgroundPlayback, SessionOrchestrator, StateChange};
use kiosk_daemon::supervisor::{LaunchParams, ProcessSupervisor, SupervisorConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Grace delay used by test orchestrators
pub const TEST_GRACE: Duration = Duration::from_millis(100);

/// Generous upper bound for state waits
pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
pub struct RecordingPlayback {
    pub suspends: AtomicUsize,
    pub resumes: AtomicUsize,
    pub playing: AtomicBool,
    /// How long suspend() blocks, like a pipeline joining its decode threads
    suspend_delay: Duration,
}

impl RecordingPlayback {
    pub fn new() -> Arc<Self> {
        Self::with_suspend_delay(Duration::ZERO)
    }

    pub fn with_suspend_delay(delay: Duration) -> Arc<Self> {
        let playback = Self {
            suspend_delay: delay,
            ..Default::default()
        };
        playback.playing.store(true, Ordering::SeqCst);
        Arc::new(playback)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

impl BackgroundPlayback for RecordingPlayback {
    fn suspend(&self) {
        if !self.suspend_delay.is_zero() {
            std::thread::sleep(self.suspend_delay);
        }
        self.suspends.fetch_add(1, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        self.playing.store(true, Ordering::SeqCst);
    }
}

pub struct RecordingDisplay {
    visible: AtomicBool,
    pub changes: Mutex<Vec<bool>>,
}

impl RecordingDisplay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            visible: AtomicBool::new(true),
            changes: Mutex::new(Vec::new()),
        })
    }
}

impl DisplaySurface for RecordingDisplay {
    fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
        self.changes.lock().unwrap().push(visible);
    }

    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }
}

/// Shell scripts used as the game executable
pub struct ScriptGame {
    dir: TempDir,
}

impl ScriptGame {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Launch parameters running `body` under /bin/sh
    ///
    /// Generated game arguments land in the script's `$@` and are ignored.
    pub fn params(&self, name: &str, body: &str) -> LaunchParams {
        let path = self.write(name, body);
        let mut params = LaunchParams::for_executable("/bin/sh");
        params.base_args = vec![path.display().to_string()];
        params
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, body).unwrap();
        path
    }
}

pub struct Harness {
    pub orchestrator: Arc<SessionOrchestrator>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub playback: Arc<RecordingPlayback>,
    pub display: Arc<RecordingDisplay>,
    pub changes: Arc<Mutex<Vec<StateChange>>>,
}

impl Harness {
    pub fn states(&self) -> Vec<SessionState> {
        self.changes.lock().unwrap().iter().map(|c| c.new).collect()
    }

    /// Wait for the session to end and the grace delay to pass
    pub fn wait_idle(&self) -> bool {
        self.orchestrator.wait_for_state(SessionState::Idle, WAIT)
    }
}

/// Orchestrator wired to recording collaborators
pub fn orchestrator(params: LaunchParams) -> Harness {
    orchestrator_with(params, SupervisorConfig {
        stop_grace_timeout: Duration::from_millis(500),
        kill_timeout: Duration::from_secs(2),
    })
}

pub fn orchestrator_with(params: LaunchParams, config: SupervisorConfig) -> Harness {
    orchestrator_with_playback(params, config, RecordingPlayback::new())
}

pub fn orchestrator_with_playback(
    params: LaunchParams,
    config: SupervisorConfig,
    playback: Arc<RecordingPlayback>,
) -> Harness {
    let supervisor = Arc::new(ProcessSupervisor::new(config));
    let display = RecordingDisplay::new();
    let orchestrator = SessionOrchestrator::new(
        Arc::clone(&supervisor),
        playback.clone(),
        display.clone(),
        params,
        TEST_GRACE,
    );

    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    orchestrator.subscribe(Arc::new(move |change: &StateChange| {
        sink.lock().unwrap().push(change.clone());
    }));

    Harness {
        orchestrator,
        supervisor,
        playback,
        display,
        changes,
    }
}

/// Whether a pid still names a live (non-zombie) process
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => !stat
            .rsplit(')')
            .next()
            .map(|rest| rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
        Err(_) => false,
    }
}
