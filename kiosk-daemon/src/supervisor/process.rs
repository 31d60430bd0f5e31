//! Running game process handle and exit monitoring
//!
//! The monitor thread blocks in the OS until the child exits without reaping
//! it, then reaps under the slot lock. Signals are only ever sent while
//! holding that lock and after checking the child is unreaped, so a recycled
//! PID is never signalled.

use crate::error::{Error, Result};
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Poll interval when the platform has no blocking non-reaping wait
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exit code reported when the status could not be collected
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// Outcome delivered to the exit callback, exactly once per launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub session_id: Uuid,
    pub pid: u32,
    /// Raw exit code; 128 + signal number for signal deaths on unix
    pub exit_code: i32,
    pub runtime: Duration,
    /// True if a stop had been requested before the process exited
    pub stop_requested: bool,
}

/// Callback invoked by the monitor thread when the game exits
pub type ExitCallback = Box<dyn FnOnce(ExitReport) + Send + 'static>;

struct ChildSlot {
    child: Child,
    exit_code: Option<i32>,
}

pub(crate) struct ProcessShared {
    pid: u32,
    session_id: Uuid,
    player: String,
    started: Instant,
    slot: Mutex<ChildSlot>,
    /// Notified once the child has been reaped
    exited: Condvar,
    stop_requested: AtomicBool,
    /// Single-fire guard for the exit callback
    exit_fired: AtomicBool,
}

/// Handle to one launched game process
///
/// Cheap to clone; shared between the supervisor and the orchestrator.
#[derive(Clone)]
pub struct ProcessHandle {
    shared: Arc<ProcessShared>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.shared.pid)
            .field("session_id", &self.shared.session_id)
            .field("player", &self.shared.player)
            .field("exit_code", &self.exit_code())
            .finish()
    }
}

impl ProcessHandle {
    pub(crate) fn new(child: Child, session_id: Uuid, player: &str) -> Self {
        Self {
            shared: Arc::new(ProcessShared {
                pid: child.id(),
                session_id,
                player: player.to_string(),
                started: Instant::now(),
                slot: Mutex::new(ChildSlot {
                    child,
                    exit_code: None,
                }),
                exited: Condvar::new(),
                stop_requested: AtomicBool::new(false),
                exit_fired: AtomicBool::new(false),
            }),
        }
    }

    pub fn pid(&self) -> u32 {
        self.shared.pid
    }

    pub fn session_id(&self) -> Uuid {
        self.shared.session_id
    }

    pub fn player(&self) -> &str {
        &self.shared.player
    }

    /// Exit code once the process has been reaped
    pub fn exit_code(&self) -> Option<i32> {
        self.shared.slot.lock().unwrap().exit_code
    }

    pub fn has_exited(&self) -> bool {
        self.exit_code().is_some()
    }

    /// Whether terminate() has been called on this process
    pub fn stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for the process to be reaped
    pub fn wait_exit(&self, timeout: Duration) -> Option<i32> {
        let slot = self.shared.slot.lock().unwrap();
        let (slot, _) = self
            .shared
            .exited
            .wait_timeout_while(slot, timeout, |s| s.exit_code.is_none())
            .unwrap();
        slot.exit_code
    }

    /// Graceful stop, bounded wait, forced kill, bounded wait
    ///
    /// Idempotent: returns Ok without signalling if the process is already
    /// reaped, and never sends the graceful signal twice.
    pub(crate) fn terminate(&self, stop_grace: Duration, kill_timeout: Duration) -> Result<()> {
        let shared = &self.shared;
        let mut slot = shared.slot.lock().unwrap();

        if slot.exit_code.is_some() {
            debug!("Game process {} already exited, nothing to terminate", shared.pid);
            return Ok(());
        }

        if !shared.stop_requested.swap(true, Ordering::AcqRel) {
            info!("Requesting game process {} to stop", shared.pid);
            if let Err(e) = request_graceful_stop(&mut slot.child) {
                warn!("Graceful stop signal to {} failed: {}", shared.pid, e);
            }
        }

        let (guard, _) = shared
            .exited
            .wait_timeout_while(slot, stop_grace, |s| s.exit_code.is_none())
            .unwrap();
        slot = guard;
        if slot.exit_code.is_some() {
            return Ok(());
        }

        warn!(
            "Game process {} still running after {:?}, killing",
            shared.pid, stop_grace
        );
        if let Err(e) = slot.child.kill() {
            warn!("Kill of game process {} failed: {}", shared.pid, e);
        }

        let (slot, _) = shared
            .exited
            .wait_timeout_while(slot, kill_timeout, |s| s.exit_code.is_none())
            .unwrap();
        if slot.exit_code.is_some() {
            Ok(())
        } else {
            Err(Error::Process(format!(
                "game process {} did not exit within {:?} of being killed",
                shared.pid, kill_timeout
            )))
        }
    }

    /// Kill and reap synchronously, for a process that never got a monitor
    pub(crate) fn kill_and_reap(&self) -> i32 {
        let mut slot = self.shared.slot.lock().unwrap();
        if let Some(code) = slot.exit_code {
            return code;
        }
        if let Err(e) = slot.child.kill() {
            warn!("Kill of game process {} failed: {}", self.shared.pid, e);
        }
        let code = match slot.child.wait() {
            Ok(status) => exit_code_of(status),
            Err(e) => {
                error!("Failed to reap game process {}: {}", self.shared.pid, e);
                UNKNOWN_EXIT_CODE
            }
        };
        slot.exit_code = Some(code);
        drop(slot);
        self.shared.exited.notify_all();
        code
    }

    /// Monitor thread body: block until exit, reap, fire the callback once
    pub(crate) fn monitor(self, on_exit: ExitCallback) {
        let shared = &self.shared;
        debug!("Monitoring game process {} for {}", shared.pid, shared.player);

        #[cfg(unix)]
        if let Err(e) = wait_exited_no_reap(shared.pid) {
            warn!(
                "Blocking wait on game process {} failed ({}), polling instead",
                shared.pid, e
            );
        }

        let exit_code = self.reap();

        let report = ExitReport {
            session_id: shared.session_id,
            pid: shared.pid,
            exit_code,
            runtime: shared.started.elapsed(),
            stop_requested: shared.stop_requested.load(Ordering::Acquire),
        };

        if shared.exit_fired.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(
            "Game process {} exited with code {} after {:.1}s",
            report.pid,
            report.exit_code,
            report.runtime.as_secs_f64()
        );
        on_exit(report);
    }

    /// Reap the child under the slot lock, polling until it is gone
    fn reap(&self) -> i32 {
        let shared = &self.shared;
        loop {
            let mut slot = shared.slot.lock().unwrap();
            if let Some(code) = slot.exit_code {
                return code;
            }

            let code = match slot.child.try_wait() {
                Ok(Some(status)) => Some(exit_code_of(status)),
                Ok(None) => None,
                Err(e) => {
                    error!("Failed to collect exit status of {}: {}", shared.pid, e);
                    Some(UNKNOWN_EXIT_CODE)
                }
            };

            if let Some(code) = code {
                slot.exit_code = Some(code);
                drop(slot);
                shared.exited.notify_all();
                return code;
            }

            drop(slot);
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Raw exit code, or 128 + signal for signal deaths
pub fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    UNKNOWN_EXIT_CODE
}

#[cfg(unix)]
fn request_graceful_stop(child: &mut Child) -> std::io::Result<()> {
    // SAFETY: plain syscall; caller holds the slot lock and the child is unreaped
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn request_graceful_stop(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

/// Block until the child has exited, leaving it waitable
#[cfg(unix)]
fn wait_exited_no_reap(pid: u32) -> std::io::Result<()> {
    loop {
        // SAFETY: siginfo_t is plain data and zero is a valid bit pattern
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        // SAFETY: `info` is a valid out-pointer for the duration of the call
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
