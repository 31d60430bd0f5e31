//! Display surface seam
//!
//! The kiosk window itself is owned by the platform layer. The orchestrator
//! only needs to hide it while the game runs and show it again afterwards;
//! the presenter pulls frames from a [`FrameSupplier`] while it is visible.

use crate::video::VideoFrame;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// The kiosk's own window
pub trait DisplaySurface: Send + Sync {
    fn set_visible(&self, visible: bool);
    fn is_visible(&self) -> bool;
}

/// Source of frames for the render loop; must not block
pub trait FrameSupplier: Send + Sync {
    fn get_frame(&self) -> Option<Arc<VideoFrame>>;
}

struct PresenterShared {
    visible: AtomicBool,
    frames_presented: AtomicU64,
    stop_lock: Mutex<bool>,
    stop_signal: Condvar,
}

/// Display without a window: tracks visibility and paces frame pulls
///
/// Used on headless installs and as the render loop stand-in; a windowed
/// surface plugs in behind the same trait.
pub struct HeadlessDisplay {
    shared: Arc<PresenterShared>,
    presenter: Mutex<Option<JoinHandle<()>>>,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(PresenterShared {
                visible: AtomicBool::new(true),
                frames_presented: AtomicU64::new(0),
                stop_lock: Mutex::new(false),
                stop_signal: Condvar::new(),
            }),
            presenter: Mutex::new(None),
        }
    }

    /// Start pulling frames at `fps` while visible
    pub fn start_presenter(&self, supplier: Arc<dyn FrameSupplier>, fps: u32) {
        let mut presenter = self.presenter.lock().unwrap();
        if presenter.is_some() {
            return;
        }
        *self.shared.stop_lock.lock().unwrap() = false;

        let interval = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name("display-presenter".to_string())
            .spawn(move || present_loop(shared, supplier, interval))
        {
            Ok(handle) => *presenter = Some(handle),
            Err(e) => error!("Failed to start display presenter: {}", e),
        }
    }

    pub fn stop_presenter(&self) {
        {
            let mut stopped = self.shared.stop_lock.lock().unwrap();
            *stopped = true;
            self.shared.stop_signal.notify_all();
        }
        if let Some(handle) = self.presenter.lock().unwrap().take() {
            if let Err(e) = handle.join() {
                error!("Display presenter join failed: {:?}", e);
            }
        }
    }

    pub fn frames_presented(&self) -> u64 {
        self.shared.frames_presented.load(Ordering::Relaxed)
    }
}

impl Default for HeadlessDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HeadlessDisplay {
    fn drop(&mut self) {
        self.stop_presenter();
    }
}

impl DisplaySurface for HeadlessDisplay {
    fn set_visible(&self, visible: bool) {
        let previous = self.shared.visible.swap(visible, Ordering::AcqRel);
        if previous != visible {
            info!("Kiosk display {}", if visible { "shown" } else { "hidden" });
        }
    }

    fn is_visible(&self) -> bool {
        self.shared.visible.load(Ordering::Acquire)
    }
}

fn present_loop(shared: Arc<PresenterShared>, supplier: Arc<dyn FrameSupplier>, interval: Duration) {
    debug!("Display presenter started");
    loop {
        {
            let stopped = shared.stop_lock.lock().unwrap();
            let (stopped, _) = shared
                .stop_signal
                .wait_timeout_while(stopped, interval, |s| !*s)
                .unwrap();
            if *stopped {
                break;
            }
        }

        if !shared.visible.load(Ordering::Acquire) {
            continue;
        }
        if supplier.get_frame().is_some() {
            shared.frames_presented.fetch_add(1, Ordering::Relaxed);
        }
    }
    debug!("Display presenter exiting");
}
