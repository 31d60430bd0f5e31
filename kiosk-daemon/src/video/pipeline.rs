//! Decode Pipeline
//!
//! Owns the attract loop while the kiosk is idle. `start()` picks the first
//! strategy that starts, in preference order; a watchdog thread swaps in the
//! next strategy if the active one fails at runtime. `get_frame()` only takes
//! a brief read lock and never waits on decoding.

use super::decoder::MediaDecoder;
use super::frame::VideoFrame;
use super::playlist::Playlist;
use super::strategy::{start_strategy, DecodeStrategy, PipelineSettings, StrategyContext, StrategyKind};
use crate::config::VideoConfig;
use crate::display::FrameSupplier;
use crate::session::BackgroundPlayback;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How often the watchdog checks strategy health
const WATCHDOG_INTERVAL: Duration = Duration::from_millis(250);

/// Pipeline diagnostics
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub running: bool,
    pub strategy: Option<StrategyKind>,
    pub sources: usize,
    /// Runtime fallbacks since the pipeline was created
    pub fallbacks: u64,
    pub current_source: Option<PathBuf>,
    pub buffered_frames: usize,
    pub frames_decoded: u64,
    pub dropped_frames: u64,
}

/// State shared with the watchdog thread
struct PipelineShared {
    active: RwLock<Option<Arc<dyn DecodeStrategy>>>,
    running: AtomicBool,
    fallbacks: AtomicU64,
    sources: AtomicUsize,
    /// Watchdog stop flag
    stop_lock: Mutex<bool>,
    stop_signal: Condvar,
}

pub struct DecodePipeline {
    settings: PipelineSettings,
    video_dir: PathBuf,
    decoder: Arc<dyn MediaDecoder>,
    preferred: StrategyKind,
    shared: Arc<PipelineShared>,
    placeholder: Arc<VideoFrame>,
    /// Serializes start/stop
    lifecycle: Mutex<()>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl DecodePipeline {
    pub fn new(config: &VideoConfig, decoder: Arc<dyn MediaDecoder>) -> Self {
        let settings = PipelineSettings::from(config);
        let placeholder = Arc::new(VideoFrame::placeholder(settings.width, settings.height));
        Self {
            settings,
            video_dir: config.directory.clone(),
            decoder,
            preferred: config.strategy.unwrap_or(StrategyKind::Accelerated),
            shared: Arc::new(PipelineShared {
                active: RwLock::new(None),
                running: AtomicBool::new(false),
                fallbacks: AtomicU64::new(0),
                sources: AtomicUsize::new(0),
                stop_lock: Mutex::new(false),
                stop_signal: Condvar::new(),
            }),
            placeholder,
            lifecycle: Mutex::new(()),
            watchdog: Mutex::new(None),
        }
    }

    /// Start playback; no-op if already running
    pub fn start(&self) {
        let _lifecycle = self.lifecycle.lock().unwrap();
        if self.shared.running.load(Ordering::Acquire) {
            debug!("Decode pipeline already running");
            return;
        }

        let playlist = Playlist::scan(&self.video_dir).unwrap_or_else(|e| {
            warn!("Failed to scan {}: {}", self.video_dir.display(), e);
            Playlist::new(Vec::new())
        });
        self.shared.sources.store(playlist.len(), Ordering::Relaxed);

        let ctx = StrategyContext {
            decoder: Arc::clone(&self.decoder),
            playlist: Arc::new(Mutex::new(playlist)),
            settings: self.settings.clone(),
        };

        let strategy = start_with_fallback(self.preferred, &ctx);
        info!("Decode pipeline started with {} strategy", strategy.kind());
        *self.shared.active.write().unwrap() = Some(strategy);

        *self.shared.stop_lock.lock().unwrap() = false;
        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name("video-watchdog".to_string())
            .spawn(move || watchdog_loop(shared, ctx))
        {
            Ok(handle) => *self.watchdog.lock().unwrap() = Some(handle),
            // Playback still works, only runtime fallback is lost
            Err(e) => error!("Failed to start decode watchdog: {}", e),
        }

        self.shared.running.store(true, Ordering::Release);
    }

    /// Stop playback, joining every decode thread before returning
    pub fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().unwrap();
        let was_running = self.shared.running.swap(false, Ordering::AcqRel);

        {
            let mut stopped = self.shared.stop_lock.lock().unwrap();
            *stopped = true;
            self.shared.stop_signal.notify_all();
        }
        if let Some(handle) = self.watchdog.lock().unwrap().take() {
            if let Err(e) = handle.join() {
                error!("Decode watchdog join failed: {:?}", e);
            }
        }

        let active = self.shared.active.write().unwrap().take();
        if let Some(strategy) = active {
            strategy.stop();
        }

        if was_running {
            info!("Decode pipeline stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Frame to display now
    ///
    /// While running this always returns a frame (the placeholder if the
    /// strategy has nothing yet). Returns None once stopped.
    pub fn get_frame(&self) -> Option<Arc<VideoFrame>> {
        if !self.is_running() {
            return None;
        }
        let active = self.shared.active.read().unwrap();
        active
            .as_ref()
            .map(|strategy| strategy.get_frame().unwrap_or_else(|| Arc::clone(&self.placeholder)))
    }

    pub fn active_strategy(&self) -> Option<StrategyKind> {
        self.shared.active.read().unwrap().as_ref().map(|s| s.kind())
    }

    pub fn stats(&self) -> PipelineStats {
        let active = self.shared.active.read().unwrap().clone();
        let strategy_stats = active.as_ref().map(|s| s.stats()).unwrap_or_default();
        PipelineStats {
            running: self.is_running(),
            strategy: active.as_ref().map(|s| s.kind()),
            sources: self.shared.sources.load(Ordering::Relaxed),
            fallbacks: self.shared.fallbacks.load(Ordering::Relaxed),
            current_source: strategy_stats.current_source,
            buffered_frames: strategy_stats.buffered_frames,
            frames_decoded: strategy_stats.frames_decoded,
            dropped_frames: strategy_stats.dropped_frames,
        }
    }
}

impl Drop for DecodePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

impl BackgroundPlayback for DecodePipeline {
    fn suspend(&self) {
        self.stop();
    }

    fn resume(&self) {
        self.start();
    }
}

impl FrameSupplier for DecodePipeline {
    fn get_frame(&self) -> Option<Arc<VideoFrame>> {
        DecodePipeline::get_frame(self)
    }
}

/// Start `kind`, walking down the fallback chain until one starts
fn start_with_fallback(kind: StrategyKind, ctx: &StrategyContext) -> Arc<dyn DecodeStrategy> {
    let mut kind = kind;
    loop {
        match start_strategy(kind, ctx) {
            Ok(strategy) => return Arc::from(strategy),
            Err(e) => {
                let next = kind.fallback().unwrap_or(StrategyKind::Static);
                warn!("{} playback unavailable ({}), trying {}", kind, e, next);
                kind = next;
            }
        }
    }
}

fn watchdog_loop(shared: Arc<PipelineShared>, ctx: StrategyContext) {
    debug!("Decode watchdog started");

    loop {
        {
            let stopped = shared.stop_lock.lock().unwrap();
            let (stopped, _) = shared
                .stop_signal
                .wait_timeout_while(stopped, WATCHDOG_INTERVAL, |s| !*s)
                .unwrap();
            if *stopped {
                break;
            }
        }

        let current = shared.active.read().unwrap().clone();
        let Some(current) = current else {
            continue;
        };
        if current.is_healthy() {
            continue;
        }
        let Some(next_kind) = current.kind().fallback() else {
            continue;
        };

        warn!(
            "{} playback failed at runtime, falling back to {}",
            current.kind(),
            next_kind
        );
        let next = start_with_fallback(next_kind, &ctx);

        if *shared.stop_lock.lock().unwrap() {
            next.stop();
            break;
        }

        let previous = shared.active.write().unwrap().replace(Arc::clone(&next));
        shared.fallbacks.fetch_add(1, Ordering::Relaxed);
        info!("Decode pipeline now using {} strategy", next.kind());

        // Failed strategy's threads have exited or are exiting; release them off the render path
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    debug!("Decode watchdog exiting");
}
