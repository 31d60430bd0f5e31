//! Pre-buffered software strategy
//!
//! A loader thread decodes fixed-size windows of frames into memory and hands
//! them over a one-slot channel, so the next window is being decoded while
//! the current one is served. Serving is paced by wall clock at the target
//! frame rate. The loader switches source after a fixed number of frames or
//! when a source runs out.

use super::{DecodeStrategy, StrategyContext, StrategyKind, StrategyStats};
use crate::error::{Error, Result};
use crate::video::decoder::{Canceller, DecodeMode, FrameReader};
use crate::video::frame::VideoFrame;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Decoded frames from one source
struct Window {
    source: PathBuf,
    frames: Vec<Arc<VideoFrame>>,
}

struct LoaderShared {
    stop_flag: AtomicBool,
    healthy: AtomicBool,
    canceller: Mutex<Option<Canceller>>,
    frames_decoded: AtomicU64,
}

struct ServeState {
    window: Option<Window>,
    window_started: Instant,
    last: Option<Arc<VideoFrame>>,
}

pub struct PrebufferedStrategy {
    shared: Arc<LoaderShared>,
    windows: Mutex<Option<Receiver<Window>>>,
    serve: Mutex<ServeState>,
    frame_interval: Duration,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PrebufferedStrategy {
    pub fn start(ctx: &StrategyContext) -> Result<Self> {
        if ctx.playlist.lock().unwrap().is_empty() {
            return Err(Error::Decode("no sources to pre-buffer".to_string()));
        }

        let shared = Arc::new(LoaderShared {
            stop_flag: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            canceller: Mutex::new(None),
            frames_decoded: AtomicU64::new(0),
        });

        let (tx, rx) = mpsc::sync_channel::<Window>(1);
        let loader_ctx = ctx.clone();
        let loader_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("video-prebuffer".to_string())
            .spawn(move || Self::loader_loop(loader_ctx, loader_shared, tx))
            .map_err(|e| Error::Decode(format!("failed to start loader thread: {}", e)))?;

        let strategy = Self {
            shared,
            windows: Mutex::new(None),
            serve: Mutex::new(ServeState {
                window: None,
                window_started: Instant::now(),
                last: None,
            }),
            frame_interval: ctx.settings.frame_interval(),
            thread: Mutex::new(Some(handle)),
        };

        // The first window must arrive before this strategy counts as started
        match rx.recv_timeout(ctx.settings.start_timeout) {
            Ok(window) => {
                info!(
                    "Pre-buffered playback starting with {} ({} frames)",
                    window.source.display(),
                    window.frames.len()
                );
                let mut serve = strategy.serve.lock().unwrap();
                serve.window = Some(window);
                serve.window_started = Instant::now();
                drop(serve);
                *strategy.windows.lock().unwrap() = Some(rx);
                Ok(strategy)
            }
            Err(e) => {
                drop(rx);
                strategy.stop();
                Err(Error::Decode(match e {
                    RecvTimeoutError::Timeout => format!(
                        "no frames decoded within {:?}",
                        ctx.settings.start_timeout
                    ),
                    RecvTimeoutError::Disconnected => "loader found nothing to decode".to_string(),
                }))
            }
        }
    }

    fn loader_loop(ctx: StrategyContext, shared: Arc<LoaderShared>, tx: SyncSender<Window>) {
        debug!("Pre-buffer loader started");
        let window_size = ctx.settings.prebuffer_frames.max(1);
        let switch_after = ctx.settings.switch_interval_frames.max(1);
        let max_empty = ctx.playlist.lock().unwrap().len() + 1;

        let mut current: Option<(PathBuf, Box<dyn FrameReader>, u64)> = None;
        let mut consecutive_empty = 0;

        while !shared.stop_flag.load(Ordering::Acquire) {
            if current.is_none() {
                match ctx.open_next(DecodeMode::Software) {
                    Ok((source, reader)) => {
                        *shared.canceller.lock().unwrap() = Some(reader.canceller());
                        if shared.stop_flag.load(Ordering::Acquire) {
                            break;
                        }
                        current = Some((source, reader, 0));
                    }
                    Err(e) => {
                        error!("Pre-buffer loader has no sources left: {}", e);
                        shared.healthy.store(false, Ordering::Release);
                        break;
                    }
                }
            }

            let Some((source, reader, served)) = current.as_mut() else {
                continue;
            };

            let mut frames = Vec::with_capacity(window_size);
            let mut source_done = false;
            while frames.len() < window_size && !shared.stop_flag.load(Ordering::Acquire) {
                match reader.next_frame() {
                    Ok(Some(frame)) => {
                        frames.push(Arc::new(frame));
                        *served += 1;
                        shared.frames_decoded.fetch_add(1, Ordering::Relaxed);
                        if *served >= switch_after {
                            source_done = true;
                            break;
                        }
                    }
                    Ok(None) => {
                        source_done = true;
                        break;
                    }
                    Err(e) => {
                        if !shared.stop_flag.load(Ordering::Acquire) {
                            warn!("Pre-buffer decode of {} failed: {}", source.display(), e);
                        }
                        source_done = true;
                        break;
                    }
                }
            }

            let window = Window {
                source: source.clone(),
                frames,
            };
            if source_done {
                current = None;
            }

            if window.frames.is_empty() {
                consecutive_empty += 1;
                if consecutive_empty >= max_empty {
                    error!("Pre-buffer loader could not decode any source");
                    shared.healthy.store(false, Ordering::Release);
                    break;
                }
                continue;
            }
            consecutive_empty = 0;

            // Blocks while the previous window is still queued; fails once stopped
            if tx.send(window).is_err() {
                break;
            }
        }

        debug!("Pre-buffer loader exiting");
    }
}

impl DecodeStrategy for PrebufferedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Prebuffered
    }

    fn get_frame(&self) -> Option<Arc<VideoFrame>> {
        let now = Instant::now();
        let mut serve = self.serve.lock().unwrap();

        let mut index = (now.duration_since(serve.window_started).as_secs_f64()
            / self.frame_interval.as_secs_f64()) as usize;

        let exhausted = serve
            .window
            .as_ref()
            .map(|w| index >= w.frames.len())
            .unwrap_or(true);

        if exhausted {
            let next = match self.windows.lock().unwrap().as_ref() {
                Some(rx) => match rx.try_recv() {
                    Ok(window) => Some(window),
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
                },
                None => None,
            };
            if let Some(window) = next {
                serve.window = Some(window);
                serve.window_started = now;
                index = 0;
            }
        }

        let frame = serve
            .window
            .as_ref()
            .and_then(|w| w.frames.get(index.min(w.frames.len().saturating_sub(1))))
            .cloned()
            .or_else(|| serve.last.clone());

        if let Some(frame) = &frame {
            serve.last = Some(Arc::clone(frame));
        }
        frame
    }

    fn is_healthy(&self) -> bool {
        self.shared.healthy.load(Ordering::Acquire)
    }

    fn stop(&self) {
        self.shared.stop_flag.store(true, Ordering::Release);
        if let Some(canceller) = self.shared.canceller.lock().unwrap().as_ref() {
            canceller.cancel();
        }
        // Dropping the receiver unblocks a loader waiting to hand over a window
        self.windows.lock().unwrap().take();

        if let Some(handle) = self.thread.lock().unwrap().take() {
            if let Err(e) = handle.join() {
                error!("Pre-buffer loader join failed: {:?}", e);
            }
        }

        let mut serve = self.serve.lock().unwrap();
        serve.window = None;
        serve.last = None;
    }

    fn stats(&self) -> StrategyStats {
        let serve = self.serve.lock().unwrap();
        StrategyStats {
            current_source: serve.window.as_ref().map(|w| w.source.clone()),
            buffered_frames: serve.window.as_ref().map(|w| w.frames.len()).unwrap_or(0),
            frames_decoded: self.shared.frames_decoded.load(Ordering::Relaxed),
            dropped_frames: 0,
        }
    }
}
