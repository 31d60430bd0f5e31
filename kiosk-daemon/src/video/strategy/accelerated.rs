//! Accelerated strategy: one hardware decode thread feeding a bounded queue

use super::{DecodeStrategy, StrategyContext, StrategyKind, StrategyStats};
use crate::error::{Error, Result};
use crate::video::buffer::DecodeBuffer;
use crate::video::decoder::{Canceller, DecodeMode, FrameReader};
use crate::video::frame::VideoFrame;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// State shared with the decode thread
struct WorkerShared {
    stop_flag: AtomicBool,
    healthy: AtomicBool,
    canceller: Mutex<Option<Canceller>>,
    current_source: Mutex<Option<PathBuf>>,
    frames_decoded: AtomicU64,
}

pub struct AcceleratedStrategy {
    buffer: Arc<DecodeBuffer>,
    shared: Arc<WorkerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl AcceleratedStrategy {
    pub fn start(ctx: &StrategyContext) -> Result<Self> {
        if !ctx.decoder.hardware_available() {
            return Err(Error::Decode("hardware decode unavailable".to_string()));
        }

        let (source, reader) = ctx.open_next(DecodeMode::Accelerated)?;
        info!("Accelerated playback starting with {}", source.display());

        let buffer = Arc::new(DecodeBuffer::new(ctx.settings.buffer_capacity));
        let shared = Arc::new(WorkerShared {
            stop_flag: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            canceller: Mutex::new(Some(reader.canceller())),
            current_source: Mutex::new(Some(source)),
            frames_decoded: AtomicU64::new(0),
        });

        let worker_ctx = ctx.clone();
        let worker_buffer = Arc::clone(&buffer);
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("video-accel".to_string())
            .spawn(move || Self::worker_loop(worker_ctx, worker_buffer, worker_shared, reader))
            .map_err(|e| Error::Decode(format!("failed to start decode thread: {}", e)))?;

        Ok(Self {
            buffer,
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    fn worker_loop(
        ctx: StrategyContext,
        buffer: Arc<DecodeBuffer>,
        shared: Arc<WorkerShared>,
        mut reader: Box<dyn FrameReader>,
    ) {
        debug!("Accelerated decode worker started");
        let wait = ctx.settings.producer_wait;

        loop {
            if shared.stop_flag.load(Ordering::Acquire) {
                break;
            }

            match reader.next_frame() {
                Ok(Some(frame)) => {
                    shared.frames_decoded.fetch_add(1, Ordering::Relaxed);
                    buffer.push_frame(Arc::new(frame), wait);
                }
                Ok(None) => {
                    // Source exhausted: release it before opening the next
                    drop(reader);
                    match ctx.open_next(DecodeMode::Accelerated) {
                        Ok((source, next)) => {
                            debug!("Accelerated playback switching to {}", source.display());
                            *shared.canceller.lock().unwrap() = Some(next.canceller());
                            *shared.current_source.lock().unwrap() = Some(source);
                            reader = next;
                        }
                        Err(e) => {
                            error!("Accelerated playback has no further sources: {}", e);
                            shared.healthy.store(false, Ordering::Release);
                            break;
                        }
                    }
                }
                Err(e) => {
                    if !shared.stop_flag.load(Ordering::Acquire) {
                        warn!("Accelerated decode failed: {}", e);
                        shared.healthy.store(false, Ordering::Release);
                    }
                    break;
                }
            }
        }

        debug!("Accelerated decode worker exiting");
    }
}

impl DecodeStrategy for AcceleratedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Accelerated
    }

    fn get_frame(&self) -> Option<Arc<VideoFrame>> {
        self.buffer.get_frame()
    }

    fn is_healthy(&self) -> bool {
        self.shared.healthy.load(Ordering::Acquire)
    }

    fn stop(&self) {
        self.shared.stop_flag.store(true, Ordering::Release);
        self.buffer.close();
        if let Some(canceller) = self.shared.canceller.lock().unwrap().as_ref() {
            canceller.cancel();
        }

        if let Some(handle) = self.thread.lock().unwrap().take() {
            if let Err(e) = handle.join() {
                error!("Accelerated decode thread join failed: {:?}", e);
            }
        }
        self.buffer.drain();
    }

    fn stats(&self) -> StrategyStats {
        let buffer = self.buffer.statistics();
        StrategyStats {
            current_source: self.shared.current_source.lock().unwrap().clone(),
            buffered_frames: buffer.occupied,
            frames_decoded: self.shared.frames_decoded.load(Ordering::Relaxed),
            dropped_frames: buffer.dropped,
        }
    }
}
