//! Decode strategies, in preference order
//!
//! 1. [`AcceleratedStrategy`]: hardware decode thread feeding a small bounded queue
//! 2. [`PrebufferedStrategy`]: software decode of fixed windows served at the target rate
//! 3. [`StaticStrategy`]: one still per source, cycled slowly; never fails

mod accelerated;
mod prebuffered;
mod still;

pub use accelerated::AcceleratedStrategy;
pub use prebuffered::PrebufferedStrategy;
pub use still::StaticStrategy;

use super::decoder::{DecodeMode, FrameReader, MediaDecoder};
use super::frame::VideoFrame;
use super::playlist::Playlist;
use crate::config::VideoConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

/// Strategy identifier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Accelerated,
    Prebuffered,
    Static,
}

impl StrategyKind {
    /// Preference order
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::Accelerated,
        StrategyKind::Prebuffered,
        StrategyKind::Static,
    ];

    /// Strategy to fall back to when this one fails
    pub fn fallback(self) -> Option<StrategyKind> {
        match self {
            StrategyKind::Accelerated => Some(StrategyKind::Prebuffered),
            StrategyKind::Prebuffered => Some(StrategyKind::Static),
            StrategyKind::Static => None,
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Accelerated => write!(f, "accelerated"),
            StrategyKind::Prebuffered => write!(f, "prebuffered"),
            StrategyKind::Static => write!(f, "static"),
        }
    }
}

/// Strategy counters for diagnostics
#[derive(Debug, Clone, Default, Serialize)]
pub struct StrategyStats {
    pub current_source: Option<PathBuf>,
    /// Frames held in memory ready to show
    pub buffered_frames: usize,
    pub frames_decoded: u64,
    pub dropped_frames: u64,
}

/// A running playback strategy
pub trait DecodeStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Frame to show now; never blocks
    fn get_frame(&self) -> Option<Arc<VideoFrame>>;

    /// False once the strategy can no longer produce new frames
    fn is_healthy(&self) -> bool;

    /// Join worker threads and release decoders; idempotent
    fn stop(&self);

    fn stats(&self) -> StrategyStats;
}

/// Tunables shared by all strategies
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub buffer_capacity: usize,
    pub producer_wait: Duration,
    pub prebuffer_frames: usize,
    pub switch_interval_frames: u64,
    pub static_cycle: Duration,
    /// How long a strategy may take to produce its first frame
    pub start_timeout: Duration,
}

impl From<&VideoConfig> for PipelineSettings {
    fn from(video: &VideoConfig) -> Self {
        Self {
            width: video.display_width,
            height: video.display_height,
            fps: video.fps.max(1),
            buffer_capacity: video.buffer_capacity,
            producer_wait: Duration::from_millis(video.producer_wait_ms),
            prebuffer_frames: video.prebuffer_frames,
            switch_interval_frames: video.switch_interval_frames,
            static_cycle: Duration::from_secs(video.static_cycle_secs.max(1)),
            start_timeout: Duration::from_secs(5),
        }
    }
}

impl PipelineSettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

/// Everything a strategy needs to start
#[derive(Clone)]
pub struct StrategyContext {
    pub decoder: Arc<dyn MediaDecoder>,
    pub playlist: Arc<Mutex<Playlist>>,
    pub settings: PipelineSettings,
}

impl StrategyContext {
    /// Open the next source that decodes, trying each playlist entry at most once
    pub(crate) fn open_next(&self, mode: DecodeMode) -> Result<(PathBuf, Box<dyn FrameReader>)> {
        let attempts = self.playlist.lock().unwrap().len();
        for _ in 0..attempts {
            let Some(source) = self.playlist.lock().unwrap().next_source() else {
                break;
            };
            match self.decoder.open(&source, mode) {
                Ok(reader) => return Ok((source, reader)),
                Err(e) => warn!("Skipping {}: {}", source.display(), e),
            }
        }
        Err(Error::Decode(format!("no playable source for {:?} decode", mode)))
    }
}

/// Start a strategy of the given kind
pub fn start_strategy(kind: StrategyKind, ctx: &StrategyContext) -> Result<Box<dyn DecodeStrategy>> {
    Ok(match kind {
        StrategyKind::Accelerated => Box::new(AcceleratedStrategy::start(ctx)?),
        StrategyKind::Prebuffered => Box::new(PrebufferedStrategy::start(ctx)?),
        StrategyKind::Static => Box::new(StaticStrategy::start(ctx)),
    })
}
