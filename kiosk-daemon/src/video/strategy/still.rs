//! Static fallback: one still per source, cycled at a slow fixed rate

use super::{DecodeStrategy, StrategyContext, StrategyKind, StrategyStats};
use crate::video::frame::VideoFrame;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound on stills extracted at start
const MAX_STILLS: usize = 16;

/// Sidecar poster extensions checked before decoding
const POSTER_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

pub struct StaticStrategy {
    stills: Vec<(Option<PathBuf>, Arc<VideoFrame>)>,
    cycle: Duration,
    started: Instant,
    stopped: AtomicBool,
}

impl StaticStrategy {
    /// Extract stills; falls back to a neutral placeholder, so this never fails
    pub fn start(ctx: &StrategyContext) -> Self {
        let settings = &ctx.settings;
        let sources: Vec<PathBuf> = ctx
            .playlist
            .lock()
            .unwrap()
            .sources()
            .iter()
            .take(MAX_STILLS)
            .cloned()
            .collect();

        let mut stills = Vec::new();
        for source in sources {
            let frame = match poster_for(&source) {
                Some(poster) => VideoFrame::from_image_file(&poster, settings.width, settings.height)
                    .or_else(|e| {
                        debug!("Poster {} unusable: {}", poster.display(), e);
                        ctx.decoder.still_frame(&source)
                    }),
                None => ctx.decoder.still_frame(&source),
            };

            match frame {
                Ok(frame) => stills.push((Some(source), Arc::new(frame))),
                Err(e) => warn!("No still for {}: {}", source.display(), e),
            }
        }

        if stills.is_empty() {
            warn!("No stills available, showing placeholder");
            stills.push((
                None,
                Arc::new(VideoFrame::placeholder(settings.width, settings.height)),
            ));
        }

        info!("Static playback cycling {} still(s)", stills.len());
        Self {
            stills,
            cycle: settings.static_cycle,
            started: Instant::now(),
            stopped: AtomicBool::new(false),
        }
    }

    fn current_index(&self) -> usize {
        let step = self.started.elapsed().as_millis() / self.cycle.as_millis().max(1);
        (step % self.stills.len() as u128) as usize
    }
}

/// `<stem>.png` / `.jpg` / `.jpeg` next to the video, if present
fn poster_for(source: &Path) -> Option<PathBuf> {
    POSTER_EXTENSIONS
        .iter()
        .map(|ext| source.with_extension(ext))
        .find(|candidate| candidate.is_file())
}

impl DecodeStrategy for StaticStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Static
    }

    fn get_frame(&self) -> Option<Arc<VideoFrame>> {
        if self.stopped.load(Ordering::Acquire) {
            return None;
        }
        self.stills
            .get(self.current_index())
            .map(|(_, frame)| Arc::clone(frame))
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    fn stats(&self) -> StrategyStats {
        StrategyStats {
            current_source: self
                .stills
                .get(self.current_index())
                .and_then(|(source, _)| source.clone()),
            buffered_frames: self.stills.len(),
            frames_decoded: self.stills.iter().filter(|(s, _)| s.is_some()).count() as u64,
            dropped_frames: 0,
        }
    }
}
