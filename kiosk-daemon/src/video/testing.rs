//! In-memory decoder for strategy and pipeline tests

use super::decoder::{Canceller, DecodeMode, FrameReader, MediaDecoder};
use super::frame::VideoFrame;
use super::playlist::Playlist;
use super::strategy::{PipelineSettings, StrategyContext};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
pub struct FakeDecoder {
    frames_per_source: u64,
    hardware: bool,
    fail_after: Option<u64>,
    fail_stills: bool,
    frame_delay: Duration,
    open_readers: Arc<AtomicUsize>,
    opens: Arc<AtomicUsize>,
}

impl FakeDecoder {
    pub fn new(frames_per_source: u64) -> Self {
        Self {
            frames_per_source,
            hardware: true,
            fail_after: None,
            fail_stills: false,
            frame_delay: Duration::from_millis(1),
            open_readers: Arc::new(AtomicUsize::new(0)),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn without_hardware(mut self) -> Self {
        self.hardware = false;
        self
    }

    /// Readers error out after `n` frames
    pub fn fail_after(mut self, n: u64) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn failing_stills(mut self) -> Self {
        self.fail_stills = true;
        self
    }

    /// Readers currently alive
    pub fn open_readers(&self) -> usize {
        self.open_readers.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl MediaDecoder for FakeDecoder {
    fn hardware_available(&self) -> bool {
        self.hardware
    }

    fn open(&self, _source: &Path, mode: DecodeMode) -> Result<Box<dyn FrameReader>> {
        if mode == DecodeMode::Accelerated && !self.hardware {
            return Err(Error::Decode("no hardware decoder".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.open_readers.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeReader {
            remaining: self.frames_per_source,
            fail_after: self.fail_after,
            produced: 0,
            delay: self.frame_delay,
            open_readers: Arc::clone(&self.open_readers),
        }))
    }

    fn still_frame(&self, _source: &Path) -> Result<VideoFrame> {
        if self.fail_stills {
            return Err(Error::Decode("still extraction failed".to_string()));
        }
        VideoFrame::from_rgba(2, 2, vec![200; VideoFrame::byte_len(2, 2)], 0)
    }
}

struct FakeReader {
    remaining: u64,
    fail_after: Option<u64>,
    produced: u64,
    delay: Duration,
    open_readers: Arc<AtomicUsize>,
}

impl FrameReader for FakeReader {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>> {
        if self.fail_after == Some(self.produced) {
            return Err(Error::Decode("decoder crashed".to_string()));
        }
        if self.remaining == 0 {
            return Ok(None);
        }
        std::thread::sleep(self.delay);
        self.remaining -= 1;
        self.produced += 1;
        let shade = (self.produced % 200) as u8 + 50;
        VideoFrame::from_rgba(2, 2, vec![shade; VideoFrame::byte_len(2, 2)], self.produced).map(Some)
    }

    fn canceller(&self) -> Canceller {
        Canceller::noop()
    }
}

impl Drop for FakeReader {
    fn drop(&mut self) {
        self.open_readers.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn settings() -> PipelineSettings {
    PipelineSettings {
        width: 2,
        height: 2,
        fps: 100,
        buffer_capacity: 2,
        producer_wait: Duration::from_millis(5),
        prebuffer_frames: 4,
        switch_interval_frames: 8,
        static_cycle: Duration::from_secs(1),
        start_timeout: Duration::from_secs(2),
    }
}

/// Context over `n` made-up sources
pub fn context(decoder: FakeDecoder, n: usize) -> StrategyContext {
    let sources = (0..n).map(|i| PathBuf::from(format!("/videos/{}.mp4", i))).collect();
    context_with_sources(decoder, sources)
}

pub fn context_with_sources(decoder: FakeDecoder, sources: Vec<PathBuf>) -> StrategyContext {
    StrategyContext {
        decoder: Arc::new(decoder),
        playlist: Arc::new(Mutex::new(Playlist::new(sources))),
        settings: settings(),
    }
}
