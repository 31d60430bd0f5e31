//! Attract-loop video playback
//!
//! [`DecodePipeline`] is the only entry point used outside this module. It
//! scans the video directory, starts the best decode strategy that works on
//! this machine and supplies frames to the display without ever blocking it.

pub mod buffer;
pub mod decoder;
pub mod frame;
pub mod pipeline;
pub mod playlist;
pub mod strategy;

#[cfg(test)]
pub(crate) mod testing;

pub use decoder::{FfmpegDecoder, MediaDecoder};
pub use frame::VideoFrame;
pub use pipeline::{DecodePipeline, PipelineStats};
pub use strategy::StrategyKind;
