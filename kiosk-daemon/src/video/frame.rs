//! Decoded video frame

use crate::error::{Error, Result};
use std::path::Path;

/// Neutral placeholder colour (dark grey, opaque)
const PLACEHOLDER_RGBA: [u8; 4] = [24, 24, 24, 255];

/// One RGBA frame scaled to the display size
#[derive(Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8, `width * height * 4` bytes
    pub data: Vec<u8>,
    /// Monotonic per-reader frame counter
    pub seq: u64,
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .field("seq", &self.seq)
            .finish()
    }
}

impl VideoFrame {
    /// Byte length of an RGBA frame of the given size
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }

    /// Wrap raw RGBA bytes, validating the length
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>, seq: u64) -> Result<Self> {
        let expected = Self::byte_len(width, height);
        if data.len() != expected {
            return Err(Error::Decode(format!(
                "frame is {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
            seq,
        })
    }

    /// Solid neutral frame shown when nothing can be decoded
    pub fn placeholder(width: u32, height: u32) -> Self {
        let data = PLACEHOLDER_RGBA
            .iter()
            .copied()
            .cycle()
            .take(Self::byte_len(width, height))
            .collect();
        Self {
            width,
            height,
            data,
            seq: 0,
        }
    }

    /// Load a still image and scale it to exactly `width` x `height`
    pub fn from_image_file(path: &Path, width: u32, height: u32) -> Result<Self> {
        let img = image::open(path)
            .map_err(|e| Error::Decode(format!("failed to load {}: {}", path.display(), e)))?;
        let rgba = image::imageops::resize(
            &img.to_rgba8(),
            width,
            height,
            image::imageops::FilterType::Triangle,
        );
        Self::from_rgba(width, height, rgba.into_raw(), 0)
    }

    pub fn is_placeholder(&self) -> bool {
        self.data.chunks_exact(4).all(|px| px == PLACEHOLDER_RGBA)
    }
}
