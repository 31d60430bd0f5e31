//! Media decoder seam and the ffmpeg-backed implementation
//!
//! Decoding runs in an `ffmpeg` child process writing raw RGBA frames, already
//! scaled to the display size, to its stdout. Killing the child is the only
//! way to interrupt a blocked read, so every reader hands out a [`Canceller`].

use super::frame::VideoFrame;
use crate::config::VideoConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long the hardware decoder probe may run
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Decode path requested when opening a source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DecodeMode {
    /// Hardware decoder, paced at the source frame rate
    Accelerated,
    /// CPU decode as fast as possible
    Software,
}

/// Interrupts a reader blocked in `next_frame` from another thread
#[derive(Clone)]
pub struct Canceller(Arc<dyn Fn() + Send + Sync>);

impl Canceller {
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Canceller for readers that never block
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn cancel(&self) {
        (self.0)()
    }
}

impl std::fmt::Debug for Canceller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Canceller")
    }
}

/// Sequential frame source for one opened video
pub trait FrameReader: Send {
    /// Next frame; `Ok(None)` at end of stream
    fn next_frame(&mut self) -> Result<Option<VideoFrame>>;

    /// Handle that makes a blocked `next_frame` return promptly
    fn canceller(&self) -> Canceller;
}

/// Opens sources for the decode strategies
pub trait MediaDecoder: Send + Sync {
    /// Whether an accelerated decode path exists on this machine
    fn hardware_available(&self) -> bool;

    /// Open `source` for sequential decoding
    fn open(&self, source: &Path, mode: DecodeMode) -> Result<Box<dyn FrameReader>>;

    /// One representative frame of `source`
    fn still_frame(&self, source: &Path) -> Result<VideoFrame>;
}

/// ffmpeg subprocess decoder
pub struct FfmpegDecoder {
    ffmpeg: PathBuf,
    width: u32,
    height: u32,
    fps: u32,
    hardware_candidates: Vec<String>,
    /// Probed lazily, once
    hardware_decoder: OnceLock<Option<String>>,
}

impl FfmpegDecoder {
    pub fn new(config: &VideoConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
            width: config.display_width,
            height: config.display_height,
            fps: config.fps,
            hardware_candidates: config.hardware_decoders.clone(),
            hardware_decoder: OnceLock::new(),
        }
    }

    /// First configured hardware decoder ffmpeg reports, if any
    pub fn hardware_decoder(&self) -> Option<&str> {
        self.hardware_decoder
            .get_or_init(|| probe_hardware_decoder(&self.ffmpeg, &self.hardware_candidates))
            .as_deref()
    }

    fn video_filter(&self) -> String {
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,fps={fps}",
            w = self.width,
            h = self.height,
            fps = self.fps
        )
    }

    /// Arguments for a decode of `source`
    fn decode_args(&self, source: &Path, mode: DecodeMode) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-nostdin".to_string(),
        ];

        if mode == DecodeMode::Accelerated {
            // Read input at native rate; the queue downstream is only a few frames deep
            args.push("-re".to_string());
            if let Some(codec) = self.hardware_decoder() {
                args.push("-c:v".to_string());
                args.push(codec.to_string());
            }
        }

        args.push("-i".to_string());
        args.push(source.display().to_string());
        args.extend(
            ["-an", "-vf", &self.video_filter(), "-f", "rawvideo", "-pix_fmt", "rgba", "-"]
                .iter()
                .map(|s| s.to_string()),
        );
        args
    }

    fn spawn(&self, args: &[String]) -> Result<Child> {
        Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Decode(format!("failed to start {}: {}", self.ffmpeg.display(), e)))
    }
}

impl MediaDecoder for FfmpegDecoder {
    fn hardware_available(&self) -> bool {
        self.hardware_decoder().is_some()
    }

    fn open(&self, source: &Path, mode: DecodeMode) -> Result<Box<dyn FrameReader>> {
        if !source.is_file() {
            return Err(Error::Decode(format!("{} is not a file", source.display())));
        }
        if mode == DecodeMode::Accelerated && !self.hardware_available() {
            return Err(Error::Decode("no hardware decoder available".to_string()));
        }

        let mut child = self.spawn(&self.decode_args(source, mode))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Decode("ffmpeg stdout not captured".to_string()))?;

        debug!("Opened {} for {:?} decode", source.display(), mode);
        Ok(Box::new(FfmpegReader {
            child: Arc::new(Mutex::new(child)),
            stdout,
            width: self.width,
            height: self.height,
            seq: 0,
        }))
    }

    fn still_frame(&self, source: &Path) -> Result<VideoFrame> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-nostdin".to_string(),
            "-ss".to_string(),
            "1".to_string(),
            "-i".to_string(),
            source.display().to_string(),
        ];
        args.extend(
            ["-frames:v", "1", "-an", "-vf", &self.video_filter(), "-f", "rawvideo", "-pix_fmt", "rgba", "-"]
                .iter()
                .map(|s| s.to_string()),
        );

        let mut child = self.spawn(&args)?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Decode("ffmpeg stdout not captured".to_string()))?;

        let mut data = vec![0u8; VideoFrame::byte_len(self.width, self.height)];
        let read = stdout.read_exact(&mut data);
        let _ = child.kill();
        let _ = child.wait();

        read.map_err(|e| {
            Error::Decode(format!("no still frame from {}: {}", source.display(), e))
        })?;
        VideoFrame::from_rgba(self.width, self.height, data, 0)
    }
}

/// Reader over one ffmpeg child's stdout
struct FfmpegReader {
    child: Arc<Mutex<Child>>,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    seq: u64,
}

impl FrameReader for FfmpegReader {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>> {
        let mut data = vec![0u8; VideoFrame::byte_len(self.width, self.height)];
        match self.stdout.read_exact(&mut data) {
            Ok(()) => {
                self.seq += 1;
                VideoFrame::from_rgba(self.width, self.height, data, self.seq).map(Some)
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                // A decoder that produced nothing at all failed to decode
                if self.seq == 0 {
                    Err(Error::Decode("decoder produced no frames".to_string()))
                } else {
                    Ok(None)
                }
            }
            Err(e) => Err(Error::Decode(format!("read from decoder failed: {}", e))),
        }
    }

    fn canceller(&self) -> Canceller {
        let child = Arc::clone(&self.child);
        Canceller::new(move || {
            let _ = child.lock().unwrap().kill();
        })
    }
}

impl Drop for FfmpegReader {
    fn drop(&mut self) {
        let mut child = self.child.lock().unwrap();
        let _ = child.kill();
        let _ = child.wait();
    }
}

/// Run `ffmpeg -decoders` and return the first candidate it lists
pub fn probe_hardware_decoder(ffmpeg: &Path, candidates: &[String]) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }

    let mut child = match Command::new(ffmpeg)
        .args(["-hide_banner", "-decoders"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            warn!("Hardware decode probe could not run {}: {}", ffmpeg.display(), e);
            return None;
        }
    };

    // Drain stdout on a helper thread so a full pipe cannot stall the probe
    let mut stdout = child.stdout.take()?;
    let reader = thread::spawn(move || {
        let mut listing = String::new();
        let _ = stdout.read_to_string(&mut listing);
        listing
    });

    let deadline = Instant::now() + PROBE_TIMEOUT;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
            Ok(None) => {
                warn!("Hardware decode probe timed out after {:?}", PROBE_TIMEOUT);
                let _ = child.kill();
                let _ = child.wait();
                break;
            }
            Err(e) => {
                warn!("Hardware decode probe failed: {}", e);
                let _ = child.kill();
                break;
            }
        }
    }

    let listing = reader.join().unwrap_or_default();
    let found = find_listed_decoder(&listing, candidates);
    match &found {
        Some(name) => info!("Hardware video decoder available: {}", name),
        None => info!("No hardware video decoder found, using software decode"),
    }
    found
}

/// First candidate appearing as a decoder name in `ffmpeg -decoders` output
pub fn find_listed_decoder(listing: &str, candidates: &[String]) -> Option<String> {
    candidates
        .iter()
        .find(|candidate| {
            listing
                .lines()
                .any(|line| line.split_whitespace().nth(1) == Some(candidate.as_str()))
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
Decoders:
 V..... = Video
 ------
 V....D h264                 H.264 / AVC / MPEG-4 AVC / MPEG-4 part 10
 V..... h264_v4l2m2m         V4L2 mem2mem H.264 decoder wrapper (codec h264)
 A....D mp3                  MP3 (MPEG audio layer 3)
";

    #[test]
    fn test_find_listed_decoder() {
        let candidates = vec!["h264_mmal".to_string(), "h264_v4l2m2m".to_string()];
        assert_eq!(
            find_listed_decoder(LISTING, &candidates),
            Some("h264_v4l2m2m".to_string())
        );

        let none = vec!["h264_omx".to_string()];
        assert_eq!(find_listed_decoder(LISTING, &none), None);
    }

    #[test]
    fn test_probe_with_missing_binary_reports_none() {
        let candidates = vec!["h264_v4l2m2m".to_string()];
        assert_eq!(
            probe_hardware_decoder(Path::new("/nonexistent/ffmpeg"), &candidates),
            None
        );
    }

    #[test]
    fn test_decode_args_scale_to_display() {
        let decoder = FfmpegDecoder::new(&VideoConfig {
            display_width: 320,
            display_height: 240,
            fps: 25,
            ..VideoConfig::default()
        });
        let args = decoder.decode_args(Path::new("/videos/a.mp4"), DecodeMode::Software);
        let joined = args.join(" ");
        assert!(joined.contains("-i /videos/a.mp4"));
        assert!(joined.contains("scale=320:240"));
        assert!(joined.contains("fps=25"));
        assert!(joined.ends_with("-f rawvideo -pix_fmt rgba -"));
        assert!(!joined.contains("-re"));
    }
}
