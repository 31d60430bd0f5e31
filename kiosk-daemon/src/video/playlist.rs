//! Shuffled attract-loop playlist

use crate::error::Result;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extensions picked up when no optimized renditions exist
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "webm", "mkv"];

/// Subdirectory holding pre-transcoded renditions
const OPTIMIZED_DIR: &str = "optimized";
const OPTIMIZED_SUFFIX: &str = "_optimized.mp4";

/// Find playable sources in `dir`
///
/// `<dir>/optimized/*_optimized.mp4` wins when present; otherwise every file
/// in `dir` with a known video extension. Results are sorted for stable
/// logging; shuffling happens in [`Playlist`]. A missing directory yields an
/// empty list.
pub fn scan_sources(dir: &Path) -> Result<Vec<PathBuf>> {
    let optimized_dir = dir.join(OPTIMIZED_DIR);
    if optimized_dir.is_dir() {
        let optimized = list_files(&optimized_dir, |name| name.ends_with(OPTIMIZED_SUFFIX))?;
        if !optimized.is_empty() {
            info!(
                "Using {} optimized video(s) from {}",
                optimized.len(),
                optimized_dir.display()
            );
            return Ok(optimized);
        }
    }

    if !dir.is_dir() {
        debug!("Video directory {} does not exist", dir.display());
        return Ok(Vec::new());
    }

    let sources = list_files(dir, |name| {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    })?;
    info!("Found {} video(s) in {}", sources.len(), dir.display());
    Ok(sources)
}

fn list_files(dir: &Path, accept: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if accept(name) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Shuffled rotation over a fixed set of sources
///
/// Every source plays once per pass; each new pass is reshuffled, avoiding an
/// immediate repeat across the pass boundary when there is more than one
/// source.
#[derive(Debug, Clone)]
pub struct Playlist {
    sources: Vec<PathBuf>,
    order: Vec<usize>,
    position: usize,
    passes: u64,
    last: Option<usize>,
}

impl Playlist {
    pub fn new(sources: Vec<PathBuf>) -> Self {
        let mut playlist = Self {
            order: (0..sources.len()).collect(),
            sources,
            position: 0,
            passes: 0,
            last: None,
        };
        playlist.reshuffle();
        playlist
    }

    /// Scan `dir` and build a playlist from it
    pub fn scan(dir: &Path) -> Result<Self> {
        Ok(Self::new(scan_sources(dir)?))
    }

    fn reshuffle(&mut self) {
        let mut rng = rand::thread_rng();
        self.order.shuffle(&mut rng);

        if self.order.len() > 1 && self.order.first().copied() == self.last {
            let swap_with = self.order.len() - 1;
            self.order.swap(0, swap_with);
        }
    }

    /// Next source in the rotation, None if the playlist is empty
    pub fn next_source(&mut self) -> Option<PathBuf> {
        if self.sources.is_empty() {
            return None;
        }

        if self.position >= self.order.len() {
            self.reshuffle();
            self.position = 0;
            self.passes += 1;
            debug!("Playlist pass {} started", self.passes);
        }

        let index = self.order[self.position];
        self.position += 1;
        self.last = Some(index);
        Some(self.sources[index].clone())
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Completed passes through the whole list
    pub fn passes(&self) -> u64 {
        self.passes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sources(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("/videos/{}.mp4", i))).collect()
    }

    #[test]
    fn test_each_pass_covers_every_source() {
        let mut playlist = Playlist::new(sources(5));
        for _ in 0..3 {
            let pass: HashSet<_> = (0..5).map(|_| playlist.next_source().unwrap()).collect();
            assert_eq!(pass.len(), 5);
        }
        assert_eq!(playlist.passes(), 2);
    }

    #[test]
    fn test_no_immediate_repeat_across_passes() {
        let mut playlist = Playlist::new(sources(3));
        let mut previous = playlist.next_source().unwrap();
        for _ in 0..300 {
            let next = playlist.next_source().unwrap();
            assert_ne!(next, previous);
            previous = next;
        }
    }

    #[test]
    fn test_empty_and_single() {
        let mut empty = Playlist::new(Vec::new());
        assert!(empty.next_source().is_none());

        let mut single = Playlist::new(sources(1));
        assert_eq!(single.next_source(), single.next_source());
    }

    #[test]
    fn test_scan_prefers_optimized() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("b.MOV"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let found = scan_sources(dir.path()).unwrap();
        assert_eq!(found.len(), 2);

        std::fs::create_dir(dir.path().join("optimized")).unwrap();
        std::fs::write(dir.path().join("optimized/a_optimized.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("optimized/stray.mp4"), b"x").unwrap();

        let found = scan_sources(dir.path()).unwrap();
        assert_eq!(found, vec![dir.path().join("optimized/a_optimized.mp4")]);
    }

    #[test]
    fn test_scan_missing_directory_is_empty() {
        let found = scan_sources(Path::new("/nonexistent/kiosk/videos")).unwrap();
        assert!(found.is_empty());
    }
}
