//! Configuration management for kioskd
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (--port, --video-dir, ...)
//! 2. Environment variables (KIOSK_PORT, KIOSK_VIDEO_DIR, ...), via clap
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)
//!
//! A missing TOML file is not an error; every field has a default.

use crate::error::{Error, Result};
use crate::triggers::secret_sequence::parse_sequence;
use crate::video::StrategyKind;
use kiosk_common::config::{default_data_dir, load_toml_or_default};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete daemon configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub game: GameConfig,
    pub video: VideoConfig,
    pub triggers: TriggersConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener (command bus transport, status, SSE)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Attempts to bind the listener before giving up
    pub bind_attempts: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: default_port(),
            bind_attempts: 3,
        }
    }
}

fn default_port() -> u16 {
    5780
}

/// Session timing and history
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Pause after game exit before the attract loop resumes
    pub grace_delay_ms: u64,
    /// Wait after the graceful stop signal before force-killing
    pub stop_grace_timeout_ms: u64,
    /// Wait after force-kill before reporting the process as stuck
    pub kill_timeout_ms: u64,
    /// Record session start/finish rows in SQLite
    pub history_enabled: bool,
    /// History database path (defaults to the data directory)
    pub history_db: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace_delay_ms: 2000,
            stop_grace_timeout_ms: 5000,
            kill_timeout_ms: 2000,
            history_enabled: true,
            history_db: None,
        }
    }
}

impl SessionConfig {
    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }

    pub fn stop_grace_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_grace_timeout_ms)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    /// Resolved history database path
    pub fn history_db_path(&self) -> PathBuf {
        self.history_db
            .clone()
            .unwrap_or_else(|| default_data_dir().join("sessions.db"))
    }
}

/// External game process launch settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub executable: PathBuf,
    /// Arguments placed before the generated ones (IWAD, sound flags, ...)
    pub base_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
    /// Let the game read controllers while another window had focus
    pub input_passthrough: bool,
    /// Directory for per-player save files
    pub save_dir: Option<PathBuf>,
    pub skill: Option<u8>,
    /// Extra environment for the game process
    pub env: BTreeMap<String, String>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("/usr/local/bin/lzdoom"),
            base_args: vec![
                "-iwad".to_string(),
                "/opt/kioskd/game/DOOM.WAD".to_string(),
            ],
            working_dir: None,
            width: 640,
            height: 480,
            fullscreen: true,
            input_passthrough: true,
            save_dir: None,
            skill: Some(3),
            env: BTreeMap::new(),
        }
    }
}

/// Attract-loop video settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub directory: PathBuf,
    pub display_width: u32,
    pub display_height: u32,
    pub fps: u32,
    /// Accelerated strategy frame queue depth
    pub buffer_capacity: usize,
    /// How long the decode thread waits for queue space before dropping the oldest frame
    pub producer_wait_ms: u64,
    /// Pre-buffered strategy window size in frames
    pub prebuffer_frames: usize,
    /// Frames served from one source before switching to the next
    pub switch_interval_frames: u64,
    /// Seconds each still is shown by the static fallback
    pub static_cycle_secs: u64,
    pub ffmpeg: PathBuf,
    /// Decoder names that indicate hardware decode support
    pub hardware_decoders: Vec<String>,
    /// Skip straight to a strategy instead of trying the preferred order
    pub strategy: Option<StrategyKind>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("/opt/kioskd/videos"),
            display_width: 1280,
            display_height: 960,
            fps: 30,
            buffer_capacity: 3,
            producer_wait_ms: 50,
            prebuffer_frames: 90,
            switch_interval_frames: 600,
            static_cycle_secs: 10,
            ffmpeg: PathBuf::from("ffmpeg"),
            hardware_decoders: vec![
                "h264_v4l2m2m".to_string(),
                "h264_mmal".to_string(),
                "h264_omx".to_string(),
            ],
            strategy: None,
        }
    }
}

/// Trigger adapters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TriggersConfig {
    pub drop_file_enabled: bool,
    pub drop_file: PathBuf,
    pub drop_poll_interval_ms: u64,
    pub secret_sequence: Vec<String>,
    /// Max gap between presses before the sequence resets
    pub secret_timeout_ms: u64,
    /// Player launched by the secret sequence
    pub secret_player: String,
    pub gamepad_enabled: bool,
}

impl Default for TriggersConfig {
    fn default() -> Self {
        Self {
            drop_file_enabled: true,
            drop_file: PathBuf::from("/tmp/kioskd/new_player.json"),
            drop_poll_interval_ms: 1000,
            secret_sequence: ["up", "up", "down", "down", "left", "right", "left", "right", "b", "a"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            secret_timeout_ms: 3000,
            secret_player: "TEST_PLAYER".to_string(),
            gamepad_enabled: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    pub level: String,
    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Values supplied on the command line (or their env fallbacks)
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub video_dir: Option<PathBuf>,
    pub game_executable: Option<PathBuf>,
    pub log_level: Option<String>,
    pub drop_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from an optional TOML file and apply overrides
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let mut config: Config = load_toml_or_default(path)?;
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides (highest priority)
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(dir) = &overrides.video_dir {
            self.video.directory = dir.clone();
        }
        if let Some(exe) = &overrides.game_executable {
            self.game.executable = exe.clone();
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
        if let Some(drop_file) = &overrides.drop_file {
            self.triggers.drop_file = drop_file.clone();
        }
    }

    /// Reject values the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.video.fps == 0 {
            return Err(Error::Config("video.fps must be greater than 0".to_string()));
        }
        if self.video.display_width == 0 || self.video.display_height == 0 {
            return Err(Error::Config("video display size must be non-zero".to_string()));
        }
        if self.video.buffer_capacity == 0 {
            return Err(Error::Config("video.buffer_capacity must be at least 1".to_string()));
        }
        if self.video.prebuffer_frames == 0 {
            return Err(Error::Config("video.prebuffer_frames must be at least 1".to_string()));
        }
        if self.game.width == 0 || self.game.height == 0 {
            return Err(Error::Config("game resolution must be non-zero".to_string()));
        }
        if self.game.executable.as_os_str().is_empty() {
            return Err(Error::Config("game.executable must be set".to_string()));
        }
        if self.triggers.secret_sequence.is_empty() {
            return Err(Error::Config("triggers.secret_sequence must not be empty".to_string()));
        }
        parse_sequence(&self.triggers.secret_sequence)
            .map_err(|e| Error::Config(format!("triggers.secret_sequence: {}", e)))?;
        if self.triggers.drop_poll_interval_ms == 0 {
            return Err(Error::Config(
                "triggers.drop_poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 5780);
        assert_eq!(config.video.prebuffer_frames, 90);
        assert_eq!(config.triggers.secret_sequence.len(), 10);
        assert_eq!(config.session.grace_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_partial_toml_keeps_section_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 6000

[game]
executable = "/opt/game/bin/doom"
base_args = ["-iwad", "/opt/game/freedoom.wad"]

[game.env]
SDL_VIDEODRIVER = "kmsdrm"

[video]
strategy = "static"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path()), &ConfigOverrides::default()).unwrap();
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.game.executable, PathBuf::from("/opt/game/bin/doom"));
        assert_eq!(config.game.env.get("SDL_VIDEODRIVER").map(String::as_str), Some("kmsdrm"));
        assert_eq!(config.game.width, 640);
        assert_eq!(config.video.strategy, Some(StrategyKind::Static));
        assert_eq!(config.video.fps, 30);
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 6000\n[logging]\nlevel = \"warn\"").unwrap();

        let overrides = ConfigOverrides {
            port: Some(7000),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        let config = Config::load(Some(file.path()), &overrides).unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[video]\nfps = 0").unwrap();

        let result = Config::load(Some(file.path()), &ConfigOverrides::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_secret_sequence_rejected() {
        let mut config = Config::default();
        config.triggers.secret_sequence.clear();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_sequence_button_rejected() {
        let mut config = Config::default();
        config.triggers.secret_sequence.push("jump".to_string());
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
