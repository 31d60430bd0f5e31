//! Game launch parameters and command construction

use crate::config::GameConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use uuid::Uuid;

/// Environment variable carrying the active player to the game
pub const PLAYER_ENV: &str = "KIOSK_PLAYER";
/// Environment variable carrying the session id to the game
pub const SESSION_ENV: &str = "KIOSK_SESSION_ID";

/// Everything needed to start one game process
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchParams {
    pub executable: PathBuf,
    pub base_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
    pub input_passthrough: bool,
    pub save_dir: Option<PathBuf>,
    pub skill: Option<u8>,
    pub env: BTreeMap<String, String>,
}

/// Per-request adjustments carried by a session proposal
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LaunchOverrides {
    /// Difficulty level (1-5)
    pub skill: Option<u8>,
}

impl From<&GameConfig> for LaunchParams {
    fn from(game: &GameConfig) -> Self {
        Self {
            executable: game.executable.clone(),
            base_args: game.base_args.clone(),
            working_dir: game.working_dir.clone(),
            width: game.width,
            height: game.height,
            fullscreen: game.fullscreen,
            input_passthrough: game.input_passthrough,
            save_dir: game.save_dir.clone(),
            skill: game.skill,
            env: game.env.clone(),
        }
    }
}

impl LaunchParams {
    /// Bare parameters for an executable (everything else off or default)
    pub fn for_executable(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            base_args: Vec::new(),
            working_dir: None,
            width: 640,
            height: 480,
            fullscreen: true,
            input_passthrough: false,
            save_dir: None,
            skill: None,
            env: BTreeMap::new(),
        }
    }

    /// Copy with proposal overrides applied
    pub fn with_overrides(&self, overrides: &LaunchOverrides) -> Self {
        let mut params = self.clone();
        if let Some(skill) = overrides.skill {
            params.skill = Some(skill.clamp(1, 5));
        }
        params
    }

    /// Command-line arguments after the executable
    ///
    /// Order: base args, resolution, window mode, skill, per-player save, identity.
    pub fn build_args(&self, player: &str) -> Vec<String> {
        let mut args = self.base_args.clone();

        args.push("-width".to_string());
        args.push(self.width.to_string());
        args.push("-height".to_string());
        args.push(self.height.to_string());

        args.push(if self.fullscreen { "-fullscreen" } else { "-windowed" }.to_string());

        if let Some(skill) = self.skill {
            args.push("-skill".to_string());
            args.push(skill.to_string());
        }

        if let Some(save_dir) = &self.save_dir {
            args.push("-save".to_string());
            args.push(save_dir.join(format!("{}.dsg", player)).display().to_string());
        }

        args.push("+name".to_string());
        args.push(player.to_string());

        args
    }

    /// Environment for the game process
    pub fn build_env(&self, player: &str, session_id: Uuid) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        env.insert(PLAYER_ENV.to_string(), player.to_string());
        env.insert(SESSION_ENV.to_string(), session_id.to_string());
        if self.input_passthrough {
            env.entry("SDL_JOYSTICK_ALLOW_BACKGROUND_EVENTS".to_string())
                .or_insert_with(|| "1".to_string());
        }
        env
    }

    /// Build the process command
    pub fn build_command(&self, player: &str, session_id: Uuid) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(self.build_args(player));
        cmd.envs(self.build_env(player, session_id));
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        // Controllers are read by the game directly, never through our stdin
        cmd.stdin(Stdio::null());
        cmd
    }
}
