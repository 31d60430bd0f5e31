//! # Kiosk Session Daemon Library (kioskd)
//!
//! Runs an arcade-style kiosk: an attract loop of background video while
//! idle, and one external game process per player session.
//!
//! **Architecture:**
//! - [`session::SessionOrchestrator`] owns the state machine and hands the
//!   display back and forth between the attract loop and the game
//! - [`supervisor::ProcessSupervisor`] spawns, monitors and stops the game
//! - [`video::DecodePipeline`] supplies attract-loop frames with graceful
//!   strategy fallback
//! - [`triggers`] turn command bus messages, drop files and secret button
//!   sequences into session proposals
//! - [`api`] exposes the command bus, status and an SSE event stream over HTTP

pub mod api;
pub mod config;
pub mod display;
pub mod error;
pub mod session;
pub mod supervisor;
pub mod triggers;
pub mod video;

pub use config::Config;
pub use error::{Error, Result};
pub use session::SessionOrchestrator;
