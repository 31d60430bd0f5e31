//! # Kiosk Common Library
//!
//! Shared code for the kiosk daemon and its tooling:
//! - Event types (KioskEvent enum) and the EventBus
//! - Session state vocabulary
//! - Configuration file resolution
//! - Bounded retry helper
//! - Player identity sanitizing

pub mod config;
pub mod error;
pub mod events;
pub mod player;
pub mod retry;

pub use error::{Error, Result};
pub use events::{EventBus, KioskEvent, SessionState, TriggerSource};
