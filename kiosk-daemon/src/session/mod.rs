//! Kiosk session lifecycle
//!
//! - [`SessionOrchestrator`]: the state machine and sole arbiter of the display hand-off
//! - [`observers`]: transition notifications (event bus forwarding)
//! - [`history`]: SQLite session log fed by an observer

pub mod history;
pub mod observers;
mod orchestrator;

pub use history::{spawn_history_writer, SessionHistory, SessionRecord};
pub use observers::{event_bus_observer, Observer, StateChange};
pub use orchestrator::{RequestOutcome, SessionOrchestrator, SessionSnapshot};

/// Background playback the orchestrator hands the display back and forth with
///
/// Both calls must be idempotent. `suspend` returns only once playback has
/// released every decode resource.
pub trait BackgroundPlayback: Send + Sync {
    fn suspend(&self);
    fn resume(&self);
}
