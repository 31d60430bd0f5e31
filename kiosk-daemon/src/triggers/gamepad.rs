//! Gamepad input for the secret sequence (feature `gamepad`)
//!
//! gilrs is polled on its own thread; button presses are mapped to
//! [`InputButton`]s and forwarded to the secret-sequence listener.

use super::secret_sequence::InputButton;
use gilrs::{Button, EventType, Gilrs};
use kiosk_common::retry::{retry_blocking, RetryPolicy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// D-pad for directions, East for `b`, South for `a`
pub fn map_button(button: Button) -> Option<InputButton> {
    match button {
        Button::DPadUp => Some(InputButton::Up),
        Button::DPadDown => Some(InputButton::Down),
        Button::DPadLeft => Some(InputButton::Left),
        Button::DPadRight => Some(InputButton::Right),
        Button::South => Some(InputButton::A),
        Button::East => Some(InputButton::B),
        Button::Start => Some(InputButton::Start),
        Button::Select => Some(InputButton::Select),
        _ => None,
    }
}

pub struct GamepadInput {
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl GamepadInput {
    /// Start polling gamepads; presses go to `tx`
    pub fn start(tx: mpsc::Sender<InputButton>) -> std::io::Result<Self> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_flag);
        let thread = thread::Builder::new()
            .name("gamepad-input".to_string())
            .spawn(move || poll_loop(tx, thread_stop))?;

        Ok(Self {
            stop_flag,
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if let Err(e) = handle.join() {
                error!("Gamepad thread join failed: {:?}", e);
            }
        }
    }
}

impl Drop for GamepadInput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop(tx: mpsc::Sender<InputButton>, stop_flag: Arc<AtomicBool>) {
    // Gilrs is not Send, so it lives and dies on this thread
    let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
    let mut gilrs = match retry_blocking(&policy, "gamepad init", |_| Gilrs::new()) {
        Ok(gilrs) => gilrs,
        Err(e) => {
            warn!("Gamepad input unavailable: {}", e);
            return;
        }
    };

    for (_id, gamepad) in gilrs.gamepads() {
        info!("Gamepad connected: {}", gamepad.name());
    }

    while !stop_flag.load(Ordering::Acquire) {
        while let Some(event) = gilrs.next_event() {
            match event.event {
                EventType::ButtonPressed(button, _) => {
                    let Some(input) = map_button(button) else {
                        continue;
                    };
                    if tx.try_send(input).is_err() {
                        debug!("Dropping gamepad press {}: listener busy or gone", input);
                    }
                }
                EventType::Connected => info!("Gamepad {:?} connected", event.id),
                EventType::Disconnected => info!("Gamepad {:?} disconnected", event.id),
                _ => {}
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
    debug!("Gamepad thread exiting");
}
