//! Bounded decode buffer between a decode thread and the display
//!
//! ```text
//! decode thread → push_frame() → DecodeBuffer (capacity N) → get_frame() → display
//! ```
//!
//! - Producer waits a bounded time for space, then drops the oldest frame
//! - Consumer never blocks; an empty buffer yields the last frame handed out
//! - `close()` wakes a waiting producer so decode threads can exit promptly

use super::frame::VideoFrame;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Result of pushing a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Frame queued without loss
    Queued,
    /// Queue stayed full; the oldest frame was discarded to make room
    DroppedOldest,
    /// Buffer is closed; frame discarded
    Closed,
}

/// Returned when the consumer reads an empty buffer
#[derive(Debug, Error)]
#[error("Decode buffer empty")]
pub struct BufferEmptyError {
    /// Last frame handed to the consumer, if any
    pub last_frame: Option<Arc<VideoFrame>>,
}

/// Counter snapshot for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStatistics {
    pub capacity: usize,
    pub occupied: usize,
    pub pushed: u64,
    pub popped: u64,
    pub dropped: u64,
}

/// Fixed-capacity frame queue
///
/// The ring buffer is split into producer and consumer halves at construction,
/// each behind its own mutex. The producer only touches the consumer half to
/// read occupancy or evict the oldest frame.
pub struct DecodeBuffer {
    prod: Mutex<HeapProd<Arc<VideoFrame>>>,
    cons: Mutex<HeapCons<Arc<VideoFrame>>>,
    capacity: usize,
    /// Paired with `space_available` for producer backpressure
    space_lock: Mutex<()>,
    space_available: Condvar,
    closed: AtomicBool,
    last_frame: Mutex<Option<Arc<VideoFrame>>>,
    total_pushed: AtomicU64,
    total_popped: AtomicU64,
    total_dropped: AtomicU64,
}

impl std::fmt::Debug for DecodeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeBuffer")
            .field("capacity", &self.capacity)
            .field("occupied", &self.occupied())
            .field("closed", &self.is_closed())
            .field("dropped", &self.total_dropped.load(Ordering::Relaxed))
            .finish()
    }
}

impl DecodeBuffer {
    /// Create an empty buffer holding at most `capacity` frames (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (prod, cons) = HeapRb::<Arc<VideoFrame>>::new(capacity).split();
        Self {
            prod: Mutex::new(prod),
            cons: Mutex::new(cons),
            capacity,
            space_lock: Mutex::new(()),
            space_available: Condvar::new(),
            closed: AtomicBool::new(false),
            last_frame: Mutex::new(None),
            total_pushed: AtomicU64::new(0),
            total_popped: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
        }
    }

    /// Push a frame, waiting up to `wait` for space before evicting the oldest
    pub fn push_frame(&self, frame: Arc<VideoFrame>, wait: Duration) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Closed;
        }

        let frame = match self.try_push(frame) {
            Ok(()) => return PushOutcome::Queued,
            Err(frame) => frame,
        };

        // Backpressure: give the consumer a bounded chance to make room
        {
            let guard = self.space_lock.lock().unwrap();
            let _ = self
                .space_available
                .wait_timeout_while(guard, wait, |_| {
                    self.occupied() >= self.capacity && !self.is_closed()
                })
                .unwrap();
        }

        if self.is_closed() {
            return PushOutcome::Closed;
        }

        let frame = match self.try_push(frame) {
            Ok(()) => return PushOutcome::Queued,
            Err(frame) => frame,
        };

        // Still full: evict oldest so the display never falls further behind
        if self.cons.lock().unwrap().try_pop().is_some() {
            self.total_dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Decode buffer full, dropped oldest frame");
        }

        match self.try_push(frame) {
            Ok(()) => PushOutcome::DroppedOldest,
            Err(_) => {
                // Lost a race with another producer; count the new frame as dropped
                self.total_dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::DroppedOldest
            }
        }
    }

    fn try_push(&self, frame: Arc<VideoFrame>) -> Result<(), Arc<VideoFrame>> {
        self.prod.lock().unwrap().try_push(frame)?;
        self.total_pushed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Pop the next frame without blocking
    pub fn pop_frame(&self) -> Result<Arc<VideoFrame>, BufferEmptyError> {
        let popped = self.cons.lock().unwrap().try_pop();

        match popped {
            Some(frame) => {
                self.total_popped.fetch_add(1, Ordering::Relaxed);
                *self.last_frame.lock().unwrap() = Some(Arc::clone(&frame));

                // Wake a producer waiting for space
                let _guard = self.space_lock.lock().unwrap();
                self.space_available.notify_one();

                Ok(frame)
            }
            None => Err(BufferEmptyError {
                last_frame: self.last_frame.lock().unwrap().clone(),
            }),
        }
    }

    /// Next frame, or the last one handed out when empty
    ///
    /// Returns None only before the first frame ever arrives.
    pub fn get_frame(&self) -> Option<Arc<VideoFrame>> {
        match self.pop_frame() {
            Ok(frame) => Some(frame),
            Err(empty) => empty.last_frame,
        }
    }

    /// Refuse further pushes and wake any waiting producer
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _guard = self.space_lock.lock().unwrap();
        self.space_available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Discard queued frames and the cached last frame
    pub fn drain(&self) {
        self.cons.lock().unwrap().clear();
        *self.last_frame.lock().unwrap() = None;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently queued, read from the ring itself
    pub fn occupied(&self) -> usize {
        self.cons.lock().unwrap().occupied_len()
    }

    pub fn statistics(&self) -> BufferStatistics {
        BufferStatistics {
            capacity: self.capacity,
            occupied: self.occupied(),
            pushed: self.total_pushed.load(Ordering::Relaxed),
            popped: self.total_popped.load(Ordering::Relaxed),
            dropped: self.total_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn frame(seq: u64) -> Arc<VideoFrame> {
        Arc::new(VideoFrame::from_rgba(1, 1, vec![0, 0, 0, 255], seq).unwrap())
    }

    #[test]
    fn test_buffer_starts_empty() {
        let buffer = DecodeBuffer::new(3);
        assert_eq!(buffer.capacity(), 3);
        assert_eq!(buffer.occupied(), 0);
        assert!(buffer.get_frame().is_none());
        assert!(buffer.pop_frame().unwrap_err().last_frame.is_none());
    }

    #[test]
    fn test_fifo_order() {
        let buffer = DecodeBuffer::new(3);
        for seq in 1..=3 {
            assert_eq!(buffer.push_frame(frame(seq), Duration::ZERO), PushOutcome::Queued);
        }
        assert_eq!(buffer.pop_frame().unwrap().seq, 1);
        assert_eq!(buffer.pop_frame().unwrap().seq, 2);
        assert_eq!(buffer.pop_frame().unwrap().seq, 3);
    }

    #[test]
    fn test_empty_returns_last_frame() {
        let buffer = DecodeBuffer::new(3);
        buffer.push_frame(frame(7), Duration::ZERO);
        assert_eq!(buffer.get_frame().unwrap().seq, 7);

        // Repeated reads of an empty buffer keep returning the last frame
        assert_eq!(buffer.get_frame().unwrap().seq, 7);
        assert_eq!(buffer.pop_frame().unwrap_err().last_frame.unwrap().seq, 7);
    }

    #[test]
    fn test_full_buffer_drops_oldest_after_wait() {
        let buffer = DecodeBuffer::new(2);
        buffer.push_frame(frame(1), Duration::ZERO);
        buffer.push_frame(frame(2), Duration::ZERO);

        let start = Instant::now();
        let outcome = buffer.push_frame(frame(3), Duration::from_millis(30));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(outcome, PushOutcome::DroppedOldest);

        assert_eq!(buffer.occupied(), 2);
        assert_eq!(buffer.pop_frame().unwrap().seq, 2);
        assert_eq!(buffer.pop_frame().unwrap().seq, 3);
        assert_eq!(buffer.statistics().dropped, 1);
    }

    #[test]
    fn test_waiting_producer_woken_by_consumer() {
        let buffer = Arc::new(DecodeBuffer::new(1));
        buffer.push_frame(frame(1), Duration::ZERO);

        let consumer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                buffer.pop_frame().unwrap().seq
            })
        };

        let outcome = buffer.push_frame(frame(2), Duration::from_secs(5));
        assert_eq!(outcome, PushOutcome::Queued);
        assert_eq!(consumer.join().unwrap(), 1);
        assert_eq!(buffer.statistics().dropped, 0);
    }

    #[test]
    fn test_close_releases_waiting_producer() {
        let buffer = Arc::new(DecodeBuffer::new(1));
        buffer.push_frame(frame(1), Duration::ZERO);

        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.push_frame(frame(2), Duration::from_secs(30)))
        };

        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        buffer.close();
        assert_eq!(producer.join().unwrap(), PushOutcome::Closed);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_drain_clears_last_frame() {
        let buffer = DecodeBuffer::new(2);
        buffer.push_frame(frame(1), Duration::ZERO);
        buffer.push_frame(frame(2), Duration::ZERO);
        buffer.get_frame();
        buffer.drain();
        assert_eq!(buffer.occupied(), 0);
        assert!(buffer.get_frame().is_none());
    }

    #[test]
    fn test_occupancy_stays_within_capacity_under_contention() {
        let buffer = Arc::new(DecodeBuffer::new(4));
        let done = Arc::new(AtomicBool::new(false));

        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for seq in 0..2000 {
                    buffer.push_frame(frame(seq), Duration::ZERO);
                }
            })
        };
        let consumer = {
            let buffer = Arc::clone(&buffer);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let _ = buffer.pop_frame();
                }
            })
        };

        while !producer.is_finished() {
            let occupied = buffer.occupied();
            assert!(occupied <= buffer.capacity(), "occupied {} exceeds capacity", occupied);
        }
        producer.join().unwrap();
        done.store(true, Ordering::Release);
        consumer.join().unwrap();

        while buffer.pop_frame().is_ok() {}
        assert_eq!(buffer.occupied(), 0);
        let stats = buffer.statistics();
        assert_eq!(stats.popped + stats.dropped, 2000);
    }
}
