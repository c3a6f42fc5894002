//! Bounded frame buffer with drop-oldest backpressure.
//!
//! The producer never waits: when the buffer holds `capacity` frames, publishing evicts the
//! oldest one first. Alongside the queue the buffer keeps a latest-frame cell (a
//! `tokio::sync::watch` channel). Every client worker subscribes to that cell and sees the
//! newest frame independently, so clients never compete for the same queued entry.
//!
//! Nothing in the station drains the queue. It is a bounded window of recent frames whose
//! fill level and eviction count are reported in the station status.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;

/// One encoded frame ready for the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    /// Monotonic capture counter
    pub sequence: u64,
    /// Capture timestamp
    pub captured_at: DateTime<Utc>,
    /// Base64 text of the JPEG image
    pub payload: Bytes,
}

impl EncodedFrame {
    /// Build a frame stamped with the current time
    pub fn new(sequence: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            captured_at: Utc::now(),
            payload: payload.into(),
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Drop-oldest frame queue plus a broadcast latest-frame cell
pub struct FrameBuffer {
    capacity: usize,
    frames: Mutex<VecDeque<EncodedFrame>>,
    latest: watch::Sender<Option<EncodedFrame>>,
    evicted: AtomicU64,
}

impl FrameBuffer {
    /// Create a buffer holding at most `capacity` frames (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (latest, _) = watch::channel(None);
        Self {
            capacity,
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            latest,
            evicted: AtomicU64::new(0),
        }
    }

    /// Insert a frame, evicting the oldest when full
    ///
    /// Returns the evicted frame, if any. Never blocks on consumers.
    pub fn publish(&self, frame: EncodedFrame) -> Option<EncodedFrame> {
        let evicted = match self.frames.lock() {
            Ok(mut frames) => {
                let evicted = if frames.len() >= self.capacity {
                    frames.pop_front()
                } else {
                    None
                };
                frames.push_back(frame.clone());
                evicted
            }
            Err(_) => None,
        };

        if evicted.is_some() {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        self.latest.send_replace(Some(frame));
        evicted
    }

    #[cfg(test)]
    fn take_oldest(&self) -> Option<EncodedFrame> {
        self.frames.lock().ok().and_then(|mut frames| frames.pop_front())
    }

    /// The most recently published frame, without removing anything
    pub fn latest(&self) -> Option<EncodedFrame> {
        self.latest.borrow().clone()
    }

    /// Number of buffered frames
    pub fn len(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or_default()
    }

    /// Whether no frame is buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of buffered frames
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames dropped to make room since creation
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Per-client view of the latest-frame cell
    ///
    /// A frame published before the subscription counts as fresh, so a new client gets a
    /// picture on its first cycle.
    pub fn subscribe(&self) -> FrameSubscriber {
        let mut rx = self.latest.subscribe();
        if rx.borrow().is_some() {
            rx.mark_changed();
        }
        FrameSubscriber { rx }
    }
}

/// A single client's latest-frame cell
///
/// Holds no frames of its own: it only remembers which publication it has already seen.
#[derive(Debug, Clone)]
pub struct FrameSubscriber {
    rx: watch::Receiver<Option<EncodedFrame>>,
}

impl FrameSubscriber {
    /// The newest frame if it was published since the last call, otherwise `None`
    pub fn take_fresh(&mut self) -> Option<EncodedFrame> {
        match self.rx.has_changed() {
            Ok(true) => self.rx.borrow_and_update().clone(),
            _ => None,
        }
    }

    /// Wait for the next publication
    ///
    /// Returns `None` once the buffer has been dropped.
    pub async fn next_frame(&mut self) -> Option<EncodedFrame> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }
}
