//! Live taps on a pipe's fill stream.
//!
//! A tap receives every Nth filled frame over a bounded channel so a preview
//! renderer can follow the stream without draining it. Delivery never blocks the
//! producer: when a tap's channel is full the frame is dropped and counted.

use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default channel capacity for tap consumers (number of frames buffered)
pub const DEFAULT_TAP_CHANNEL_SIZE: usize = 16;

/// Scalars of one filled frame, shared between every tap that receives it.
pub type TapFrame = Arc<[f64]>;

/// A tap consumer that receives every Nth frame from the pipe.
#[derive(Debug)]
pub struct TapConsumer {
    /// Unique identifier for this tap
    pub id: String,

    /// Deliver every nth frame (1 = every frame, 10 = every 10th frame)
    pub nth_frame: usize,

    frame_count: AtomicU64,

    // try_send only; a slow consumer must never stall a fill
    sender: mpsc::Sender<TapFrame>,

    dropped_frames: AtomicU64,
}

impl TapConsumer {
    /// Create a new tap consumer
    pub fn new(id: String, nth_frame: usize, sender: mpsc::Sender<TapFrame>) -> Self {
        Self {
            id,
            nth_frame: nth_frame.max(1),
            frame_count: AtomicU64::new(0),
            sender,
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Check if this frame should be delivered based on nth_frame setting
    pub fn should_deliver(&self) -> bool {
        let count = self.frame_count.fetch_add(1, Ordering::Relaxed);
        count % self.nth_frame as u64 == 0
    }

    /// Attempt to send a frame without blocking.
    /// Returns true if sent, false if dropped because the channel is full or closed.
    pub fn try_send_frame(&self, frame: TapFrame) -> bool {
        match self.sender.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Frames dropped because the consumer fell behind.
    pub fn dropped_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Whether the receiving half has been dropped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Registry for managing active taps
#[derive(Debug)]
pub struct TapRegistry {
    taps: RwLock<HashMap<String, Arc<TapConsumer>>>,
    channel_size: usize,
}

impl Default for TapRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TapRegistry {
    /// Registry whose taps buffer [`DEFAULT_TAP_CHANNEL_SIZE`] frames.
    pub fn new() -> Self {
        Self::with_channel_size(DEFAULT_TAP_CHANNEL_SIZE)
    }

    /// Registry whose taps buffer `channel_size` frames.
    pub fn with_channel_size(channel_size: usize) -> Self {
        Self {
            taps: RwLock::new(HashMap::new()),
            channel_size: channel_size.max(1),
        }
    }

    /// Register a new tap
    pub fn register(&self, id: String, nth_frame: usize) -> Result<mpsc::Receiver<TapFrame>> {
        let mut taps = self.taps.write();

        if taps.contains_key(&id) {
            return Err(anyhow!("Tap with ID '{}' already exists", id));
        }

        let (tx, rx) = mpsc::channel(self.channel_size);
        let tap = Arc::new(TapConsumer::new(id.clone(), nth_frame, tx));
        taps.insert(id, tap);

        Ok(rx)
    }

    /// Unregister a tap
    pub fn unregister(&self, id: &str) -> bool {
        self.taps.write().remove(id).is_some()
    }

    /// Offer a filled frame to every tap.
    ///
    /// The scalars are copied into a shared buffer once, and only if at least one tap
    /// wants this frame. Returns true when some tap's receiver has gone away, so the
    /// caller can [`prune_closed`](Self::prune_closed).
    pub fn notify_all(&self, scalars: &[f64]) -> bool {
        let taps = self.taps.read();
        if taps.is_empty() {
            return false;
        }

        let mut frame: Option<TapFrame> = None;
        let mut saw_closed = false;
        for tap in taps.values() {
            if tap.is_closed() {
                saw_closed = true;
                continue;
            }
            if tap.should_deliver() {
                let shared = frame.get_or_insert_with(|| Arc::from(scalars));
                tap.try_send_frame(Arc::clone(shared));
            }
        }
        saw_closed
    }

    /// Get count of active taps
    pub fn count(&self) -> usize {
        self.taps.read().len()
    }

    /// List all taps as (id, nth_frame, dropped_frames)
    pub fn list(&self) -> Vec<(String, usize, u64)> {
        let mut list: Vec<_> = self
            .taps
            .read()
            .values()
            .map(|t| (t.id.clone(), t.nth_frame, t.dropped_count()))
            .collect();
        list.sort();
        list
    }

    /// Remove taps whose receivers have gone away. Returns how many were removed.
    pub fn prune_closed(&self) -> usize {
        let mut taps = self.taps.write();
        let before = taps.len();
        taps.retain(|_, tap| !tap.is_closed());
        before - taps.len()
    }
}
