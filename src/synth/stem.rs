//! Per-voice output taps for stem recording
//!
//! The audio thread pushes each voice's frame into its tap; a recorder on
//! the control side drains it. The audio side only ever `try_lock`s, so a
//! busy recorder costs dropped frames, never a stalled callback.

use super::frame::Frame;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Frames a tap holds before it starts dropping (about 20s at 48 kHz)
const MAX_BUFFERED_FRAMES: usize = 1 << 20;

struct TapInner {
    entity_id: String,
    armed: AtomicBool,
    closed: AtomicBool,
    dropped: AtomicU64,
    buffer: Mutex<Vec<Frame>>,
}

/// Shared handle to one voice's isolated output
#[derive(Clone)]
pub struct StemTap {
    inner: Arc<TapInner>,
}

impl StemTap {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TapInner {
                entity_id: entity_id.into(),
                armed: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
                buffer: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.inner.entity_id
    }

    /// Start capturing frames
    pub fn arm(&self) {
        self.inner.armed.store(true, Ordering::Release);
    }

    pub fn disarm(&self) {
        self.inner.armed.store(false, Ordering::Release);
    }

    pub fn is_armed(&self) -> bool {
        self.inner.armed.load(Ordering::Acquire)
    }

    /// Mark the owning voice as gone. Buffered frames can still be drained.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.disarm();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Frames lost to lock contention or a full buffer
    pub fn dropped_frames(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Audio side: capture a frame if armed
    pub fn push(&self, frame: Frame) {
        if !self.is_armed() {
            return;
        }
        match self.inner.buffer.try_lock() {
            Ok(mut buffer) if buffer.len() < MAX_BUFFERED_FRAMES => buffer.push(frame),
            _ => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Control side: take everything captured so far
    pub fn drain(&self) -> Vec<Frame> {
        match self.inner.buffer.lock() {
            Ok(mut buffer) => std::mem::take(&mut *buffer),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Whether two handles point at the same tap
    pub fn same_tap(&self, other: &StemTap) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for StemTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StemTap")
            .field("entity_id", &self.inner.entity_id)
            .field("armed", &self.is_armed())
            .field("closed", &self.is_closed())
            .finish()
    }
}
