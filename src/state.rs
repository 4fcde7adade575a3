//! Per-pipe capture state.
//!
//! Shared between the control path (serialized by the device lock) and the
//! vblank path, which must not block. Both fields are atomics: the control
//! path publishes the warm-up count before the source so a vblank that sees
//! the new source also sees a full warm-up.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::source::CaptureSource;

/// Vblanks discarded after capture is (re)enabled.
pub const WARMUP_FRAMES: u8 = 2;

#[derive(Debug)]
pub struct CaptureState {
    active_source: AtomicU8,
    warmup_remaining: AtomicU8,
}

impl CaptureState {
    pub fn new() -> Self {
        Self {
            active_source: AtomicU8::new(CaptureSource::None.to_raw()),
            warmup_remaining: AtomicU8::new(WARMUP_FRAMES),
        }
    }

    pub fn active_source(&self) -> CaptureSource {
        CaptureSource::from_raw(self.active_source.load(Ordering::Acquire))
    }

    pub fn warmup_remaining(&self) -> u8 {
        self.warmup_remaining.load(Ordering::Acquire)
    }

    /// Publish a completed transition.
    pub(crate) fn commit(&self, source: CaptureSource) {
        self.warmup_remaining.store(WARMUP_FRAMES, Ordering::Release);
        self.active_source.store(source.to_raw(), Ordering::Release);
    }

    /// Consume one warm-up frame. Returns false once warm-up is over.
    ///
    /// The counter stops at zero.
    pub(crate) fn take_warmup(&self) -> bool {
        self.warmup_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| {
                left.checked_sub(1)
            })
            .is_ok()
    }
}

impl Default for CaptureState {
    fn default() -> Self {
        Self::new()
    }
}
