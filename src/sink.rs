//! CRC delivery to the consumer.
//!
//! `CrcRing` keeps a pre-allocated ring of recent entries per pipe. The
//! producer side runs in vblank context: it never allocates and never waits
//! on the lock. A full ring drops the new entry; so does a contended one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, TryLockError};

use serde::Serialize;

use crate::hw::PipeId;

/// Default per-pipe ring size.
pub const DEFAULT_RING_ENTRIES: usize = 128;

/// One captured CRC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CrcEntry {
    /// Vblank sequence the CRC belongs to.
    pub frame: u64,
    /// Whether `frame` is a real counter value.
    pub has_frame_counter: bool,
    pub crcs: [u32; 3],
}

/// Entry could not be stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SinkFull {
    #[error("CRC ring overflow, consumer reads too slowly")]
    Overflow,
    #[error("CRC ring busy")]
    Busy,
    #[error("no CRC ring for pipe")]
    NoRing,
}

/// Consumer of captured CRCs.
///
/// `deliver` is called from vblank context and must not block or allocate.
pub trait CrcSink: Send + Sync {
    fn deliver(&self, pipe: PipeId, entry: CrcEntry) -> Result<(), SinkFull>;
}

struct Ring {
    slots: Box<[CrcEntry]>,
    head: usize,
    tail: usize,
}

impl Ring {
    fn with_slots(slots: usize) -> Self {
        Self {
            slots: vec![CrcEntry::default(); slots].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    fn push(&mut self, entry: CrcEntry) -> bool {
        let next = (self.head + 1) % self.slots.len();
        if next == self.tail {
            return false;
        }
        self.slots[self.head] = entry;
        self.head = next;
        true
    }

    fn pop(&mut self) -> Option<CrcEntry> {
        if self.head == self.tail {
            return None;
        }
        let entry = self.slots[self.tail];
        self.tail = (self.tail + 1) % self.slots.len();
        Some(entry)
    }

    fn len(&self) -> usize {
        if self.head >= self.tail {
            self.head - self.tail
        } else {
            self.slots.len() - self.tail + self.head
        }
    }
}

struct PipeRing {
    ring: Mutex<Ring>,
    dropped: AtomicU64,
}

/// Bounded per-pipe CRC rings.
pub struct CrcRing {
    pipes: Vec<PipeRing>,
    capacity: usize,
}

impl CrcRing {
    /// Rings for `pipes` pipes holding up to `capacity` entries each.
    ///
    /// `capacity` is clamped to at least one entry.
    pub fn new(pipes: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            pipes: (0..pipes)
                .map(|_| PipeRing {
                    ring: Mutex::new(Ring::with_slots(capacity + 1)),
                    dropped: AtomicU64::new(0),
                })
                .collect(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take every queued entry for a pipe, oldest first.
    pub fn drain(&self, pipe: PipeId) -> Vec<CrcEntry> {
        let Some(slot) = self.pipes.get(pipe) else {
            return Vec::new();
        };
        let mut ring = slot
            .ring
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut out = Vec::with_capacity(ring.len());
        while let Some(entry) = ring.pop() {
            out.push(entry);
        }
        out
    }

    pub fn len(&self, pipe: PipeId) -> usize {
        self.pipes
            .get(pipe)
            .map(|slot| {
                slot.ring
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .len()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self, pipe: PipeId) -> bool {
        self.len(pipe) == 0
    }

    /// Entries dropped for a pipe because the ring was full or busy.
    pub fn dropped(&self, pipe: PipeId) -> u64 {
        self.pipes
            .get(pipe)
            .map(|slot| slot.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl CrcSink for CrcRing {
    fn deliver(&self, pipe: PipeId, entry: CrcEntry) -> Result<(), SinkFull> {
        let slot = self.pipes.get(pipe).ok_or(SinkFull::NoRing)?;
        let mut ring = match slot.ring.try_lock() {
            Ok(ring) => ring,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                slot.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(SinkFull::Busy);
            }
        };
        if ring.push(entry) {
            Ok(())
        } else {
            slot.dropped.fetch_add(1, Ordering::Relaxed);
            Err(SinkFull::Overflow)
        }
    }
}
