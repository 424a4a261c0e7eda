//! Bounded ring buffer for frame pipeline

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;
use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;

use crate::capture::FrameBuffer;
use crate::device::DeviceFormat;
use crate::error::{Error, Result};

/// Fixed-capacity FIFO of frames that keeps the oldest entries on overflow.
///
/// Not synchronized on its own: the owner keeps it behind its instance lock.
/// Counters are atomics so they can be read without that lock.
pub struct FrameRing {
    /// Ring buffer for the frames themselves
    ring: HeapRb<FrameBuffer>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicU64,
    frames_read: AtomicU64,
    frames_dropped: AtomicU64,
}

impl FrameRing {
    /// `capacity` must be at least 1
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: append a frame, or discard it when full
    pub fn push(&mut self, frame: FrameBuffer) -> Result<()> {
        if self.ring.try_push(frame).is_err() {
            // Drop the newcomer, the queued frames stay
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return Err(Error::QueueOverflow);
        }
        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Producer: copy `data` into a new frame and append it.
    ///
    /// Nothing is allocated when the ring is already full.
    pub fn push_copy(&mut self, format: &DeviceFormat, data: &[u8]) -> Result<()> {
        let expected = format.frame_data_size();
        if data.len() != expected {
            return Err(Error::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        if self.ring.is_full() {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return Err(Error::QueueOverflow);
        }
        self.push(FrameBuffer::copy_from(format, data)?)
    }

    /// Consumer: pop the oldest frame
    pub fn pop(&mut self) -> Option<FrameBuffer> {
        let frame = self.ring.try_pop()?;
        self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    pub fn oldest(&self) -> Option<&FrameBuffer> {
        self.ring.try_peek()
    }

    /// Drop every queued frame, returning how many were discarded
    pub fn clear(&mut self) -> usize {
        self.ring.clear()
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity().get()
    }

    /// (written, read, dropped)
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.stats.frames_written.load(Ordering::Relaxed),
            self.stats.frames_read.load(Ordering::Relaxed),
            self.stats.frames_dropped.load(Ordering::Relaxed),
        )
    }

    pub fn dropped(&self) -> u64 {
        self.stats.frames_dropped.load(Ordering::Relaxed)
    }
}
