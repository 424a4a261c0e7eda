//! Caller-side pacing for manual playback

use std::time::Duration;

use crate::error::Result;
use crate::playback::OutputScheduler;

/// Keeps at most `queue_length` fed frames in flight on a manual scheduler.
///
/// After each feed it waits for the frame `queue_length` positions back to
/// complete, which locks the caller's production rate to the device clock.
pub struct OutputPacer {
    queue_length: u64,
    timeout: Duration,
    fed: u64,
}

impl OutputPacer {
    pub fn new(queue_length: usize, timeout: Duration) -> Self {
        Self {
            queue_length: queue_length as u64,
            timeout,
            fed: 0,
        }
    }

    pub fn fed(&self) -> u64 {
        self.fed
    }

    /// Feed one frame, then block until the in-flight window has room
    pub fn feed(&mut self, scheduler: &OutputScheduler, data: &[u8]) -> Result<()> {
        scheduler.feed(data)?;
        self.fed += 1;

        if self.fed < self.queue_length {
            return Ok(());
        }
        scheduler.wait_completion(self.fed - self.queue_length, self.timeout)
    }
}
