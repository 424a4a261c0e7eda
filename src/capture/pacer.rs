//! Receiver-side playout control.
//!
//! Decides, once per render tick, which queued frame is current. It keeps a
//! small cushion of frames in the queue, trims the queue when it grows past
//! that cushion and falls back to prerolling on underrun.

use std::time::Duration;

use tracing::debug;

use crate::capture::IngestQueue;
use crate::drop_detector::DropDetector;

/// Field of an interlaced frame that should be shown this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// First field of a newly current frame
    Odd,
    /// Second field, no new frame this tick
    Even,
}

pub struct IngestPacer {
    queue_length: usize,
    frame_time: f64,
    prerolled: bool,
    detector: DropDetector,
}

impl IngestPacer {
    /// `queue_length` is the cushion kept ahead of the current frame
    pub fn new(name: impl Into<String>, queue_length: usize) -> Self {
        Self {
            queue_length: queue_length.max(1),
            frame_time: 0.0,
            prerolled: false,
            detector: DropDetector::new(name),
        }
    }

    pub fn with_detector(queue_length: usize, detector: DropDetector) -> Self {
        Self {
            queue_length: queue_length.max(1),
            frame_time: 0.0,
            prerolled: false,
            detector,
        }
    }

    /// Most frames allowed in the queue before trimming
    pub fn max_queued(&self) -> usize {
        self.queue_length + self.queue_length.min(3)
    }

    pub fn is_prerolled(&self) -> bool {
        self.prerolled
    }

    /// Advance by `delta` and dequeue the frames that fell behind.
    ///
    /// Returns `None` while nothing should be shown yet. Otherwise the oldest
    /// queued frame is current and the returned field says which half of it.
    pub fn update(&mut self, queue: &IngestQueue, delta: Duration) -> Option<Field> {
        self.detector.update(queue.dropped_count());

        if queue.count_queued() == 0 {
            return None;
        }

        if !self.prerolled {
            if queue.count_queued() < 1 + self.queue_length {
                return None;
            }
            debug!("Preroll complete with {} frames", queue.count_queued());
            self.prerolled = true;
        }

        // Over-queuing recovery
        while queue.count_queued() > self.max_queued() {
            queue.dequeue_frame();
            self.detector.warn();
        }

        let frame_rate = queue.frame_rate();
        if frame_rate <= 0.0 {
            return None;
        }
        let duration = 1.0 / frame_rate;

        self.frame_time += delta.as_secs_f64();
        let mut field = Field::Even;

        while self.frame_time >= duration {
            // Underrun: keep the last frame and preroll again
            if queue.count_queued() <= 1 {
                debug!("Ingest underrun, prerolling again");
                self.prerolled = false;
                self.detector.warn();
                break;
            }

            queue.dequeue_frame();
            self.frame_time -= duration;
            field = Field::Odd;
        }

        Some(field)
    }
}
