//! Capture-side frame queue.
//!
//! The device's capture thread pushes frames in through [`InputCallback`];
//! consumer threads drain them in arrival order. The queue only absorbs
//! jitter between the two clocks. When the consumer falls behind, new frames
//! are discarded and counted, so memory stays bounded and the producer never
//! waits on anything but an O(copy) critical section.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{info, instrument, trace, warn};

use crate::capture::FrameBuffer;
use crate::device::{
    DeviceDirectory, DeviceFormat, DisplayMode, InputCallback, RawFrame, VideoInput,
};
use crate::error::{Error, Result, StickyError};
use crate::format_change::{FormatChangeController, FormatTarget};
use crate::pipeline::FrameRing;
use crate::utils;

/// Default number of frames the queue holds
pub const DEFAULT_CAPACITY: usize = 8;

/// Snapshot of queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub queued: usize,
    pub capacity: usize,
    pub received: u64,
    pub consumed: u64,
    pub dropped: u64,
    pub mismatched: u64,
    pub flushed: u64,
}

struct IngestState {
    ring: FrameRing,
    mode: Option<DisplayMode>,
    streaming: bool,
}

/// State shared between the consumer-facing queue and the device callback
struct IngestShared {
    state: Mutex<IngestState>,
    arrived: Condvar,
    error: StickyError,
    mismatched: AtomicU64,
    flushed: AtomicU64,
}

impl IngestShared {
    fn enqueue(&self, frame: RawFrame<'_>) -> Result<()> {
        let mut state = self.state.lock();
        if !state.streaming {
            return Err(Error::NotRunning);
        }
        let format = state
            .mode
            .as_ref()
            .map(|mode| mode.format)
            .ok_or(Error::NotRunning)?;

        let expected = format.frame_data_size();
        if frame.width != format.width
            || frame.height != format.height
            || frame.bytes.len() != expected
        {
            return Err(Error::SizeMismatch {
                expected,
                actual: frame.bytes.len(),
            });
        }

        state.ring.push_copy(&format, frame.bytes)?;
        drop(state);

        self.arrived.notify_all();
        Ok(())
    }

    fn shut_down(&self) {
        let mut state = self.state.lock();
        state.streaming = false;
        state.ring.clear();
        state.mode = None;
        drop(state);
        self.arrived.notify_all();
    }
}

impl InputCallback for IngestShared {
    fn frame_arrived(&self, frame: RawFrame<'_>) {
        match self.enqueue(frame) {
            Ok(()) => metrics::counter!("frameport_ingest_frames_total").increment(1),
            Err(Error::QueueOverflow) => {
                trace!("Ingest queue full, frame dropped");
                metrics::counter!("frameport_ingest_dropped_total").increment(1);
            }
            Err(Error::SizeMismatch { expected, actual }) => {
                trace!("Discarding frame of {} bytes, expected {}", actual, expected);
                self.mismatched.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("frameport_ingest_mismatched_total").increment(1);
            }
            Err(_) => {}
        }
    }

    fn format_changed(&self, input: &dyn VideoInput, mode: DisplayMode) {
        if self.error.is_set() {
            return;
        }
        // Failure is recorded as the sticky error by the controller
        let _ = FormatChangeController::apply(self, input, mode);
    }
}

impl FormatTarget for IngestShared {
    fn adopt_format(&self, mode: &DisplayMode) {
        let mut state = self.state.lock();
        // Queued frames carry the old geometry
        let flushed = state.ring.clear();
        state.mode = Some(mode.clone());
        drop(state);

        self.flushed.fetch_add(flushed as u64, Ordering::Relaxed);
        info!("Input format changed to {}, {} queued frames flushed", mode.name, flushed);
    }

    fn fail(&self, error: Error) {
        self.error.set(error);
        self.shut_down();
    }
}

struct InputSession {
    device_name: String,
    input: Arc<dyn VideoInput>,
}

/// Bounded FIFO between a capture device and its consumer.
///
/// Every method turns into a no-op returning a default value once the sticky
/// error is set; check [`IngestQueue::error_message`] after `start`. All
/// methods take `&self`, so the queue can be shared behind an `Arc` and
/// stopped while another thread waits in [`IngestQueue::pop_blocking`].
pub struct IngestQueue {
    directory: Arc<dyn DeviceDirectory>,
    shared: Arc<IngestShared>,
    session: Mutex<Option<InputSession>>,
}

impl IngestQueue {
    pub fn new(directory: Arc<dyn DeviceDirectory>, capacity: usize) -> Self {
        Self {
            directory,
            shared: Arc::new(IngestShared {
                state: Mutex::new(IngestState {
                    ring: FrameRing::new(capacity),
                    mode: None,
                    streaming: false,
                }),
                arrived: Condvar::new(),
                error: StickyError::new(),
                mismatched: AtomicU64::new(0),
                flushed: AtomicU64::new(0),
            }),
            session: Mutex::new(None),
        }
    }

    /// Bind to a device and mode, register for frame arrival and start
    /// streaming. No frames are allocated up front.
    #[instrument(skip(self))]
    pub fn start(&self, device_index: usize, format_index: usize) -> Result<()> {
        if let Some(err) = self.shared.error.get() {
            return Err(err.clone());
        }

        let mut session = self.session.lock();
        if session.is_some() {
            return Err(Error::AlreadyStarted);
        }

        match self.open(device_index, format_index) {
            Ok(opened) => {
                *session = Some(opened);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to start ingest: {}", e);
                self.shared.error.set(e.clone());
                Err(e)
            }
        }
    }

    fn open(&self, device_index: usize, format_index: usize) -> Result<InputSession> {
        let binding = utils::bind_input(&*self.directory, device_index, format_index)?;
        let input = binding.port;

        input.enable(&binding.mode)?;

        {
            let mut state = self.shared.state.lock();
            state.mode = Some(binding.mode.clone());
            state.streaming = true;
        }

        input.set_callback(Some(self.shared.clone() as Arc<dyn InputCallback>));
        if let Err(e) = input.start() {
            input.set_callback(None);
            input.disable();
            self.shared.shut_down();
            return Err(e);
        }

        info!(
            "Ingest started on {} ({}), capacity {}",
            binding.device_name,
            binding.mode.name,
            self.capacity()
        );
        Ok(InputSession {
            device_name: binding.device_name,
            input,
        })
    }

    /// Stop streaming, unregister the callback and release every queued
    /// frame. Threads blocked in [`IngestQueue::pop_blocking`] are woken.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };

        session.input.stop();
        session.input.set_callback(None);
        session.input.disable();
        self.shared.shut_down();

        info!("Ingest on {} stopped", session.device_name);
    }

    pub fn is_running(&self) -> bool {
        self.session.lock().is_some() && !self.shared.error.is_set()
    }

    fn healthy(&self) -> bool {
        !self.shared.error.is_set()
    }

    /// Number of queued frames
    pub fn count_queued(&self) -> usize {
        if !self.healthy() {
            return 0;
        }
        self.shared.state.lock().ring.len()
    }

    /// Remove the oldest frame without looking at it
    pub fn dequeue_frame(&self) {
        if !self.healthy() {
            return;
        }
        self.shared.state.lock().ring.pop();
    }

    /// Take the oldest frame, if any
    pub fn pop(&self) -> Option<FrameBuffer> {
        if !self.healthy() {
            return None;
        }
        self.shared.state.lock().ring.pop()
    }

    /// Take the oldest frame, waiting up to `timeout` for one to arrive.
    /// Returns `None` on timeout or when the queue is stopped meanwhile.
    pub fn pop_blocking(&self, timeout: Duration) -> Option<FrameBuffer> {
        if !self.healthy() {
            return None;
        }

        let mut state = self.shared.state.lock();
        self.shared.arrived.wait_while_for(
            &mut state,
            |state| state.streaming && state.ring.is_empty(),
            timeout,
        );
        if !state.streaming {
            return None;
        }
        state.ring.pop()
    }

    /// Lock the queue and borrow the oldest frame's bytes in place.
    ///
    /// The queue lock, and so the capture callback, is held until the guard
    /// drops. Keep the critical section to a copy into the destination, and
    /// do not call back into this queue while holding it.
    pub fn lock_oldest_frame(&self) -> Option<OldestFrame<'_>> {
        if !self.healthy() {
            return None;
        }
        let state = self.shared.state.lock();
        if state.ring.is_empty() {
            return None;
        }
        Some(OldestFrame { state })
    }

    /// Closure form of [`IngestQueue::lock_oldest_frame`]
    pub fn with_oldest_frame<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let frame = self.lock_oldest_frame()?;
        Some(f(&frame))
    }

    pub fn format(&self) -> Option<DeviceFormat> {
        if !self.healthy() {
            return None;
        }
        self.shared.state.lock().mode.as_ref().map(|mode| mode.format)
    }

    pub fn format_name(&self) -> Option<String> {
        if !self.healthy() {
            return None;
        }
        self.shared.state.lock().mode.as_ref().map(|mode| mode.name.clone())
    }

    /// (width, height), zero when unbound
    pub fn frame_dimensions(&self) -> (u32, u32) {
        self.format()
            .map(|format| (format.width, format.height))
            .unwrap_or_default()
    }

    pub fn frame_duration(&self) -> i64 {
        self.format().map(|format| format.frame_duration).unwrap_or_default()
    }

    pub fn frame_rate(&self) -> f64 {
        self.format().map(|format| format.frame_rate()).unwrap_or_default()
    }

    pub fn is_progressive(&self) -> bool {
        self.format().map(|format| format.progressive).unwrap_or_default()
    }

    /// Byte size an arriving frame must have to be queued
    pub fn calculate_frame_data_size(&self) -> usize {
        self.format()
            .map(|format| format.frame_data_size())
            .unwrap_or_default()
    }

    pub fn capacity(&self) -> usize {
        self.shared.state.lock().ring.capacity()
    }

    pub fn dropped_count(&self) -> u64 {
        if !self.healthy() {
            return 0;
        }
        self.shared.state.lock().ring.dropped()
    }

    pub fn stats(&self) -> IngestStats {
        if !self.healthy() {
            return IngestStats::default();
        }
        let state = self.shared.state.lock();
        let (received, consumed, dropped) = state.ring.stats();
        IngestStats {
            queued: state.ring.len(),
            capacity: state.ring.capacity(),
            received,
            consumed,
            dropped,
            mismatched: self.shared.mismatched.load(Ordering::Relaxed),
            flushed: self.shared.flushed.load(Ordering::Relaxed),
        }
    }

    pub fn error(&self) -> Option<Error> {
        self.shared.error.get().cloned()
    }

    /// Sticky error text, empty while healthy
    pub fn error_message(&self) -> String {
        self.shared.error.message()
    }
}

impl Drop for IngestQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Scoped read access to the oldest queued frame.
///
/// Holds the queue lock for its whole lifetime.
pub struct OldestFrame<'a> {
    state: MutexGuard<'a, IngestState>,
}

impl OldestFrame<'_> {
    pub fn frame(&self) -> Option<&FrameBuffer> {
        self.state.ring.oldest()
    }
}

impl Deref for OldestFrame<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.state
            .ring
            .oldest()
            .map(FrameBuffer::bytes)
            .unwrap_or_default()
    }
}
