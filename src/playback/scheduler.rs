//! Playback-side frame scheduling.
//!
//! Two modes, fixed per session:
//!
//! - **Async**: one live frame is kept. Every completion reported by the
//!   device reschedules whatever frame is live at that moment, so playback
//!   sustains itself and `feed` only replaces the picture. The most recent
//!   feed wins, intermediate ones may never be shown.
//! - **Manual**: every fed frame is scheduled exactly once, in call order, at
//!   `frame_duration * slot`. Callers pace themselves with
//!   [`OutputScheduler::wait_completion`].

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};

use crate::capture::FrameBuffer;
use crate::device::{
    CompletionResult, DeviceDirectory, DeviceFormat, DisplayMode, OutputCallback, VideoOutput,
};
use crate::error::{Error, Result, StickyError};
use crate::format_change::{FormatChangeController, FormatTarget};
use crate::utils;

/// How frames reach the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputMode {
    /// Self-sustaining playback of a continuously replaced live frame
    Async,
    /// Caller-paced playback of discrete frames
    Manual,
}

/// Reaction to a frame the device reports as displayed late
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LatePolicy {
    /// Count it; the caller decides whether to skip a frame
    #[default]
    Report,
    /// Count it and leave one scheduling slot empty to resynchronize
    SkipSlot,
}

/// Lifecycle of a scheduler session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Preroll,
    Playing,
    Stopped,
}

/// Snapshot of scheduler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputStats {
    pub phase: PlaybackPhase,
    pub mode: Option<OutputMode>,
    pub queued: u64,
    pub completed: u64,
    pub skipped: u64,
    pub dropped: u64,
}

struct OutputState {
    mode: Option<DisplayMode>,
    output_mode: Option<OutputMode>,
    phase: PlaybackPhase,
    preroll: usize,
    queued: u64,
    completed: u64,
    skipped: u64,
    dropped: u64,
    next_slot: u64,
}

impl OutputState {
    fn format(&self) -> Result<DeviceFormat> {
        self.mode
            .as_ref()
            .map(|mode| mode.format)
            .ok_or(Error::NotRunning)
    }
}

struct OutputShared {
    state: Mutex<OutputState>,
    completion: Condvar,
    live: ArcSwapOption<FrameBuffer>,
    error: StickyError,
    late_policy: LatePolicy,
}

impl OutputShared {
    /// Hand `frame` to the device at the next slot. Caller holds the state lock.
    fn schedule(
        &self,
        state: &mut OutputState,
        output: &dyn VideoOutput,
        frame: Arc<FrameBuffer>,
    ) -> Result<()> {
        let time = state.format()?.timestamp(state.next_slot);
        output.schedule(frame, time)?;
        state.next_slot += 1;
        state.queued += 1;
        metrics::counter!("frameport_output_scheduled_total").increment(1);
        Ok(())
    }

    /// Stop accepting completions and wake every waiter
    fn halt(&self) {
        let mut state = self.state.lock();
        state.phase = PlaybackPhase::Stopped;
        drop(state);
        self.completion.notify_all();
    }

    fn release(&self) {
        self.live.store(None);
        self.state.lock().mode = None;
    }
}

impl OutputCallback for OutputShared {
    fn frame_completed(
        &self,
        output: &dyn VideoOutput,
        _frame: Arc<FrameBuffer>,
        result: CompletionResult,
    ) {
        if self.error.is_set() {
            return;
        }
        let mut state = self.state.lock();
        if state.phase != PlaybackPhase::Playing {
            return;
        }

        state.completed += 1;
        metrics::counter!("frameport_output_completed_total").increment(1);
        match result {
            CompletionResult::DisplayedLate => {
                state.skipped += 1;
                metrics::counter!("frameport_output_late_total").increment(1);
                if self.late_policy == LatePolicy::SkipSlot {
                    state.next_slot += 1;
                }
                debug!("Frame {} displayed late", state.completed);
            }
            CompletionResult::Dropped => {
                state.dropped += 1;
                metrics::counter!("frameport_output_dropped_total").increment(1);
                debug!("Frame {} dropped by the device", state.completed);
            }
            CompletionResult::Flushed => {
                trace!("Frame {} flushed", state.completed);
            }
            CompletionResult::Completed => {}
        }

        // Async playback keeps itself alive with whatever frame is live now.
        // A flushed frame left no gap to fill.
        if state.output_mode == Some(OutputMode::Async) && result != CompletionResult::Flushed {
            if let Some(frame) = self.live.load_full() {
                if let Err(e) = self.schedule(&mut state, output, frame) {
                    warn!("Failed to reschedule live frame: {}", e);
                }
            }
        }
        drop(state);

        self.completion.notify_all();
    }

    fn format_changed(&self, output: &dyn VideoOutput, mode: DisplayMode) {
        if self.error.is_set() {
            return;
        }
        if FormatChangeController::apply(self, output, mode).is_err() {
            return;
        }

        // The device flushed its queue, so async playback has to preroll again
        let mut state = self.state.lock();
        if state.output_mode == Some(OutputMode::Async) {
            if let Some(frame) = self.live.load_full() {
                for _ in 0..state.preroll {
                    if let Err(e) = self.schedule(&mut state, output, frame.clone()) {
                        warn!("Failed to preroll after format change: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

impl FormatTarget for OutputShared {
    fn adopt_format(&self, mode: &DisplayMode) {
        let mut state = self.state.lock();
        state.mode = Some(mode.clone());
        // The working frame must match the new geometry
        if state.output_mode == Some(OutputMode::Async) {
            self.live
                .store(Some(Arc::new(FrameBuffer::blank(&mode.format))));
        }
        drop(state);

        info!("Output format changed to {}", mode.name);
    }

    fn fail(&self, error: Error) {
        self.error.set(error);
        self.halt();
        self.release();
    }
}

struct OutputSession {
    device_name: String,
    output: Arc<dyn VideoOutput>,
}

/// Feeds frames to a playback device in Async or Manual mode.
///
/// Like the ingest queue it is usable through `&self` from several threads
/// and degrades to no-ops once the sticky error is set.
pub struct OutputScheduler {
    directory: Arc<dyn DeviceDirectory>,
    shared: Arc<OutputShared>,
    session: Mutex<Option<OutputSession>>,
}

impl OutputScheduler {
    pub fn new(directory: Arc<dyn DeviceDirectory>) -> Self {
        Self::with_late_policy(directory, LatePolicy::default())
    }

    pub fn with_late_policy(directory: Arc<dyn DeviceDirectory>, late_policy: LatePolicy) -> Self {
        Self {
            directory,
            shared: Arc::new(OutputShared {
                state: Mutex::new(OutputState {
                    mode: None,
                    output_mode: None,
                    phase: PlaybackPhase::Idle,
                    preroll: 0,
                    queued: 0,
                    completed: 0,
                    skipped: 0,
                    dropped: 0,
                    next_slot: 0,
                }),
                completion: Condvar::new(),
                live: ArcSwapOption::empty(),
                error: StickyError::new(),
                late_policy,
            }),
            session: Mutex::new(None),
        }
    }

    /// Start self-sustaining playback. A blank live frame is scheduled
    /// `preroll` times (at least once) before playback starts.
    #[instrument(skip(self))]
    pub fn start_async(&self, device_index: usize, format_index: usize, preroll: usize) -> Result<()> {
        self.start(device_index, format_index, OutputMode::Async, preroll.max(1))
    }

    /// Start caller-paced playback with nothing scheduled
    #[instrument(skip(self))]
    pub fn start_manual(&self, device_index: usize, format_index: usize) -> Result<()> {
        self.start(device_index, format_index, OutputMode::Manual, 0)
    }

    fn start(
        &self,
        device_index: usize,
        format_index: usize,
        output_mode: OutputMode,
        preroll: usize,
    ) -> Result<()> {
        if let Some(err) = self.shared.error.get() {
            return Err(err.clone());
        }

        let mut session = self.session.lock();
        if session.is_some() {
            return Err(Error::AlreadyStarted);
        }

        match self.open(device_index, format_index, output_mode, preroll) {
            Ok(opened) => {
                *session = Some(opened);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to start output: {}", e);
                self.shared.error.set(e.clone());
                Err(e)
            }
        }
    }

    fn open(
        &self,
        device_index: usize,
        format_index: usize,
        output_mode: OutputMode,
        preroll: usize,
    ) -> Result<OutputSession> {
        let binding = utils::bind_output(&*self.directory, device_index, format_index)?;
        let output = binding.port;

        output.enable(&binding.mode)?;
        output.set_callback(Some(self.shared.clone() as Arc<dyn OutputCallback>));

        if let Err(e) = self.begin_playback(&*output, &binding.mode, output_mode, preroll) {
            output.set_callback(None);
            output.disable();
            self.shared.halt();
            self.shared.release();
            return Err(e);
        }

        info!(
            "Output started on {} ({}) in {:?} mode",
            binding.device_name, binding.mode.name, output_mode
        );
        Ok(OutputSession {
            device_name: binding.device_name,
            output,
        })
    }

    fn begin_playback(
        &self,
        output: &dyn VideoOutput,
        mode: &DisplayMode,
        output_mode: OutputMode,
        preroll: usize,
    ) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.mode = Some(mode.clone());
        state.output_mode = Some(output_mode);
        state.phase = PlaybackPhase::Preroll;
        state.preroll = preroll;
        state.queued = 0;
        state.completed = 0;
        state.skipped = 0;
        state.dropped = 0;
        state.next_slot = 0;

        if output_mode == OutputMode::Async {
            let frame = Arc::new(FrameBuffer::blank(&mode.format));
            self.shared.live.store(Some(frame.clone()));
            for _ in 0..preroll {
                self.shared.schedule(&mut state, output, frame.clone())?;
            }
            debug!("Prerolled {} frames", preroll);
        }

        // Completions can only arrive once the device is started
        state.phase = PlaybackPhase::Playing;
        drop(state);

        output.start()
    }

    /// Stop playback, unregister the completion callback and release the
    /// live frame. Threads blocked in [`OutputScheduler::wait_completion`]
    /// wake up with `NotRunning`.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };

        self.shared.halt();
        session.output.stop();
        session.output.set_callback(None);
        session.output.disable();
        self.shared.release();

        info!("Output on {} stopped", session.device_name);
    }

    /// Copy `data` into a new frame and hand it to the device.
    ///
    /// Async: replaces the live frame. Manual: schedules it at the next slot.
    /// `data` must be exactly one frame of the bound format.
    pub fn feed(&self, data: &[u8]) -> Result<()> {
        if let Some(err) = self.shared.error.get() {
            return Err(err.clone());
        }
        let session = self.session.lock();
        let Some(session) = session.as_ref() else {
            return Err(Error::NotRunning);
        };

        let mut state = self.shared.state.lock();
        if state.phase != PlaybackPhase::Playing {
            return Err(Error::NotRunning);
        }
        let frame = Arc::new(FrameBuffer::copy_from(&state.format()?, data)?);

        match state.output_mode {
            Some(OutputMode::Async) => {
                self.shared.live.store(Some(frame));
                Ok(())
            }
            Some(OutputMode::Manual) => {
                self.shared
                    .schedule(&mut state, &*session.output, frame)
            }
            None => Err(Error::NotRunning),
        }
    }

    /// Block until at least `frame_number` frames have completed.
    ///
    /// Times out after `timeout`, which records `SyncTimeout` as the sticky
    /// error. Returns `NotRunning` when the scheduler is stopped meanwhile.
    pub fn wait_completion(&self, frame_number: u64, timeout: Duration) -> Result<()> {
        if let Some(err) = self.shared.error.get() {
            return Err(err.clone());
        }

        let mut state = self.shared.state.lock();
        if state.completed >= frame_number {
            return Ok(());
        }
        if state.phase != PlaybackPhase::Playing {
            return Err(Error::NotRunning);
        }

        self.shared.completion.wait_while_for(
            &mut state,
            |state| state.phase == PlaybackPhase::Playing && state.completed < frame_number,
            timeout,
        );

        if state.completed >= frame_number {
            return Ok(());
        }
        if state.phase != PlaybackPhase::Playing {
            return Err(self.shared.error.get().cloned().unwrap_or(Error::NotRunning));
        }

        let err = Error::SyncTimeout {
            target: frame_number,
            completed: state.completed,
        };
        drop(state);

        warn!("{}", err);
        self.shared.error.set(err.clone());
        Err(err)
    }

    /// Genlock status of the bound device, false when unbound
    pub fn is_reference_locked(&self) -> bool {
        if self.shared.error.is_set() {
            return false;
        }
        self.session
            .lock()
            .as_ref()
            .is_some_and(|session| session.output.is_reference_locked())
    }

    pub fn is_running(&self) -> bool {
        !self.shared.error.is_set() && self.phase() == PlaybackPhase::Playing
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.shared.state.lock().phase
    }

    pub fn mode(&self) -> Option<OutputMode> {
        self.shared.state.lock().output_mode
    }

    pub fn format(&self) -> Option<DeviceFormat> {
        if self.shared.error.is_set() {
            return None;
        }
        self.shared.state.lock().mode.as_ref().map(|mode| mode.format)
    }

    pub fn format_name(&self) -> Option<String> {
        if self.shared.error.is_set() {
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

    pub fn frame_rate(&self) -> f64 {
        self.format().map(|format| format.frame_rate()).unwrap_or_default()
    }

    pub fn is_progressive(&self) -> bool {
        self.format().map(|format| format.progressive).unwrap_or_default()
    }

    /// Frames handed to the device so far
    pub fn queued_count(&self) -> u64 {
        if self.shared.error.is_set() {
            return 0;
        }
        self.shared.state.lock().queued
    }

    /// Frames the device confirmed as played out
    pub fn completed_count(&self) -> u64 {
        if self.shared.error.is_set() {
            return 0;
        }
        self.shared.state.lock().completed
    }

    /// Late completions; each one asks the caller to skip a frame
    pub fn skipped_count(&self) -> u64 {
        if self.shared.error.is_set() {
            return 0;
        }
        self.shared.state.lock().skipped
    }

    /// Frames the device reported as dropped
    pub fn dropped_count(&self) -> u64 {
        if self.shared.error.is_set() {
            return 0;
        }
        self.shared.state.lock().dropped
    }

    pub fn stats(&self) -> OutputStats {
        if self.shared.error.is_set() {
            return OutputStats::default();
        }
        let state = self.shared.state.lock();
        OutputStats {
            phase: state.phase,
            mode: state.output_mode,
            queued: state.queued,
            completed: state.completed,
            skipped: state.skipped,
            dropped: state.dropped,
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

impl Drop for OutputScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
