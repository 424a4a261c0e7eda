//! Software loopback device.
//!
//! Behaves like a capture/playback card with a free-running clock: the input
//! side pushes frames through its callback, the output side completes
//! scheduled frames one at a time. Frames can be driven by hand (tests) or by
//! a [`Ticker`] (demo). Device locks are released before any callback runs,
//! so callbacks may call straight back into the port.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::capture::FrameBuffer;
use crate::device::{
    CompletionResult, Device, DisplayMode, InputCallback, OutputCallback, RawFrame, Ticker,
    Timestamp, VideoInput, VideoOutput, VideoPort,
};
use crate::error::{Error, Result};

const DEFAULT_HISTORY_LIMIT: usize = 8;

/// Virtual card exposing an input port, an output port, or both
pub struct VirtualDevice {
    name: String,
    input: Option<Arc<VirtualInput>>,
    output: Option<Arc<VirtualOutput>>,
}

impl VirtualDevice {
    /// Card with both ports advertising the same modes
    pub fn new(name: impl Into<String>, modes: Vec<DisplayMode>) -> Self {
        Self {
            name: name.into(),
            input: Some(Arc::new(VirtualInput::new(modes.clone()))),
            output: Some(Arc::new(VirtualOutput::new(modes))),
        }
    }

    pub fn input_only(name: impl Into<String>, modes: Vec<DisplayMode>) -> Self {
        Self {
            name: name.into(),
            input: Some(Arc::new(VirtualInput::new(modes))),
            output: None,
        }
    }

    pub fn output_only(name: impl Into<String>, modes: Vec<DisplayMode>) -> Self {
        Self {
            name: name.into(),
            input: None,
            output: Some(Arc::new(VirtualOutput::new(modes))),
        }
    }

    pub fn virtual_input(&self) -> Option<Arc<VirtualInput>> {
        self.input.clone()
    }

    pub fn virtual_output(&self) -> Option<Arc<VirtualOutput>> {
        self.output.clone()
    }
}

impl Device for VirtualDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn input(&self) -> Option<Arc<dyn VideoInput>> {
        self.input
            .clone()
            .map(|input| input as Arc<dyn VideoInput>)
    }

    fn output(&self) -> Option<Arc<dyn VideoOutput>> {
        self.output
            .clone()
            .map(|output| output as Arc<dyn VideoOutput>)
    }
}

#[derive(Default)]
struct InputState {
    callback: Option<Arc<dyn InputCallback>>,
    mode: Option<DisplayMode>,
    streaming: bool,
    paused: bool,
    busy: bool,
    flushes: u64,
}

/// Capture port of a [`VirtualDevice`]
pub struct VirtualInput {
    modes: Vec<DisplayMode>,
    state: Mutex<InputState>,
}

impl VirtualInput {
    pub fn new(modes: Vec<DisplayMode>) -> Self {
        Self {
            modes,
            state: Mutex::new(InputState::default()),
        }
    }

    /// Deliver a frame through the registered callback.
    ///
    /// Returns false when nothing was delivered (not streaming, paused, or
    /// no callback).
    pub fn inject(&self, bytes: &[u8], width: u32, height: u32) -> bool {
        let callback = {
            let state = self.state.lock();
            if !state.streaming || state.paused {
                return false;
            }
            match state.callback.clone() {
                Some(callback) => callback,
                None => return false,
            }
        };

        let row_stride = if height == 0 {
            0
        } else {
            bytes.len() / height as usize
        };
        callback.frame_arrived(RawFrame {
            bytes,
            width,
            height,
            row_stride,
        });
        true
    }

    /// Deliver a frame of the current mode filled with `value`
    pub fn inject_pattern(&self, value: u8) -> bool {
        let format = match self.current_mode() {
            Some(mode) => mode.format,
            None => return false,
        };
        let bytes = vec![value; format.frame_data_size()];
        self.inject(&bytes, format.width, format.height)
    }

    /// Report a detected signal change, as the hardware would
    pub fn signal_format_change(&self, mode: DisplayMode) {
        let callback = self.state.lock().callback.clone();
        if let Some(callback) = callback {
            info!("Virtual input signalling format change to {}", mode.name);
            callback.format_changed(self, mode);
        }
    }

    /// Push a patterned frame every `period` on a background thread
    pub fn spawn_generator(self: &Arc<Self>, period: Duration) -> Ticker {
        let input = Arc::clone(self);
        let mut sequence = 0u8;
        Ticker::spawn("virtual-input", period, move || {
            sequence = sequence.wrapping_add(1);
            input.inject_pattern(sequence);
        })
    }

    pub fn set_busy(&self, busy: bool) {
        self.state.lock().busy = busy;
    }

    pub fn current_mode(&self) -> Option<DisplayMode> {
        self.state.lock().mode.clone()
    }

    pub fn is_streaming(&self) -> bool {
        let state = self.state.lock();
        state.streaming && !state.paused
    }

    pub fn has_callback(&self) -> bool {
        self.state.lock().callback.is_some()
    }

    pub fn flush_count(&self) -> u64 {
        self.state.lock().flushes
    }
}

impl VideoPort for VirtualInput {
    fn display_modes(&self) -> Vec<DisplayMode> {
        self.modes.clone()
    }

    fn enable(&self, mode: &DisplayMode) -> Result<()> {
        let mut state = self.state.lock();
        if state.busy {
            return Err(Error::DeviceBusy("virtual input is in use".into()));
        }
        debug!("Virtual input enabled with {}", mode.name);
        state.mode = Some(mode.clone());
        Ok(())
    }

    fn disable(&self) {
        let mut state = self.state.lock();
        state.mode = None;
        state.streaming = false;
    }

    fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.mode.is_none() {
            return Err(Error::Device("virtual input is not enabled".into()));
        }
        state.streaming = true;
        state.paused = false;
        Ok(())
    }

    fn stop(&self) {
        self.state.lock().streaming = false;
    }

    fn pause(&self) {
        self.state.lock().paused = true;
    }

    fn flush(&self) {
        self.state.lock().flushes += 1;
    }
}

impl VideoInput for VirtualInput {
    fn set_callback(&self, callback: Option<Arc<dyn InputCallback>>) {
        self.state.lock().callback = callback;
    }
}

/// A frame handed to the output port
#[derive(Debug, Clone)]
pub struct ScheduledFrame {
    pub frame: Arc<FrameBuffer>,
    pub time: Timestamp,
}

#[derive(Default)]
struct OutputState {
    callback: Option<Arc<dyn OutputCallback>>,
    mode: Option<DisplayMode>,
    playing: bool,
    busy: bool,
    reference_locked: bool,
    pending: VecDeque<ScheduledFrame>,
    history: VecDeque<ScheduledFrame>,
    scheduled_total: u64,
}

/// Playback port of a [`VirtualDevice`]
pub struct VirtualOutput {
    modes: Vec<DisplayMode>,
    history_limit: usize,
    state: Mutex<OutputState>,
}

impl VirtualOutput {
    pub fn new(modes: Vec<DisplayMode>) -> Self {
        Self::with_history_limit(modes, DEFAULT_HISTORY_LIMIT)
    }

    /// Keep at most `history_limit` recently scheduled frames for inspection
    pub fn with_history_limit(modes: Vec<DisplayMode>, history_limit: usize) -> Self {
        Self {
            modes,
            history_limit,
            state: Mutex::new(OutputState::default()),
        }
    }

    /// Play out the oldest pending frame and report it through the callback.
    ///
    /// Returns false when playback is stopped or nothing is pending.
    pub fn complete_next(&self, result: CompletionResult) -> bool {
        let (callback, scheduled) = {
            let mut state = self.state.lock();
            if !state.playing {
                return false;
            }
            let Some(scheduled) = state.pending.pop_front() else {
                return false;
            };
            (state.callback.clone(), scheduled)
        };

        if let Some(callback) = callback {
            callback.frame_completed(self, scheduled.frame, result);
        }
        true
    }

    /// Complete one pending frame every `period`, like a hardware output clock
    pub fn spawn_clock(self: &Arc<Self>, period: Duration) -> Ticker {
        let output = Arc::clone(self);
        Ticker::spawn("virtual-output", period, move || {
            output.complete_next(CompletionResult::Completed);
        })
    }

    pub fn signal_format_change(&self, mode: DisplayMode) {
        let callback = self.state.lock().callback.clone();
        if let Some(callback) = callback {
            info!("Virtual output signalling format change to {}", mode.name);
            callback.format_changed(self, mode);
        }
    }

    pub fn set_busy(&self, busy: bool) {
        self.state.lock().busy = busy;
    }

    pub fn set_reference_locked(&self, locked: bool) {
        self.state.lock().reference_locked = locked;
    }

    pub fn current_mode(&self) -> Option<DisplayMode> {
        self.state.lock().mode.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn has_callback(&self) -> bool {
        self.state.lock().callback.is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn scheduled_total(&self) -> u64 {
        self.state.lock().scheduled_total
    }

    pub fn last_scheduled(&self) -> Option<ScheduledFrame> {
        self.state.lock().history.back().cloned()
    }

    /// Recently scheduled frames, oldest first
    pub fn history(&self) -> Vec<ScheduledFrame> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Hand every pending frame back as flushed, after releasing the lock
    fn release_pending(&self, mut state: MutexGuard<'_, OutputState>) {
        let pending: Vec<ScheduledFrame> = state.pending.drain(..).collect();
        let callback = state.callback.clone();
        drop(state);

        if let Some(callback) = callback {
            for scheduled in pending {
                callback.frame_completed(self, scheduled.frame, CompletionResult::Flushed);
            }
        }
    }
}

impl VideoPort for VirtualOutput {
    fn display_modes(&self) -> Vec<DisplayMode> {
        self.modes.clone()
    }

    fn enable(&self, mode: &DisplayMode) -> Result<()> {
        let mut state = self.state.lock();
        if state.busy {
            return Err(Error::DeviceBusy("virtual output is in use".into()));
        }
        debug!("Virtual output enabled with {}", mode.name);
        state.mode = Some(mode.clone());
        Ok(())
    }

    fn disable(&self) {
        let mut state = self.state.lock();
        state.mode = None;
        state.playing = false;
        self.release_pending(state);
    }

    fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.mode.is_none() {
            return Err(Error::Device("virtual output is not enabled".into()));
        }
        state.playing = true;
        Ok(())
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        state.playing = false;
        self.release_pending(state);
    }

    fn pause(&self) {
        self.state.lock().playing = false;
    }

    fn flush(&self) {
        let state = self.state.lock();
        self.release_pending(state);
    }
}

impl VideoOutput for VirtualOutput {
    fn set_callback(&self, callback: Option<Arc<dyn OutputCallback>>) {
        self.state.lock().callback = callback;
    }

    fn schedule(&self, frame: Arc<FrameBuffer>, time: Timestamp) -> Result<()> {
        let mut state = self.state.lock();
        if state.mode.is_none() {
            return Err(Error::Device("virtual output is not enabled".into()));
        }

        let scheduled = ScheduledFrame { frame, time };
        state.pending.push_back(scheduled.clone());
        state.history.push_back(scheduled);
        while state.history.len() > self.history_limit {
            state.history.pop_front();
        }
        state.scheduled_total += 1;
        Ok(())
    }

    fn is_reference_locked(&self) -> bool {
        self.state.lock().reference_locked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_port_refuses_enable() {
        let input = VirtualInput::new(vec![DisplayMode::hd1080p60()]);
        input.set_busy(true);
        let err = input.enable(&DisplayMode::hd1080p60()).unwrap_err();
        assert!(matches!(err, Error::DeviceBusy(_)));
    }

    #[test]
    fn inject_requires_streaming() {
        let input = VirtualInput::new(vec![DisplayMode::hd1080p60()]);
        assert!(!input.inject(&[0u8; 4], 1, 1));
        assert!(!input.inject_pattern(1));
    }

    #[test]
    fn output_history_is_bounded() {
        let mode = DisplayMode::hd720p5994();
        let output = VirtualOutput::with_history_limit(vec![mode.clone()], 2);
        output.enable(&mode).unwrap();

        let frame = Arc::new(FrameBuffer::blank(&mode.format));
        for slot in 0..5 {
            output
                .schedule(frame.clone(), mode.format.timestamp(slot))
                .unwrap();
        }

        assert_eq!(output.scheduled_total(), 5);
        assert_eq!(output.pending_len(), 5);
        assert_eq!(output.history().len(), 2);
        assert_eq!(output.last_scheduled().unwrap().time.value, 4 * 1001);
    }

    #[derive(Default)]
    struct Completions(Mutex<Vec<CompletionResult>>);

    impl OutputCallback for Completions {
        fn frame_completed(
            &self,
            _output: &dyn VideoOutput,
            _frame: Arc<FrameBuffer>,
            result: CompletionResult,
        ) {
            self.0.lock().push(result);
        }

        fn format_changed(&self, _output: &dyn VideoOutput, _mode: DisplayMode) {}
    }

    #[test]
    fn flush_reports_pending_frames() {
        let mode = DisplayMode::hd720p5994();
        let output = VirtualOutput::new(vec![mode.clone()]);
        let completions = Arc::new(Completions::default());
        output.set_callback(Some(completions.clone() as Arc<dyn OutputCallback>));
        output.enable(&mode).unwrap();

        let frame = Arc::new(FrameBuffer::blank(&mode.format));
        for slot in 0..2 {
            output.schedule(frame.clone(), mode.format.timestamp(slot)).unwrap();
        }
        output.flush();

        assert_eq!(output.pending_len(), 0);
        assert_eq!(
            *completions.0.lock(),
            vec![CompletionResult::Flushed, CompletionResult::Flushed]
        );

        // Nothing left to report on stop
        output.stop();
        assert_eq!(completions.0.lock().len(), 2);
    }

    #[test]
    fn completion_needs_playback() {
        let mode = DisplayMode::hd720p5994();
        let output = VirtualOutput::new(vec![mode.clone()]);
        output.enable(&mode).unwrap();
        output
            .schedule(Arc::new(FrameBuffer::blank(&mode.format)), mode.format.timestamp(0))
            .unwrap();

        assert!(!output.complete_next(CompletionResult::Completed));
        output.start().unwrap();
        assert!(output.complete_next(CompletionResult::Completed));
        assert!(!output.complete_next(CompletionResult::Completed));
    }
}
