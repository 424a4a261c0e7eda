//! Hardware boundary.
//!
//! Device discovery, the physical card and its driver thread live outside
//! this crate. The ingest and output sides only see the traits below. A port
//! hands itself to every callback it fires, so callback objects never need
//! to keep the device alive on their own.

pub mod format;
pub mod ticker;
pub mod virtual_device;

use std::sync::Arc;

pub use format::{DeviceFormat, DisplayMode, PixelFormat, Timestamp};
pub use ticker::Ticker;
pub use virtual_device::{VirtualDevice, VirtualInput, VirtualOutput};

use crate::capture::FrameBuffer;
use crate::error::Result;

/// Raw frame as delivered by the capture hardware.
///
/// Only valid for the duration of the callback.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    pub bytes: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub row_stride: usize,
}

/// How the device reports a scheduled frame left the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionResult {
    Completed,
    DisplayedLate,
    Dropped,
    Flushed,
}

/// Stream control shared by input and output ports
pub trait VideoPort: Send + Sync {
    fn display_modes(&self) -> Vec<DisplayMode>;

    /// Fails with `DeviceBusy` when another session holds the port
    fn enable(&self, mode: &DisplayMode) -> Result<()>;

    fn disable(&self);

    fn start(&self) -> Result<()>;

    fn stop(&self);

    fn pause(&self);

    /// Discard anything buffered on the device side
    fn flush(&self);
}

/// Capture side of a device
pub trait VideoInput: VideoPort {
    fn set_callback(&self, callback: Option<Arc<dyn InputCallback>>);
}

/// Playback side of a device
pub trait VideoOutput: VideoPort {
    fn set_callback(&self, callback: Option<Arc<dyn OutputCallback>>);

    /// Queue `frame` for display at `time`
    fn schedule(&self, frame: Arc<FrameBuffer>, time: Timestamp) -> Result<()>;

    /// Genlock status against the external reference
    fn is_reference_locked(&self) -> bool;
}

/// Notifications fired from the device's capture thread
pub trait InputCallback: Send + Sync {
    fn frame_arrived(&self, frame: RawFrame<'_>);

    fn format_changed(&self, input: &dyn VideoInput, mode: DisplayMode);
}

/// Notifications fired from the device's playback thread
pub trait OutputCallback: Send + Sync {
    fn frame_completed(
        &self,
        output: &dyn VideoOutput,
        frame: Arc<FrameBuffer>,
        result: CompletionResult,
    );

    fn format_changed(&self, output: &dyn VideoOutput, mode: DisplayMode);
}

/// A physical (or virtual) card
pub trait Device: Send + Sync {
    fn name(&self) -> String;

    fn input(&self) -> Option<Arc<dyn VideoInput>>;

    fn output(&self) -> Option<Arc<dyn VideoOutput>>;
}

/// Ordered device listing, as produced by an external enumerator
pub trait DeviceDirectory: Send + Sync {
    fn devices(&self) -> Vec<Arc<dyn Device>>;
}

/// Fixed in-memory directory
#[derive(Clone, Default)]
pub struct StaticDirectory {
    devices: Vec<Arc<dyn Device>>,
}

impl StaticDirectory {
    pub fn new(devices: Vec<Arc<dyn Device>>) -> Self {
        Self { devices }
    }
}

impl DeviceDirectory for StaticDirectory {
    fn devices(&self) -> Vec<Arc<dyn Device>> {
        self.devices.clone()
    }
}
