pub mod capture;
pub mod device;
pub mod drop_detector;
pub mod error;
pub mod format_change;
pub mod pipeline;
pub mod playback;
pub mod registry;
pub mod timecode;
pub mod utils;

use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use capture::{Field, FrameBuffer, IngestPacer, IngestQueue, IngestStats};
pub use device::{DeviceFormat, DisplayMode, PixelFormat, Timestamp};
pub use drop_detector::DropDetector;
pub use error::{Error, Result, StickyError};
pub use format_change::{FormatChangeController, FormatTarget};
pub use playback::{LatePolicy, OutputMode, OutputPacer, OutputScheduler, OutputStats, PlaybackPhase};
pub use registry::{Handle, HandleArena};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Prefix of environment overrides, e.g. `FRAMEPORT__PLAYBACK__PREROLL=4`
pub const ENV_PREFIX: &str = "FRAMEPORT";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub device: VirtualDeviceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub device_index: usize,
    pub format_index: usize,
    /// Frames held before new arrivals are dropped
    pub queue_capacity: usize,
    /// Cushion the playout pacer keeps ahead of the current frame
    pub queue_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub device_index: usize,
    pub format_index: usize,
    pub mode: OutputMode,
    pub preroll: usize,
    /// Frames a manual sender keeps in flight
    pub queue_length: usize,
    pub completion_timeout_ms: u64,
    pub late_policy: LatePolicy,
}

/// Loopback device used by the demo binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualDeviceConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub frame_duration: i64,
    pub timescale: i64,
    pub progressive: bool,
    pub pixel_format: PixelFormat,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            format_index: 0,
            queue_capacity: capture::ingest::DEFAULT_CAPACITY,
            queue_length: 3,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            format_index: 0,
            mode: OutputMode::Async,
            preroll: 3,
            queue_length: 3,
            completion_timeout_ms: 1000,
            late_policy: LatePolicy::Report,
        }
    }
}

impl Default for VirtualDeviceConfig {
    fn default() -> Self {
        Self {
            name: "Virtual Loopback".into(),
            width: 1920,
            height: 1080,
            frame_duration: 1001,
            timescale: 60000,
            progressive: false,
            pixel_format: PixelFormat::Uyvy,
        }
    }
}

impl VirtualDeviceConfig {
    pub fn format(&self) -> DeviceFormat {
        DeviceFormat {
            width: self.width,
            height: self.height,
            frame_duration: self.frame_duration,
            timescale: self.timescale,
            progressive: self.progressive,
            pixel_format: self.pixel_format,
        }
    }

    /// Mode advertised by the loopback device, named like `1080i59.94`
    pub fn display_mode(&self) -> DisplayMode {
        let format = self.format();
        let scan = if self.progressive { 'p' } else { 'i' };
        let rate = (format.frame_rate() * 100.0).round() / 100.0;
        DisplayMode::new(format!("{}{}{}", self.height, scan, rate), format)
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `FRAMEPORT__SECTION__KEY`
    /// environment overrides, then validate the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&Config::default()).map_err(invalid)?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(invalid)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.queue_capacity == 0 {
            return Err(Error::InvalidConfig("capture.queue_capacity must be positive".into()));
        }
        if self.capture.queue_length == 0 {
            return Err(Error::InvalidConfig("capture.queue_length must be positive".into()));
        }
        if self.playback.preroll == 0 {
            return Err(Error::InvalidConfig("playback.preroll must be positive".into()));
        }
        if self.playback.queue_length == 0 {
            return Err(Error::InvalidConfig("playback.queue_length must be positive".into()));
        }
        if !self.device.format().is_valid() {
            return Err(Error::InvalidConfig(
                "device geometry, frame_duration and timescale must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn invalid(err: config::ConfigError) -> Error {
    Error::InvalidConfig(err.to_string())
}
