//! Display mode and timing descriptors

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::timecode::FLICKS_PER_SECOND;

/// Packed pixel layouts a device can deliver or accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit YUV 4:2:2, Cb Y0 Cr Y1 ordering
    Uyvy,
    /// 8-bit YUV 4:2:2, Y0 Cb Y1 Cr ordering
    Yuyv,
    /// 8-bit ARGB
    Argb32,
    /// 8-bit BGRA
    Bgra32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Uyvy | PixelFormat::Yuyv => 2,
            PixelFormat::Argb32 | PixelFormat::Bgra32 => 4,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Uyvy => write!(f, "UYVY (YUV 4:2:2 packed)"),
            PixelFormat::Yuyv => write!(f, "YUYV (YUV 4:2:2 packed)"),
            PixelFormat::Argb32 => write!(f, "ARGB32"),
            PixelFormat::Bgra32 => write!(f, "BGRA32"),
        }
    }
}

/// Geometry and timing of one format epoch.
///
/// Frame rate is `timescale / frame_duration`. A format is replaced whole
/// when the device reports a change, never patched field by field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFormat {
    pub width: u32,
    pub height: u32,
    pub frame_duration: i64,
    pub timescale: i64,
    pub progressive: bool,
    pub pixel_format: PixelFormat,
}

impl DeviceFormat {
    /// Bytes in one packed row
    pub fn row_stride(&self) -> usize {
        self.width as usize * self.pixel_format.bytes_per_pixel()
    }

    /// Bytes in one full frame
    pub fn frame_data_size(&self) -> usize {
        self.row_stride() * self.height as usize
    }

    pub fn frame_rate(&self) -> f64 {
        self.timescale as f64 / self.frame_duration as f64
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(self.frame_duration as f64 / self.timescale as f64)
    }

    /// Frame duration expressed in flicks
    pub fn frame_duration_flicks(&self) -> i64 {
        (FLICKS_PER_SECOND as i128 * self.frame_duration as i128 / self.timescale as i128) as i64
    }

    /// Timestamp of the frame occupying `slot` on this format's timeline
    pub fn timestamp(&self, slot: u64) -> Timestamp {
        Timestamp {
            value: self.frame_duration * slot as i64,
            duration: self.frame_duration,
            timescale: self.timescale,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.frame_duration > 0 && self.timescale > 0 && self.width > 0 && self.height > 0
    }
}

/// A named format as advertised by a device port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMode {
    pub name: String,
    pub format: DeviceFormat,
}

impl DisplayMode {
    pub fn new(name: impl Into<String>, format: DeviceFormat) -> Self {
        Self {
            name: name.into(),
            format,
        }
    }

    /// 1080i59.94 in 8-bit UYVY, the default broadcast mode
    pub fn hd1080i5994() -> Self {
        Self::new(
            "1080i59.94",
            DeviceFormat {
                width: 1920,
                height: 1080,
                frame_duration: 1001,
                timescale: 30000,
                progressive: false,
                pixel_format: PixelFormat::Uyvy,
            },
        )
    }

    /// 1080p60 in 8-bit UYVY
    pub fn hd1080p60() -> Self {
        Self::new(
            "1080p60",
            DeviceFormat {
                width: 1920,
                height: 1080,
                frame_duration: 1000,
                timescale: 60000,
                progressive: true,
                pixel_format: PixelFormat::Uyvy,
            },
        )
    }

    /// 720p59.94 in 8-bit UYVY
    pub fn hd720p5994() -> Self {
        Self::new(
            "720p59.94",
            DeviceFormat {
                width: 1280,
                height: 720,
                frame_duration: 1001,
                timescale: 60000,
                progressive: true,
                pixel_format: PixelFormat::Uyvy,
            },
        )
    }
}

/// Device timeline position. Wall time is `value / timescale` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub value: i64,
    pub duration: i64,
    pub timescale: i64,
}

impl Timestamp {
    pub fn seconds(&self) -> f64 {
        self.value as f64 / self.timescale as f64
    }

    pub fn to_flicks(&self) -> i64 {
        (FLICKS_PER_SECOND as i128 * self.value as i128 / self.timescale as i128) as i64
    }
}
