//! Shared fixtures: virtual cards wired into a device directory

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use frameport::device::{
    Device, DeviceDirectory, StaticDirectory, VirtualDevice, VirtualInput, VirtualOutput,
};
use frameport::{DeviceFormat, DisplayMode, PixelFormat};

/// 1080-line mode with a 2-byte pixel, used for the capacity scenarios
pub fn hd1080_uyvy() -> DisplayMode {
    DisplayMode::hd1080i5994()
}

/// Tiny progressive mode for tests that move a lot of frames
pub fn tiny_mode(width: u32, height: u32) -> DisplayMode {
    DisplayMode::new(
        format!("{}x{}p60", width, height),
        DeviceFormat {
            width,
            height,
            frame_duration: 1000,
            timescale: 60000,
            progressive: true,
            pixel_format: PixelFormat::Uyvy,
        },
    )
}

pub struct Rig {
    pub directory: Arc<dyn DeviceDirectory>,
    pub input: Arc<VirtualInput>,
    pub output: Arc<VirtualOutput>,
}

/// One card with both directions advertising `modes`
pub fn loopback(modes: Vec<DisplayMode>) -> Rig {
    let device = VirtualDevice::new("Loopback", modes);
    let input = device.virtual_input().expect("input port");
    let output = device.virtual_output().expect("output port");
    Rig {
        directory: Arc::new(StaticDirectory::new(vec![Arc::new(device) as Arc<dyn Device>])),
        input,
        output,
    }
}

/// Directory holding the given cards in order
pub fn directory(devices: Vec<VirtualDevice>) -> Arc<dyn DeviceDirectory> {
    Arc::new(StaticDirectory::new(
        devices
            .into_iter()
            .map(|device| Arc::new(device) as Arc<dyn Device>)
            .collect(),
    ))
}

pub fn frame_of(mode: &DisplayMode, value: u8) -> Vec<u8> {
    vec![value; mode.format.frame_data_size()]
}

/// Poll `condition` until it holds or `timeout` passes
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
