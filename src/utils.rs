use std::sync::Arc;

use tracing::info;

use crate::device::{DeviceDirectory, DisplayMode, VideoInput, VideoOutput, VideoPort};
use crate::error::{Error, Result};

/// A device port resolved from directory indices
pub struct Binding<P: ?Sized> {
    pub device_name: String,
    pub port: Arc<P>,
    pub mode: DisplayMode,
}

/// Resolve `device_index`/`format_index` to a capture port and its mode
pub fn bind_input(
    directory: &dyn DeviceDirectory,
    device_index: usize,
    format_index: usize,
) -> Result<Binding<dyn VideoInput>> {
    let devices = directory.devices();
    if devices.is_empty() {
        return Err(Error::DeviceNotFound);
    }
    let device = devices.get(device_index).ok_or(Error::InvalidDeviceIndex {
        index: device_index,
        count: devices.len(),
    })?;

    let name = device.name();
    let port = device
        .input()
        .ok_or_else(|| Error::NoInputCapability(name.clone()))?;
    let mode = select_mode(&*port, format_index)?;

    info!("Bound input {} with {}", name, mode.name);
    Ok(Binding {
        device_name: name,
        port,
        mode,
    })
}

/// Resolve `device_index`/`format_index` to a playback port and its mode
pub fn bind_output(
    directory: &dyn DeviceDirectory,
    device_index: usize,
    format_index: usize,
) -> Result<Binding<dyn VideoOutput>> {
    let devices = directory.devices();
    if devices.is_empty() {
        return Err(Error::DeviceNotFound);
    }
    let device = devices.get(device_index).ok_or(Error::InvalidDeviceIndex {
        index: device_index,
        count: devices.len(),
    })?;

    let name = device.name();
    let port = device
        .output()
        .ok_or_else(|| Error::NoOutputCapability(name.clone()))?;
    let mode = select_mode(&*port, format_index)?;

    info!("Bound output {} with {}", name, mode.name);
    Ok(Binding {
        device_name: name,
        port,
        mode,
    })
}

fn select_mode<P: VideoPort + ?Sized>(port: &P, format_index: usize) -> Result<DisplayMode> {
    let modes = port.display_modes();
    let count = modes.len();
    modes
        .into_iter()
        .nth(format_index)
        .ok_or(Error::InvalidFormatIndex {
            index: format_index,
            count,
        })
}
