use std::ops::{Deref, DerefMut};

use bytes::BytesMut;

use crate::device::DeviceFormat;
use crate::error::{Error, Result};

/// One decoded video frame with fixed geometry.
///
/// `bytes.len() == row_stride * height` always holds. A frame is owned by
/// exactly one queue slot (or shared read-only through an `Arc` once it has
/// been handed to an output device).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    bytes: BytesMut,
    width: u32,
    height: u32,
    row_stride: usize,
}

impl FrameBuffer {
    /// Zero-filled frame for the given format
    pub fn blank(format: &DeviceFormat) -> Self {
        Self {
            bytes: BytesMut::zeroed(format.frame_data_size()),
            width: format.width,
            height: format.height,
            row_stride: format.row_stride(),
        }
    }

    /// Copy `data` into a new frame sized for `format`
    pub fn copy_from(format: &DeviceFormat, data: &[u8]) -> Result<Self> {
        let expected = format.frame_data_size();
        if data.len() != expected {
            return Err(Error::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            bytes: BytesMut::from(data),
            width: format.width,
            height: format.height,
            row_stride: format.row_stride(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Bytes of row `y`
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.row_stride;
        self.bytes.get(start..start + self.row_stride)
    }

    pub fn matches(&self, format: &DeviceFormat) -> bool {
        self.width == format.width
            && self.height == format.height
            && self.row_stride == format.row_stride()
    }
}

impl Deref for FrameBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for FrameBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}
