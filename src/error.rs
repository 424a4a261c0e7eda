//! Error types shared by the ingest and output sides

use once_cell::sync::OnceCell;
use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while binding to or driving a device.
///
/// `SizeMismatch` and `QueueOverflow` are per-frame conditions. The producer
/// callbacks absorb them into counters, they never fail the hardware stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The directory lists no devices at all
    #[error("no video device found")]
    DeviceNotFound,

    #[error("device index {index} is out of range ({count} devices)")]
    InvalidDeviceIndex { index: usize, count: usize },

    #[error("format index {index} is out of range ({count} formats)")]
    InvalidFormatIndex { index: usize, count: usize },

    #[error("device {0} has no input capability")]
    NoInputCapability(String),

    #[error("device {0} has no output capability")]
    NoOutputCapability(String),

    /// The port is held by another session
    #[error("device is busy: {0}")]
    DeviceBusy(String),

    #[error("frame size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("frame queue overflow")]
    QueueOverflow,

    #[error("timed out waiting for frame {target} (completed {completed})")]
    SyncTimeout { target: u64, completed: u64 },

    /// Fatal for the session, the caller has to start a new one
    #[error("failed to reconfigure device for the new format: {0}")]
    FormatReconfigureFailed(String),

    /// Any other rejection from a hardware call
    #[error("device error: {0}")]
    Device(String),

    #[error("instance is not running")]
    NotRunning,

    #[error("instance was already started")]
    AlreadyStarted,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Set-once error slot.
///
/// The first error recorded wins and is never cleared. Instances check it at
/// the top of every public method and degrade to no-ops once it is set.
#[derive(Debug, Default)]
pub struct StickyError(OnceCell<Error>);

impl StickyError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `error` unless an earlier one is already stored.
    pub fn set(&self, error: Error) {
        let _ = self.0.set(error);
    }

    pub fn get(&self) -> Option<&Error> {
        self.0.get()
    }

    pub fn is_set(&self) -> bool {
        self.0.get().is_some()
    }

    /// Error text, empty while healthy
    pub fn message(&self) -> String {
        self.0.get().map(ToString::to_string).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sticky_error_keeps_first_error() {
        let sticky = StickyError::new();
        assert!(!sticky.is_set());
        assert_eq!(sticky.message(), "");

        sticky.set(Error::DeviceNotFound);
        sticky.set(Error::QueueOverflow);

        assert_eq!(sticky.get(), Some(&Error::DeviceNotFound));
        assert_eq!(sticky.message(), "no video device found");
    }

    #[test]
    fn error_messages_carry_context() {
        let err = Error::InvalidDeviceIndex { index: 4, count: 2 };
        assert_eq!(err.to_string(), "device index 4 is out of range (2 devices)");

        let err = Error::SyncTimeout {
            target: 10,
            completed: 3,
        };
        assert!(err.to_string().contains("frame 10"));
    }
}
