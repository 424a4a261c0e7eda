//! Format-change handling shared by the ingest and output sides.
//!
//! The adopt step runs under the instance lock. The device is reconfigured
//! afterwards, outside that lock, because pausing or restarting a stream may
//! fire callbacks that take the same lock again.

use tracing::{error, info, instrument};

use crate::device::{DisplayMode, VideoPort};
use crate::error::{Error, Result};

/// An instance whose state depends on the bound display mode
pub trait FormatTarget {
    /// Swap in `mode` and discard anything sized for the old one.
    /// Called with no device lock held.
    fn adopt_format(&self, mode: &DisplayMode);

    /// Mark the session as failed; no automatic retry follows
    fn fail(&self, error: Error);
}

/// Drives one device-reported format change to completion
pub struct FormatChangeController;

impl FormatChangeController {
    /// Adopt `mode` on `target`, then pause, re-enable, flush and restart
    /// `port`. A failure is fatal for the session and is recorded on the
    /// target before being returned.
    #[instrument(skip(target, port, mode), fields(mode = %mode.name))]
    pub fn apply<P>(target: &dyn FormatTarget, port: &P, mode: DisplayMode) -> Result<()>
    where
        P: VideoPort + ?Sized,
    {
        let format = mode.format;
        target.adopt_format(&mode);

        port.pause();
        let restarted = port.enable(&mode).and_then(|()| {
            port.flush();
            port.start()
        });

        match restarted {
            Ok(()) => {
                info!(
                    "Reconfigured for {}x{} @ {:.2} fps",
                    format.width,
                    format.height,
                    format.frame_rate()
                );
                Ok(())
            }
            Err(e) => {
                error!("Failed to reconfigure device: {}", e);
                let err = Error::FormatReconfigureFailed(e.to_string());
                target.fail(err.clone());
                Err(err)
            }
        }
    }
}
