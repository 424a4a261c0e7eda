//! Fixed-period driver thread

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, warn};

/// Runs a closure every `period` on its own thread until stopped or dropped.
///
/// Stands in for the free-running hardware clock of a device.
pub struct Ticker {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn spawn<F>(name: &str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let thread_name = name.to_string();

        let spawned = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                debug!("{} ticker running every {:?}", thread_name, period);
                loop {
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => tick(),
                        // Explicit stop or the owner went away
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("{} ticker stopped", thread_name);
            });

        Self::from_spawn(name, stop_tx, spawned)
    }

    fn from_spawn(name: &str, stop: Sender<()>, spawned: io::Result<JoinHandle<()>>) -> Self {
        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Failed to spawn {} ticker: {}", name, e);
                None
            }
        };

        Self {
            stop: Some(stop),
            handle,
        }
    }

    /// False when the thread could not be spawned or has been stopped
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the thread and wait for the current tick to finish
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}
