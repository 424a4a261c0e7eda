//! Rate-limited frame-drop warnings

use std::time::{Duration, Instant};

use tracing::warn;

/// No warnings this soon after creation, while streams settle
const STARTUP_GRACE: Duration = Duration::from_secs(2);

/// Quiet period after each warning attempt
const SUPPRESS_WINDOW: Duration = Duration::from_secs(1);

/// Watches a monotonically increasing drop counter and warns when it moves.
///
/// A steady stream of drops produces a single warning; another one is only
/// logged after a quiet second.
#[derive(Debug)]
pub struct DropDetector {
    name: String,
    last_count: u64,
    created: Instant,
    last_attempt: Option<Instant>,
}

impl DropDetector {
    pub fn new(name: impl Into<String>) -> Self {
        Self::new_at(name, Instant::now())
    }

    pub fn new_at(name: impl Into<String>, now: Instant) -> Self {
        Self {
            name: name.into(),
            last_count: 0,
            created: now,
            last_attempt: None,
        }
    }

    /// Feed the current drop counter. Returns true when a warning was logged.
    pub fn update(&mut self, count: u64) -> bool {
        self.update_at(count, Instant::now())
    }

    pub fn update_at(&mut self, count: u64, now: Instant) -> bool {
        if count <= self.last_count {
            return false;
        }
        self.last_count = count;
        self.warn_at(now)
    }

    /// Report a drop detected elsewhere (queue underrun or trimming)
    pub fn warn(&mut self) -> bool {
        self.warn_at(Instant::now())
    }

    pub fn warn_at(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.created) < STARTUP_GRACE {
            return false;
        }

        let suppressed = self
            .last_attempt
            .is_some_and(|last| now.saturating_duration_since(last) < SUPPRESS_WINDOW);
        self.last_attempt = Some(now);

        if !suppressed {
            warn!(
                "Frame drop detected in [{}]. Increase the queue length, or lower the resolution or frame rate to prevent drops.",
                self.name
            );
        }
        !suppressed
    }
}
