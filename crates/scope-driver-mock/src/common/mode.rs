//! Operational modes for mock devices.
//!
//! - **Instant**: zero delays, deterministic behavior for unit tests
//! - **Realistic**: hardware-like timing (exposure time on capture, a short
//!   serial turnaround on every firmware reply)

use std::time::Duration;

/// Operational modes for mock devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockMode {
    /// Zero delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Hardware-like timing - for simulation runs
    Realistic,
}

impl MockMode {
    /// Serial turnaround before the firmware replies.
    #[must_use]
    pub fn reply_delay(self) -> Duration {
        match self {
            MockMode::Instant => Duration::ZERO,
            MockMode::Realistic => Duration::from_millis(5),
        }
    }

    /// Whether a capture should take its exposure time.
    #[must_use]
    pub fn simulates_exposure(self) -> bool {
        matches!(self, MockMode::Realistic)
    }
}
