//! Error types shared by every enderscope crate.
//!
//! `ScopeError` is the single error enum that crosses crate boundaries. Drivers
//! produce it, the autofocus and acquisition engines propagate it, and the
//! binary wraps it in `anyhow` at the very edge.
//!
//! ## Error Taxonomy
//!
//! - **`Protocol`**: the device answered, but not with what the protocol
//!   requires (missing `ok` after a position report, malformed `M114` tokens).
//!   The stage position must be treated as unknown after this error.
//! - **`Timeout`**: the device never produced the expected line within the
//!   transport's bounded wait. Not retried; the operator has to reset the link.
//! - **`InvalidInput`**: user-supplied values (manual position entry, plan
//!   parameters) that could not be parsed or are out of range. No state is
//!   changed when this is returned.
//! - **`CameraBusy`**: the camera is exclusively owned by another consumer
//!   (preview vs. acquisition).
//! - **`Cancelled`**: a cooperative stop request was observed between cells.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the enderscope error type.
pub type ScopeResult<T> = std::result::Result<T, ScopeError>;

/// Primary error type for enderscope.
#[derive(Error, Debug)]
pub enum ScopeError {
    /// Standard I/O operation failed (serial write, file output).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial port could not be opened or configured.
    #[error("Serial port error on {port}: {message}")]
    Serial {
        /// Port path (e.g. `/dev/ttyUSB0`)
        port: String,
        /// Underlying failure
        message: String,
    },

    /// No response line arrived within the bounded wait.
    ///
    /// **Error Type**: Fatal for the current session. The device is either
    /// busy beyond the configured timeout or no longer listening.
    #[error("Timed out after {waited:?} waiting for response to '{command}'")]
    Timeout {
        /// Command that was in flight
        command: String,
        /// How long the transport waited
        waited: Duration,
    },

    /// The device response violated the expected protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The serial link closed while a response was expected.
    #[error("Serial link closed while waiting for response to '{0}'")]
    Disconnected(String),

    /// User-supplied value rejected before any hardware action.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration values parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The camera is owned by another consumer.
    #[error("Camera busy: {0}")]
    CameraBusy(String),

    /// A stop request was honoured.
    #[error("Operation cancelled")]
    Cancelled,

    /// Hardware collaborator failure (camera, LED strip).
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// Image encoding or decoding failed.
    #[error("Image error: {0}")]
    Image(String),
}

impl ScopeError {
    /// Whether the stage position must be considered unknown after this error.
    #[must_use]
    pub fn invalidates_position(&self) -> bool {
        matches!(
            self,
            ScopeError::Protocol(_) | ScopeError::Timeout { .. } | ScopeError::Disconnected(_)
        )
    }
}
