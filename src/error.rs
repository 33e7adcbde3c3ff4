//! Custom error types for the console.
//!
//! `PldError` is the crate-wide error. Two narrower enums sit underneath it and
//! are returned directly from the serial plumbing:
//!
//! - **`TransportError`**: the port could not be opened, was found closed, or a
//!   read/write failed. The link stays usable; the next call may succeed.
//! - **`SendError`**: what the command writer returns. Either there is no device
//!   on the link at all (`NoDevice`, nothing was attempted) or the transport
//!   failed after the single reopen-and-retry (`Transport`).
//!
//! Parse failures have no variant on purpose: decoders degrade to "field
//! unchanged" and never surface an error.

use crate::link::Link;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, PldError>;

/// Top-level error for the console.
#[derive(Error, Debug)]
pub enum PldError {
    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O error outside the serial links (log file, directories).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial support was compiled out.
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,
}

/// Failure of a serial link.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Opening (or reopening) the port failed.
    #[error("Failed to open serial port '{port}': {reason}")]
    Open {
        /// Port name, e.g. `COM1` or `/dev/ttyUSB0`
        port: String,
        /// Underlying cause
        reason: String,
    },

    /// The port is known but currently closed.
    #[error("Serial port '{0}' is closed")]
    Closed(String),

    /// Writing to the port failed.
    #[error("Write to serial port '{port}' failed: {source}")]
    Write {
        /// Port name
        port: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Reading from the port failed.
    #[error("Read from serial port '{port}' failed: {source}")]
    Read {
        /// Port name
        port: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The blocking I/O task did not complete.
    #[error("Serial I/O task failed: {0}")]
    Task(String),
}

/// Result of [`crate::command::CommandWriter::send`].
#[derive(Error, Debug)]
pub enum SendError {
    /// No device was found for the link; no I/O was attempted.
    #[error("No device on {0} link")]
    NoDevice(Link),

    /// The link exists but the write failed, including after one reopen attempt.
    #[error("Transport error on {link} link: {source}")]
    Transport {
        /// Link the command was addressed to
        link: Link,
        /// What went wrong underneath
        #[source]
        source: TransportError,
    },
}

impl SendError {
    /// Link the failed command was addressed to.
    pub fn link(&self) -> Link {
        match self {
            SendError::NoDevice(link) => *link,
            SendError::Transport { link, .. } => *link,
        }
    }

    /// `true` when nothing was attempted because the link has no device.
    pub fn is_no_device(&self) -> bool {
        matches!(self, SendError::NoDevice(_))
    }
}
