//! Error types for caniap.

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::iap::Channel;

/// Result type for caniap operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for caniap operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The firmware image cannot be transferred as given.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// A frame index past the end of the image was requested.
    #[error("Frame {index} out of range (image has {total} frames)")]
    OutOfRange {
        /// Requested frame index.
        index: usize,
        /// Number of whole frames in the image.
        total: usize,
    },

    /// The device could not erase its application area.
    #[error("Device reported erase failure (status {status:#04x})")]
    EraseFailed {
        /// Status byte reported by the device.
        status: u8,
    },

    /// No response arrived on the expected channel in time.
    #[error("No response on {channel} within {timeout:?}")]
    TransportTimeout {
        /// Channel the response was expected on.
        channel: Channel,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// A response arrived but could not be decoded.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A page kept failing CRC verification past the configured ceiling.
    #[error("Page at frame {page_start} failed CRC verification {attempts} times")]
    PageRetriesExhausted {
        /// First frame of the failing page.
        page_start: usize,
        /// Number of failed attempts.
        attempts: u32,
    },

    /// The embedding application requested interruption.
    #[error("Operation cancelled")]
    Cancelled,

    /// The transfer stopped after the start handshake.
    #[error("Transfer aborted after {committed_frame} committed frames: {source}")]
    Aborted {
        /// Frames permanently accepted by the device before the failure.
        committed_frame: usize,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Wrap an error raised mid-transfer with the committed position.
    pub(crate) fn aborted(committed_frame: usize, source: Self) -> Self {
        match source {
            already @ Self::Aborted { .. } => already,
            source => Self::Aborted {
                committed_frame,
                source: Box::new(source),
            },
        }
    }

    /// Last committed frame index, if the error carries one.
    #[must_use]
    pub fn committed_frame(&self) -> Option<usize> {
        match self {
            Self::Aborted {
                committed_frame, ..
            } => Some(*committed_frame),
            _ => None,
        }
    }

    /// The innermost error, looking through `Aborted`.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Aborted { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this error stems from an interruption request.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }

    /// Whether the adapter port does not exist.
    ///
    /// Only serial port errors count; a missing image file is a plain I/O error.
    #[must_use]
    pub fn is_device_not_found(&self) -> bool {
        #[cfg(feature = "native")]
        if let Self::Serial(e) = self.root() {
            return matches!(
                e.kind(),
                serialport::ErrorKind::NoDevice | serialport::ErrorKind::Io(io::ErrorKind::NotFound)
            );
        }
        false
    }
}
