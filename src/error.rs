//! Error types for the loopback session.

use thiserror::Error;

use crate::audio::{HwAddress, StreamDirection};

/// Everything that can stop a loopback session before or during the relay.
///
/// None of these are retried: each one is logged where it happens and the
/// session moves straight to teardown.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoopbackError {
    /// Invalid stream parameters (e.g. an unsupported bit depth). Raised before
    /// any device is opened.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("Unable to open PCM {direction} device {address} ({reason})")]
    DeviceOpen {
        address: HwAddress,
        direction: StreamDirection,
        reason: String,
    },

    #[error("Unequal PCM buffer size [capture {capture}; playback {playback}] bytes")]
    BufferSizeMismatch { capture: u32, playback: u32 },

    #[error("Unable to allocate {bytes} bytes for the transfer buffer")]
    Allocation { bytes: u32 },

    #[error("Error {} sample on {address} ({reason})", .direction.verb())]
    TransferIo {
        address: HwAddress,
        direction: StreamDirection,
        reason: String,
    },
}
