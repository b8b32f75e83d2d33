//! PCM sample formats and the stream configuration shared by both devices.

use std::fmt;

use crate::error::LoopbackError;

/// Interleaved little-endian integer sample formats the loop can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    #[default]
    S16Le,
    /// 24 significant bits stored in a 4-byte container.
    S24Le,
    S32Le,
}

impl SampleFormat {
    /// Map a bit depth given on the command line to a sample format.
    ///
    /// # Errors
    /// Returns [`LoopbackError::Configuration`] for anything other than 16, 24 or 32.
    pub fn from_bits(bits: u32) -> Result<Self, LoopbackError> {
        match bits {
            32 => Ok(SampleFormat::S32Le),
            24 => Ok(SampleFormat::S24Le),
            16 => Ok(SampleFormat::S16Le),
            other => Err(LoopbackError::Configuration(format!("{other} bits is not supported"))),
        }
    }

    /// Significant bits per sample.
    pub fn bits(&self) -> u32 {
        match self {
            SampleFormat::S16Le => 16,
            SampleFormat::S24Le => 24,
            SampleFormat::S32Le => 32,
        }
    }

    /// Bytes one sample occupies in an interleaved buffer.
    pub fn bytes_per_sample(&self) -> u32 {
        match self {
            SampleFormat::S16Le => 2,
            SampleFormat::S24Le | SampleFormat::S32Le => 4,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleFormat::S16Le => write!(f, "S16_LE"),
            SampleFormat::S24Le => write!(f, "S24_LE"),
            SampleFormat::S32Le => write!(f, "S32_LE"),
        }
    }
}

/// Parameters applied identically to the capture and playback device for one session.
///
/// Thresholds are in frames; zero leaves the choice to the backend's driver default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub channels: u32,
    pub rate: u32,
    pub format: SampleFormat,
    pub period_size: u32,
    pub period_count: u32,
    pub start_threshold: u32,
    pub stop_threshold: u32,
    pub silence_threshold: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channels: 2,
            rate: 44100,
            format: SampleFormat::S16Le,
            period_size: 1024,
            period_count: 4,
            start_threshold: 0,
            stop_threshold: 0,
            silence_threshold: 0,
        }
    }
}

impl StreamConfig {
    /// Bytes per interleaved frame as requested (drivers report their own value once open).
    pub fn bytes_per_frame(&self) -> u32 {
        self.channels.saturating_mul(self.format.bytes_per_sample())
    }

    /// Requested ring buffer length in frames.
    pub fn buffer_frames(&self) -> u32 {
        self.period_size.saturating_mul(self.period_count)
    }

    /// Requested ring buffer length in bytes, `None` if it does not fit in a `u32`.
    pub fn buffer_bytes(&self) -> Option<u32> {
        self.channels
            .checked_mul(self.format.bytes_per_sample())?
            .checked_mul(self.period_size)?
            .checked_mul(self.period_count)
    }
}
