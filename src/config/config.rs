//! Application configuration and CLI argument parsing.

use clap::Parser;
use tracing::info;

use crate::audio::{HwAddress, SampleFormat, StreamConfig};
use crate::error::LoopbackError;

/// Loopback configuration.
#[derive(Parser, Debug, Clone)]
#[command(name = "pcmloop")]
#[command(
    author,
    version,
    about = "Loop audio from a PCM capture device to a PCM playback device",
    after_help = "e.g.\n   pcmloop -C hw:0,0 -P hw:1,0\nwhich will loop audio from snd card 0 device 0 to snd card 1 device 0"
)]
pub struct AppConfig {
    /// Capture hardware address (hw:CARD,DEVICE)
    #[arg(short = 'C', long, env = "PCMLOOP_CAPTURE", default_value = "hw:0,0")]
    pub capture: HwAddress,

    /// Playback hardware address (hw:CARD,DEVICE)
    #[arg(short = 'P', long, env = "PCMLOOP_PLAYBACK", default_value = "hw:0,0")]
    pub playback: HwAddress,

    /// Number of interleaved channels
    #[arg(short = 'c', long, default_value = "2")]
    pub channels: u32,

    /// Sample rate in Hz
    #[arg(short = 'r', long, default_value = "44100")]
    pub rate: u32,

    /// Bits per sample (16, 24 or 32)
    #[arg(short = 'b', long, default_value = "16")]
    pub bits: u32,

    /// Frames per period
    #[arg(short = 'p', long, default_value = "1024")]
    pub period_size: u32,

    /// Periods per hardware buffer
    #[arg(short = 'n', long, default_value = "4")]
    pub period_count: u32,

    /// Start threshold in frames (0 = driver default)
    #[arg(long, default_value = "0")]
    pub start_threshold: u32,

    /// Stop threshold in frames (0 = driver default)
    #[arg(long, default_value = "0")]
    pub stop_threshold: u32,

    /// Print capture and playback time overheads for every transfer
    #[arg(short = 'o', long)]
    pub overheads: bool,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl AppConfig {
    /// Validate the configuration and build the stream parameters shared by both devices.
    ///
    /// # Returns
    /// The [`StreamConfig`] both devices are opened with.
    ///
    /// # Errors
    /// Returns [`LoopbackError::Configuration`] if:
    /// - The bit depth is not 16, 24 or 32
    /// - The channel count, rate, period size or period count is zero
    /// - The resulting buffer would not fit in a 32-bit byte count
    pub fn validate(&self) -> Result<StreamConfig, LoopbackError> {
        let format = SampleFormat::from_bits(self.bits)?;

        let required = [
            ("channel count", self.channels),
            ("sample rate", self.rate),
            ("period size", self.period_size),
            ("period count", self.period_count),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| *value == 0) {
            return Err(LoopbackError::Configuration(format!("{name} must be greater than zero")));
        }

        let stream = StreamConfig {
            channels: self.channels,
            rate: self.rate,
            format,
            period_size: self.period_size,
            period_count: self.period_count,
            start_threshold: self.start_threshold,
            stop_threshold: self.stop_threshold,
            silence_threshold: 0,
        };
        if stream.buffer_bytes().is_none() {
            return Err(LoopbackError::Configuration(format!(
                "{} channels of {} x {} frames at {} bits is too large a buffer",
                self.channels, self.period_size, self.period_count, self.bits
            )));
        }
        Ok(stream)
    }

    /// Log the current configuration.
    pub fn log_config(&self, stream: &StreamConfig) {
        info!("Configuration:");
        info!("  Capture: {}", self.capture);
        info!("  Playback: {}", self.playback);
        info!("  Channels: {}", stream.channels);
        info!("  Sample rate: {} Hz", stream.rate);
        info!("  Format: {} ({} bit)", stream.format, stream.format.bits());
        info!(
            "  Period: {} frames x {} ({} frames buffer, {} bytes/frame)",
            stream.period_size,
            stream.period_count,
            stream.buffer_frames(),
            stream.bytes_per_frame()
        );
        if stream.start_threshold != 0 || stream.stop_threshold != 0 {
            info!("  Thresholds: start {}, stop {}", stream.start_threshold, stream.stop_threshold);
        }
        if self.overheads {
            info!("  Time overheads: on");
        }
    }
}
