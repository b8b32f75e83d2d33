//! ALSA backend: raw interleaved PCM on `hw:CARD,DEVICE` endpoints.

use alsa::pcm::{Access, Format, Frames, HwParams, PCM, State};
use alsa::{Direction, ValueOr};
use tracing::{debug, warn};

use super::device::{HwAddress, PcmBackend, PcmStream, StreamDirection};
use super::format::{SampleFormat, StreamConfig};

/// Recoveries (xrun, suspend, EINTR) attempted for a single transfer before giving up.
const MAX_RECOVERIES: u32 = 8;

#[derive(Debug, Default)]
pub struct AlsaBackend;

impl PcmBackend for AlsaBackend {
    type Stream = AlsaStream;

    fn open(&mut self, address: HwAddress, direction: StreamDirection, config: &StreamConfig) -> Result<AlsaStream, String> {
        check_supported(config)?;
        let name = address.to_string();
        let pcm = PCM::new(&name, alsa_direction(direction), false).map_err(|e| e.to_string())?;

        let geometry = configure_pcm(&pcm, direction, config).map_err(|e| e.to_string())?;
        debug!(
            "ALSA {} {}: period {} frames, buffer {} frames, {} bytes/frame",
            direction, address, geometry.period_frames, geometry.buffer_frames, geometry.bytes_per_frame
        );

        Ok(AlsaStream {
            pcm,
            direction,
            buffer_frames: geometry.buffer_frames,
            bytes_per_frame: geometry.bytes_per_frame,
            xruns: 0,
            last_error: None,
        })
    }
}

pub struct AlsaStream {
    pcm: PCM,
    direction: StreamDirection,
    buffer_frames: u32,
    bytes_per_frame: u32,
    xruns: u64,
    last_error: Option<String>,
}

impl std::fmt::Debug for AlsaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlsaStream")
            .field("direction", &self.direction)
            .field("buffer_frames", &self.buffer_frames)
            .field("bytes_per_frame", &self.bytes_per_frame)
            .field("xruns", &self.xruns)
            .finish()
    }
}

impl AlsaStream {
    fn fail(&mut self, msg: String) -> String {
        self.last_error = Some(msg.clone());
        msg
    }

    /// Bring the stream back after an xrun, suspend or interrupted wait so the
    /// same transfer can be retried.
    fn recover(&mut self, err: alsa::Error, attempt: u32) -> Result<(), String> {
        if attempt >= MAX_RECOVERIES {
            return Err(self.fail(format!("{err} (gave up after {attempt} recoveries)")));
        }
        let msg = err.to_string();
        let xrun = self.pcm.state() == State::XRun;
        match self.pcm.try_recover(err, true) {
            Ok(()) => {
                if xrun {
                    self.xruns += 1;
                    warn!("ALSA {} xrun, stream re-prepared", self.direction);
                }
                Ok(())
            }
            Err(_) => Err(self.fail(msg)),
        }
    }

    fn expect_frames(&mut self, len: usize) -> Result<usize, String> {
        let per_frame = self.bytes_per_frame as usize;
        if per_frame == 0 || len % per_frame != 0 {
            return Err(self.fail(format!("transfer of {len} bytes is not a whole number of {per_frame}-byte frames")));
        }
        Ok(len / per_frame)
    }
}

impl PcmStream for AlsaStream {
    fn is_ready(&self) -> bool {
        matches!(self.pcm.state(), State::Prepared | State::Running)
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn buffer_size_frames(&self) -> u32 {
        self.buffer_frames
    }

    fn bytes_per_frame(&self) -> u32 {
        self.bytes_per_frame
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), String> {
        let expected = self.expect_frames(buf.len())?;
        let mut attempt = 0;
        loop {
            let result = self.pcm.io_bytes().readi(buf);
            match result {
                Ok(frames) if frames == expected => return Ok(()),
                Ok(frames) => return Err(self.fail(format!("short read: {frames} of {expected} frames"))),
                Err(e) => {
                    self.recover(e, attempt)?;
                    attempt += 1;
                }
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), String> {
        let expected = self.expect_frames(buf.len())?;
        let mut attempt = 0;
        loop {
            let result = self.pcm.io_bytes().writei(buf);
            match result {
                Ok(frames) if frames == expected => return Ok(()),
                Ok(frames) => return Err(self.fail(format!("short write: {frames} of {expected} frames"))),
                Err(e) => {
                    self.recover(e, attempt)?;
                    attempt += 1;
                }
            }
        }
    }

    fn xrun_count(&self) -> u64 {
        self.xruns
    }
}

struct Geometry {
    period_frames: u32,
    buffer_frames: u32,
    bytes_per_frame: u32,
}

fn alsa_direction(direction: StreamDirection) -> Direction {
    match direction {
        StreamDirection::Capture => Direction::Capture,
        StreamDirection::Playback => Direction::Playback,
    }
}

fn alsa_format(format: SampleFormat) -> Format {
    match format {
        SampleFormat::S16Le => Format::S16LE,
        SampleFormat::S24Le => Format::S24LE,
        SampleFormat::S32Le => Format::S32LE,
    }
}

/// Apply hardware and software parameters, then prepare the stream.
///
/// Rate, format, channels and period count must be accepted exactly; the period
/// size is negotiated to the nearest value the hardware supports. The resulting
/// geometry is read back from the driver.
fn configure_pcm(pcm: &PCM, direction: StreamDirection, config: &StreamConfig) -> alsa::Result<Geometry> {
    {
        let hwp = HwParams::any(pcm)?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(alsa_format(config.format))?;
        hwp.set_channels(config.channels)?;
        hwp.set_rate(config.rate, ValueOr::Nearest)?;
        hwp.set_period_size_near(config.period_size as Frames, ValueOr::Nearest)?;
        hwp.set_periods(config.period_count, ValueOr::Nearest)?;
        pcm.hw_params(&hwp)?;
    }

    let cur = pcm.hw_params_current()?;
    let period = cur.get_period_size()?;
    let buffer = cur.get_buffer_size()?;

    let (start, stop) = resolve_thresholds(direction, config, buffer);
    let swp = pcm.sw_params_current()?;
    swp.set_start_threshold(start)?;
    swp.set_stop_threshold(stop)?;
    swp.set_avail_min(period)?;
    pcm.sw_params(&swp)?;

    pcm.prepare()?;

    Ok(Geometry {
        period_frames: period as u32,
        buffer_frames: buffer as u32,
        bytes_per_frame: pcm.frames_to_bytes(1) as u32,
    })
}

/// Reject settings this backend cannot apply before any device is touched.
///
/// The silence threshold can only stay at the driver default: `alsa` exposes no
/// setter for it.
fn check_supported(config: &StreamConfig) -> Result<(), String> {
    if config.silence_threshold != 0 {
        return Err(format!(
            "silence threshold {} cannot be applied, only the driver default (0) is supported",
            config.silence_threshold
        ));
    }
    Ok(())
}

/// Start/stop thresholds in frames; zero in the config picks the usual defaults
/// for the direction.
fn resolve_thresholds(direction: StreamDirection, config: &StreamConfig, buffer: Frames) -> (Frames, Frames) {
    let start = match (config.start_threshold, direction) {
        (0, StreamDirection::Capture) => 1,
        (0, StreamDirection::Playback) => (buffer / 2).max(1),
        (v, _) => v as Frames,
    };
    let stop = match (config.stop_threshold, direction) {
        (0, StreamDirection::Capture) => buffer * 10,
        (0, StreamDirection::Playback) => buffer,
        (v, _) => v as Frames,
    };
    (start, stop)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let config = StreamConfig::default();
        assert_eq!(resolve_thresholds(StreamDirection::Capture, &config, 4096), (1, 40960));
        assert_eq!(resolve_thresholds(StreamDirection::Playback, &config, 4096), (2048, 4096));
    }

    #[test]
    fn test_explicit_thresholds() {
        let config = StreamConfig {
            start_threshold: 1024,
            stop_threshold: 8192,
            ..StreamConfig::default()
        };
        assert_eq!(resolve_thresholds(StreamDirection::Capture, &config, 4096), (1024, 8192));
        assert_eq!(resolve_thresholds(StreamDirection::Playback, &config, 4096), (1024, 8192));
    }

    #[test]
    fn test_silence_threshold_override_refused() {
        assert!(check_supported(&StreamConfig::default()).is_ok());

        let config = StreamConfig {
            silence_threshold: 64,
            ..StreamConfig::default()
        };
        let err = AlsaBackend.open(HwAddress::new(0, 0), StreamDirection::Playback, &config).unwrap_err();
        assert!(err.contains("silence threshold 64"), "{err}");
    }
}
