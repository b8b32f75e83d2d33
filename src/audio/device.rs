//! Device addressing, the PCM capability interface, and the device handle.
//!
//! The loopback engine never talks to a sound API directly. It goes through
//! [`PcmBackend`] to open streams and [`PcmStream`] to move bytes, so the ALSA
//! backend and the in-memory test double are interchangeable.

use std::fmt;
use std::str::FromStr;

use tracing::{debug, warn};

use super::format::StreamConfig;
use crate::error::LoopbackError;

/// Hardware address of a PCM endpoint (`hw:CARD,DEVICE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HwAddress {
    pub card: u32,
    pub device: u32,
}

impl HwAddress {
    pub fn new(card: u32, device: u32) -> Self {
        Self { card, device }
    }
}

impl fmt::Display for HwAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hw:{},{}", self.card, self.device)
    }
}

impl FromStr for HwAddress {
    type Err = String;

    /// Parse `hw:CARD,DEVICE`; the `hw:` prefix is optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = trimmed.strip_prefix("hw:").unwrap_or(trimmed);
        let (card, device) = body
            .split_once(',')
            .ok_or_else(|| format!("'{s}' is not a hardware address (expected hw:CARD,DEVICE)"))?;
        let card = card
            .trim()
            .parse()
            .map_err(|_| format!("'{s}': card '{card}' is not a valid index"))?;
        let device = device
            .trim()
            .parse()
            .map_err(|_| format!("'{s}': device '{device}' is not a valid index"))?;
        Ok(Self::new(card, device))
    }
}

/// Which way samples flow through a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamDirection {
    Capture,
    Playback,
}

impl StreamDirection {
    /// Verb used in transfer diagnostics ("Error capturing sample ...").
    pub fn verb(&self) -> &'static str {
        match self {
            StreamDirection::Capture => "capturing",
            StreamDirection::Playback => "playing",
        }
    }
}

impl fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamDirection::Capture => write!(f, "capture"),
            StreamDirection::Playback => write!(f, "playback"),
        }
    }
}

/// Opens PCM streams on hardware endpoints.
pub trait PcmBackend {
    type Stream: PcmStream;

    /// Open and configure a stream. The error string is the driver's diagnostic.
    fn open(&mut self, address: HwAddress, direction: StreamDirection, config: &StreamConfig) -> Result<Self::Stream, String>;
}

/// One open, configured PCM stream. Dropping it closes the underlying resource.
pub trait PcmStream {
    /// Whether the stream came up in a usable state after configuration.
    fn is_ready(&self) -> bool;

    /// Last diagnostic reported by the driver for this stream, if any.
    fn last_error(&self) -> Option<&str>;

    /// Hardware ring buffer capacity in frames, as negotiated with the driver.
    fn buffer_size_frames(&self) -> u32;

    /// Bytes per interleaved frame for this stream's own format and channel count.
    fn bytes_per_frame(&self) -> u32;

    /// Blocking read that fills `buf` completely or fails.
    fn read(&mut self, buf: &mut [u8]) -> Result<(), String>;

    /// Blocking write of all of `buf` or failure.
    fn write(&mut self, buf: &[u8]) -> Result<(), String>;

    /// Overruns/underruns recovered so far.
    fn xrun_count(&self) -> u64 {
        0
    }

    fn frames_to_bytes(&self, frames: u32) -> u32 {
        frames.saturating_mul(self.bytes_per_frame())
    }

    fn bytes_to_frames(&self, bytes: u64) -> u64 {
        match self.bytes_per_frame() {
            0 => 0,
            per_frame => bytes / u64::from(per_frame),
        }
    }
}

/// One endpoint of the loop: an address, a direction, and (once opened) a live stream.
///
/// A handle is either closed (`stream` is `None`) or holds a stream that reported
/// ready. Half-opened streams never leave [`DeviceHandle::open`].
pub struct DeviceHandle<S: PcmStream> {
    address: HwAddress,
    direction: StreamDirection,
    stream: Option<S>,
    last_error: Option<String>,
}

impl<S: PcmStream> fmt::Debug for DeviceHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("address", &self.address)
            .field("direction", &self.direction)
            .field("open", &self.stream.is_some())
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl<S: PcmStream> DeviceHandle<S> {
    pub fn new(address: HwAddress, direction: StreamDirection) -> Self {
        Self {
            address,
            direction,
            stream: None,
            last_error: None,
        }
    }

    pub fn address(&self) -> HwAddress {
        self.address
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Last driver diagnostic seen on this handle (open or transfer failure).
    #[cfg(test)]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Open the endpoint with `config`.
    ///
    /// # Arguments
    /// * `backend` - Backend that creates and configures the stream
    /// * `config` - Stream parameters, identical for both ends of the loop
    ///
    /// # Errors
    /// Returns [`LoopbackError::DeviceOpen`] carrying the address and driver
    /// diagnostic if the stream cannot be created or does not report ready.
    /// The handle stays closed in that case.
    pub fn open<B>(&mut self, backend: &mut B, config: &StreamConfig) -> Result<(), LoopbackError>
    where
        B: PcmBackend<Stream = S>,
    {
        self.close();

        let stream = backend
            .open(self.address, self.direction, config)
            .map_err(|reason| self.open_error(reason))?;

        if !stream.is_ready() {
            let reason = stream.last_error().unwrap_or("device not ready").to_string();
            // Dropping the stream releases whatever the backend acquired.
            drop(stream);
            return Err(self.open_error(reason));
        }

        debug!(
            "Opened {} {}: {} frames buffer, {} bytes/frame",
            self.direction,
            self.address,
            stream.buffer_size_frames(),
            stream.bytes_per_frame()
        );
        self.last_error = None;
        self.stream = Some(stream);
        Ok(())
    }

    /// Hardware buffer capacity in bytes, computed from this handle's own geometry.
    /// `None` while closed.
    pub fn buffer_size_bytes(&self) -> Option<u32> {
        self.stream.as_ref().map(|s| s.frames_to_bytes(s.buffer_size_frames()))
    }

    /// Convert a byte count to frames with this handle's format. `None` while closed.
    pub fn bytes_to_frames(&self, bytes: u64) -> Option<u64> {
        self.stream.as_ref().map(|s| s.bytes_to_frames(bytes))
    }

    /// Read exactly `buf.len()` bytes from a capture stream.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<(), LoopbackError> {
        let result = match self.stream.as_mut() {
            Some(stream) => stream.read(buf),
            None => Err("device is not open".to_string()),
        };
        result.map_err(|reason| self.transfer_error(reason))
    }

    /// Write all of `buf` to a playback stream.
    pub fn write(&mut self, buf: &[u8]) -> Result<(), LoopbackError> {
        let result = match self.stream.as_mut() {
            Some(stream) => stream.write(buf),
            None => Err("device is not open".to_string()),
        };
        result.map_err(|reason| self.transfer_error(reason))
    }

    /// Release the stream if one is open. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let xruns = stream.xrun_count();
            if xruns > 0 {
                warn!("{} {} recovered from {} xrun(s)", self.direction, self.address, xruns);
            }
            drop(stream);
            debug!("Closed {} {}", self.direction, self.address);
        }
    }

    fn open_error(&mut self, reason: String) -> LoopbackError {
        self.last_error = Some(reason.clone());
        LoopbackError::DeviceOpen {
            address: self.address,
            direction: self.direction,
            reason,
        }
    }

    fn transfer_error(&mut self, reason: String) -> LoopbackError {
        self.last_error = Some(reason.clone());
        LoopbackError::TransferIo {
            address: self.address,
            direction: self.direction,
            reason,
        }
    }
}

impl<S: PcmStream> Drop for DeviceHandle<S> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::{MockBackend, MockDevice, MockStream};

    fn capture_handle() -> DeviceHandle<MockStream> {
        DeviceHandle::new(HwAddress::new(0, 0), StreamDirection::Capture)
    }

    #[test]
    fn test_parse_hw_address() {
        assert_eq!("hw:1,2".parse::<HwAddress>().unwrap(), HwAddress::new(1, 2));
        assert_eq!("3,0".parse::<HwAddress>().unwrap(), HwAddress::new(3, 0));
        assert_eq!(" hw:0, 7 ".parse::<HwAddress>().unwrap(), HwAddress::new(0, 7));
        assert!("hw:1".parse::<HwAddress>().is_err());
        assert!("hw:a,0".parse::<HwAddress>().is_err());
        assert!("hw:0,-1".parse::<HwAddress>().is_err());
        assert_eq!(HwAddress::new(1, 2).to_string(), "hw:1,2");
    }

    #[test]
    fn test_close_never_opened_is_noop() {
        let mut handle = capture_handle();
        handle.close();
        handle.close();
        assert!(!handle.is_open());
        assert_eq!(handle.buffer_size_bytes(), None);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut backend = MockBackend::new();
        let log = backend.log();
        let mut handle = capture_handle();
        handle.open(&mut backend, &StreamConfig::default()).unwrap();
        assert!(handle.is_open());

        handle.close();
        handle.close();
        drop(handle);

        assert_eq!(log.lock().closed.len(), 1);
    }

    #[test]
    fn test_buffer_size_uses_handle_geometry() {
        let mut backend = MockBackend::new().with_device(
            HwAddress::new(0, 0),
            StreamDirection::Capture,
            MockDevice {
                buffer_frames: Some(512),
                bytes_per_frame: Some(6),
                ..MockDevice::default()
            },
        );
        let mut handle = capture_handle();
        handle.open(&mut backend, &StreamConfig::default()).unwrap();
        assert_eq!(handle.buffer_size_bytes(), Some(3072));
        assert_eq!(handle.bytes_to_frames(3072 * 2), Some(1024));
    }

    #[test]
    fn test_open_failure_carries_address_and_diagnostic() {
        let mut backend = MockBackend::new().with_device(
            HwAddress::new(2, 1),
            StreamDirection::Playback,
            MockDevice {
                open_error: Some("No such device".to_string()),
                ..MockDevice::default()
            },
        );
        let mut handle: DeviceHandle<MockStream> = DeviceHandle::new(HwAddress::new(2, 1), StreamDirection::Playback);
        let err = handle.open(&mut backend, &StreamConfig::default()).unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("hw:2,1"), "{msg}");
        assert!(msg.contains("No such device"), "{msg}");
        assert!(!handle.is_open());
        assert_eq!(handle.last_error(), Some("No such device"));
        handle.close();
    }

    #[test]
    fn test_not_ready_stream_is_released() {
        let mut backend = MockBackend::new().with_device(
            HwAddress::new(0, 0),
            StreamDirection::Capture,
            MockDevice {
                not_ready: Some("cannot set hw params".to_string()),
                ..MockDevice::default()
            },
        );
        let log = backend.log();
        let mut handle = capture_handle();
        let err = handle.open(&mut backend, &StreamConfig::default()).unwrap_err();

        assert!(matches!(err, LoopbackError::DeviceOpen { .. }));
        assert!(err.to_string().contains("cannot set hw params"));
        assert!(!handle.is_open());
        // The half-configured stream was dropped inside open.
        assert_eq!(log.lock().closed.len(), 1);
    }

    #[test]
    fn test_transfer_on_closed_handle_fails() {
        let mut handle = capture_handle();
        let mut buf = [0u8; 16];
        let err = handle.read(&mut buf).unwrap_err();
        assert!(matches!(err, LoopbackError::TransferIo { .. }));
        assert_eq!(handle.last_error(), Some("device is not open"));
    }
}
