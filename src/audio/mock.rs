//! In-memory PCM backend for tests.
//!
//! Streams follow a per-device script (geometry, open failures, failing or short
//! transfers) and record what happened to a shared [`MockLog`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::device::{HwAddress, PcmBackend, PcmStream, StreamDirection};
use super::format::StreamConfig;
use crate::loopback::ShutdownFlag;

/// Script for one endpoint. Unset geometry falls back to what the config requests.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    pub buffer_frames: Option<u32>,
    pub bytes_per_frame: Option<u32>,
    /// Fail `open` with this diagnostic.
    pub open_error: Option<String>,
    /// Open, but report not ready with this diagnostic.
    pub not_ready: Option<String>,
    /// 1-based transfer number that fails with an I/O error.
    pub fail_on: Option<u64>,
    /// 1-based transfer number that comes back short.
    pub short_on: Option<u64>,
}

#[derive(Debug, Default)]
pub struct MockLog {
    pub opened: Vec<(HwAddress, StreamDirection)>,
    pub closed: Vec<(HwAddress, StreamDirection)>,
    /// Bytes handed out by capture reads, one entry per read.
    pub captured: Vec<Vec<u8>>,
    /// Bytes received by playback writes, one entry per write.
    pub played: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct MockBackend {
    devices: HashMap<(HwAddress, StreamDirection), MockDevice>,
    log: Arc<Mutex<MockLog>>,
    shutdown_after: Option<(u64, ShutdownFlag)>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, address: HwAddress, direction: StreamDirection, device: MockDevice) -> Self {
        self.devices.insert((address, direction), device);
        self
    }

    /// Request shutdown on `flag` once `writes` playback writes have completed,
    /// the way a signal landing between two iterations would.
    pub fn shutdown_after_writes(mut self, writes: u64, flag: ShutdownFlag) -> Self {
        self.shutdown_after = Some((writes, flag));
        self
    }

    pub fn log(&self) -> Arc<Mutex<MockLog>> {
        self.log.clone()
    }
}

impl PcmBackend for MockBackend {
    type Stream = MockStream;

    fn open(&mut self, address: HwAddress, direction: StreamDirection, config: &StreamConfig) -> Result<MockStream, String> {
        let device = self.devices.get(&(address, direction)).cloned().unwrap_or_default();
        if let Some(err) = &device.open_error {
            return Err(err.clone());
        }

        self.log.lock().opened.push((address, direction));

        Ok(MockStream {
            address,
            direction,
            buffer_frames: device.buffer_frames.unwrap_or_else(|| config.buffer_frames()),
            bytes_per_frame: device.bytes_per_frame.unwrap_or_else(|| config.bytes_per_frame()),
            last_error: device.not_ready.clone(),
            device,
            transfers: 0,
            log: self.log.clone(),
            shutdown_after: self.shutdown_after.clone(),
        })
    }
}

#[derive(Debug)]
pub struct MockStream {
    address: HwAddress,
    direction: StreamDirection,
    buffer_frames: u32,
    bytes_per_frame: u32,
    last_error: Option<String>,
    device: MockDevice,
    transfers: u64,
    log: Arc<Mutex<MockLog>>,
    shutdown_after: Option<(u64, ShutdownFlag)>,
}

impl MockStream {
    /// Advance the transfer counter and apply the scripted failure, if any.
    fn begin_transfer(&mut self, len: usize) -> Result<(), String> {
        self.transfers += 1;
        let expected = self.frames_to_bytes(self.buffer_frames) as usize;
        let err = if self.device.fail_on == Some(self.transfers) {
            Some("Input/output error".to_string())
        } else if self.device.short_on == Some(self.transfers) {
            Some(format!("short transfer: {} of {} frames", self.buffer_frames / 2, self.buffer_frames))
        } else if len != expected {
            Some(format!("unexpected transfer size {len} (buffer is {expected} bytes)"))
        } else {
            None
        };
        match err {
            Some(err) => {
                self.last_error = Some(err.clone());
                Err(err)
            }
            None => Ok(()),
        }
    }
}

impl PcmStream for MockStream {
    fn is_ready(&self) -> bool {
        self.device.not_ready.is_none()
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
        self.begin_transfer(buf.len())?;
        let seed = self.transfers as usize * 31;
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = (seed + i) as u8;
        }
        self.log.lock().captured.push(buf.to_vec());
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), String> {
        self.begin_transfer(buf.len())?;
        let played = {
            let mut log = self.log.lock();
            log.played.push(buf.to_vec());
            log.played.len() as u64
        };
        if let Some((after, flag)) = &self.shutdown_after
            && *after == played
        {
            flag.request();
        }
        Ok(())
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.log.lock().closed.push((self.address, self.direction));
    }
}
