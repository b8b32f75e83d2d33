//! The capture/playback pair plus the transfer buffer for one loopback run.

use std::fmt;
use std::time::Instant;

use tracing::debug;

use super::timing::OverheadStats;
use crate::audio::{DeviceHandle, HwAddress, PcmBackend, PcmStream, StreamConfig, StreamDirection};
use crate::error::LoopbackError;

/// Lifecycle of a session. Teardown is reachable from every earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Opening,
    Validating,
    Running,
    Teardown,
    Done,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Init => "init",
            SessionState::Opening => "opening",
            SessionState::Validating => "validating",
            SessionState::Running => "running",
            SessionState::Teardown => "teardown",
            SessionState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Both device handles and the shared transfer buffer.
///
/// The buffer only exists while both handles are open and its length never
/// changes once allocated. Everything is released by [`LoopbackSession::teardown`],
/// which also runs on drop.
pub struct LoopbackSession<S: PcmStream> {
    capture: DeviceHandle<S>,
    playback: DeviceHandle<S>,
    buffer: Option<Vec<u8>>,
    buffer_bytes: Option<u32>,
    state: SessionState,
    bytes: u64,
    iterations: u64,
    frames: u64,
}

impl<S: PcmStream> LoopbackSession<S> {
    pub fn new(capture: HwAddress, playback: HwAddress) -> Self {
        Self {
            capture: DeviceHandle::new(capture, StreamDirection::Capture),
            playback: DeviceHandle::new(playback, StreamDirection::Playback),
            buffer: None,
            buffer_bytes: None,
            state: SessionState::Init,
            bytes: 0,
            iterations: 0,
            frames: 0,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn capture(&self) -> &DeviceHandle<S> {
        &self.capture
    }

    pub fn playback(&self) -> &DeviceHandle<S> {
        &self.playback
    }

    /// Bytes relayed so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Completed capture+playback round trips.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Size of the transfer buffer if one was ever allocated.
    pub fn buffer_bytes(&self) -> Option<u32> {
        self.buffer_bytes
    }

    fn enter(&mut self, next: SessionState) {
        debug!("Loopback session: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Open capture, then playback, with the same configuration.
    pub fn open<B>(&mut self, backend: &mut B, config: &StreamConfig) -> Result<(), LoopbackError>
    where
        B: PcmBackend<Stream = S>,
    {
        self.enter(SessionState::Opening);
        self.capture.open(backend, config)?;
        self.playback.open(backend, config)
    }

    /// Check that both hardware buffers hold the same number of bytes and return it.
    pub fn validate(&mut self) -> Result<u32, LoopbackError> {
        self.enter(SessionState::Validating);
        let (Some(capture), Some(playback)) = (self.capture.buffer_size_bytes(), self.playback.buffer_size_bytes()) else {
            return Err(LoopbackError::Configuration("both devices must be open before validation".to_string()));
        };
        if capture != playback {
            return Err(LoopbackError::BufferSizeMismatch { capture, playback });
        }
        Ok(capture)
    }

    /// Allocate the transfer buffer and enter the running state.
    pub fn allocate(&mut self, bytes: u32) -> Result<(), LoopbackError> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(bytes as usize)
            .map_err(|_| LoopbackError::Allocation { bytes })?;
        buffer.resize(bytes as usize, 0);
        self.buffer = Some(buffer);
        self.buffer_bytes = Some(bytes);
        self.enter(SessionState::Running);
        Ok(())
    }

    /// One relay iteration: fill the buffer from capture, then drain it to playback.
    ///
    /// Bytes are only counted once the write has gone through.
    pub fn transfer_once(&mut self, mut overheads: Option<&mut OverheadStats>) -> Result<(), LoopbackError> {
        let Some(buffer) = self.buffer.as_mut() else {
            return Err(LoopbackError::Configuration("transfer buffer not allocated".to_string()));
        };

        let started = overheads.is_some().then(Instant::now);
        self.capture.read(buffer)?;
        if let (Some(stats), Some(started)) = (overheads.as_deref_mut(), started) {
            stats.record_capture(started.elapsed());
        }

        let started = overheads.is_some().then(Instant::now);
        self.playback.write(buffer)?;
        if let (Some(stats), Some(started)) = (overheads.as_deref_mut(), started) {
            stats.record_playback(started.elapsed());
        }

        self.bytes += buffer.len() as u64;
        self.iterations += 1;
        Ok(())
    }

    /// Release the buffer and both handles, returning the frames relayed.
    ///
    /// Frames are converted with the capture handle's format; a capture device that
    /// never opened means zero frames. Calling this again is a no-op.
    pub fn teardown(&mut self) -> u64 {
        if self.state == SessionState::Done {
            return self.frames;
        }
        self.enter(SessionState::Teardown);

        self.frames = self.capture.bytes_to_frames(self.bytes).unwrap_or(0);
        self.buffer = None;
        self.capture.close();
        self.playback.close();

        self.enter(SessionState::Done);
        self.frames
    }
}

impl<S: PcmStream> Drop for LoopbackSession<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}
