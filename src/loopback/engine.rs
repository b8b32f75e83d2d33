//! Loopback engine: open, validate, relay, tear down.

use tracing::{error, info};

use super::session::LoopbackSession;
use super::shutdown::ShutdownFlag;
use super::timing::OverheadStats;
use crate::audio::{HwAddress, PcmBackend, StreamConfig};
use crate::error::LoopbackError;

/// Why the relay loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown flag was observed between iterations.
    Interrupted,
    /// Opening, validation, allocation or a transfer failed.
    Failed(LoopbackError),
}

/// Outcome of one session. Produced on every exit path.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopbackReport {
    pub frames: u64,
    pub bytes: u64,
    pub iterations: u64,
    /// Transfer buffer size, `None` if the session never got that far.
    pub buffer_bytes: Option<u32>,
    pub stop: StopReason,
    pub overheads: Option<OverheadStats>,
}

/// Drives a capture → playback relay between two endpoints of one backend.
pub struct LoopbackEngine<B: PcmBackend> {
    backend: B,
    show_overheads: bool,
}

impl<B: PcmBackend> LoopbackEngine<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            show_overheads: false,
        }
    }

    /// Time each capture and playback transfer and log the durations.
    pub fn with_overheads(mut self, enabled: bool) -> Self {
        self.show_overheads = enabled;
        self
    }

    /// Run a full session and report how much was relayed.
    ///
    /// Blocks until `shutdown` is requested or something fails. Failures are
    /// logged here; the devices are always released before returning.
    ///
    /// # Arguments
    /// * `capture` - Endpoint samples are read from
    /// * `playback` - Endpoint samples are written to
    /// * `config` - Stream parameters applied to both endpoints
    /// * `shutdown` - Checked once per iteration
    ///
    /// # Returns
    /// A [`LoopbackReport`] with the frame count and why the loop stopped.
    pub fn run(&mut self, capture: HwAddress, playback: HwAddress, config: &StreamConfig, shutdown: &ShutdownFlag) -> LoopbackReport {
        let mut session = LoopbackSession::new(capture, playback);
        let mut overheads = self.show_overheads.then(OverheadStats::default);

        let stop = match self.start(&mut session, config) {
            Ok(()) => Self::relay(&mut session, shutdown, overheads.as_mut()),
            Err(e) => StopReason::Failed(e),
        };
        if let StopReason::Failed(e) = &stop {
            error!("❌ {}", e);
        }

        let frames = session.teardown();
        if let Some(stats) = &overheads {
            stats.log_summary();
        }

        LoopbackReport {
            frames,
            bytes: session.bytes(),
            iterations: session.iterations(),
            buffer_bytes: session.buffer_bytes(),
            stop,
            overheads,
        }
    }

    /// Open both devices, check their geometry, and allocate the transfer buffer.
    fn start(&mut self, session: &mut LoopbackSession<B::Stream>, config: &StreamConfig) -> Result<(), LoopbackError> {
        session.open(&mut self.backend, config)?;
        let bytes = session.validate()?;
        session.allocate(bytes)?;

        info!(
            "🔁 Loop {} to {}: {} ch, {} Hz, {} bit, {} bytes buffer",
            session.capture().address(),
            session.playback().address(),
            config.channels,
            config.rate,
            config.format.bits(),
            bytes
        );
        Ok(())
    }

    fn relay(session: &mut LoopbackSession<B::Stream>, shutdown: &ShutdownFlag, mut overheads: Option<&mut OverheadStats>) -> StopReason {
        while !shutdown.is_requested() {
            if let Err(e) = session.transfer_once(overheads.as_deref_mut()) {
                return StopReason::Failed(e);
            }
        }
        info!("Loopback stopped after {} transfers", session.iterations());
        StopReason::Interrupted
    }
}
