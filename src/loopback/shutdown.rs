//! Process-wide stop request, set from signals and polled by the relay loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{debug, info};

/// Single-writer cancellation flag shared between the signal task and the engine.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop. Returns `true` only for the call that flipped the flag.
    pub fn request(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Listen for SIGINT, SIGHUP and SIGTERM and turn each into a stop request.
///
/// Runs until the runtime shuts down; signals after the first one are ignored.
pub async fn listen_for_signals(shutdown: ShutdownFlag) -> Result<()> {
    #[cfg(unix)]
    {
        use signal::unix::{SignalKind, signal as unix_signal};

        let mut hangup = unix_signal(SignalKind::hangup()).context("Failed to register SIGHUP handler")?;
        let mut terminate = unix_signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;

        loop {
            let name = tokio::select! {
                res = signal::ctrl_c() => {
                    res.context("Failed to listen for SIGINT")?;
                    "SIGINT"
                }
                _ = hangup.recv() => "SIGHUP",
                _ = terminate.recv() => "SIGTERM",
            };
            note_signal(&shutdown, name);
        }
    }

    #[cfg(not(unix))]
    {
        loop {
            signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
            note_signal(&shutdown, "Ctrl+C");
        }
    }
}

fn note_signal(shutdown: &ShutdownFlag, name: &str) {
    if shutdown.request() {
        info!("🛑 Received {}, stopping loopback after the current transfer...", name);
    } else {
        debug!("Ignoring {}, shutdown already requested", name);
    }
}
