//! Per-phase transfer timing for the `--overheads` display.

use std::time::Duration;

use tracing::info;

/// Running min/mean/max of one transfer phase (capture or playback).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseStats {
    pub count: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl Default for PhaseStats {
    fn default() -> Self {
        Self {
            count: 0,
            total: Duration::ZERO,
            min: Duration::MAX,
            max: Duration::ZERO,
        }
    }
}

impl PhaseStats {
    pub fn record(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total += elapsed;
        self.min = self.min.min(elapsed);
        self.max = self.max.max(elapsed);
    }

    pub fn mean(&self) -> Option<Duration> {
        if self.count == 0 {
            return None;
        }
        let nanos = self.total.as_nanos() / u128::from(self.count);
        Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }

    fn log_summary(&self, phase: &str) {
        match self.mean() {
            Some(mean) => info!(
                "{} time overheads: {} transfers, min {:.3} us, mean {:.3} us, max {:.3} us",
                phase,
                self.count,
                micros(self.min),
                micros(mean),
                micros(self.max)
            ),
            None => info!("{} time overheads: no transfers", phase),
        }
    }
}

/// Capture and playback timing for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OverheadStats {
    pub capture: PhaseStats,
    pub playback: PhaseStats,
}

impl OverheadStats {
    pub fn record_capture(&mut self, elapsed: Duration) {
        self.capture.record(elapsed);
        info!("capture time overheads: {:.3} us", micros(elapsed));
    }

    pub fn record_playback(&mut self, elapsed: Duration) {
        self.playback.record(elapsed);
        info!("play time overheads: {:.3} us", micros(elapsed));
    }

    pub fn log_summary(&self) {
        self.capture.log_summary("capture");
        self.playback.log_summary("play");
    }
}

/// Elapsed time in fractional microseconds.
pub fn micros(d: Duration) -> f64 {
    d.as_secs_f64() * 1e6
}
