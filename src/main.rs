//! pcmloop - relay audio from a PCM capture device to a PCM playback device.
//!
//! Both devices are opened with the same stream configuration, their hardware
//! buffers must match byte for byte, and audio is then copied one buffer at a
//! time until SIGINT, SIGHUP or SIGTERM arrives or a transfer fails.

mod audio;
mod config;
mod error;
mod loopback;

use std::ffi::OsString;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

use audio::{HwAddress, StreamConfig};
use config::AppConfig;
use loopback::{LoopbackReport, ShutdownFlag, StopReason, listen_for_signals};

/// Parse the command line.
///
/// # Arguments
/// * `args` - Program name followed by the user's arguments
///
/// # Returns
/// The parsed configuration, or the status to exit with: 1 for usage errors
/// (including no arguments at all), 0 after `--help`/`--version`.
fn parse_args<I, T>(args: I) -> Result<AppConfig, u8>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    if args.len() <= 1 {
        // Usage goes to stderr; stdout is reserved for the frame count.
        eprintln!("{}", AppConfig::command().render_help());
        return Err(1);
    }

    AppConfig::try_parse_from(args).map_err(|e| {
        let _ = e.print();
        if e.use_stderr() { 1 } else { 0 }
    })
}

/// Turn the parsed options into stream parameters, or the status to exit with.
fn stream_config(config: &AppConfig) -> Result<StreamConfig, u8> {
    config.validate().map_err(|e| {
        error!("❌ {}", e);
        1
    })
}

/// Run one session on the platform's PCM backend.
#[cfg(target_os = "linux")]
fn run_session(capture: HwAddress, playback: HwAddress, stream: StreamConfig, overheads: bool, shutdown: ShutdownFlag) -> Result<LoopbackReport> {
    let mut engine = loopback::LoopbackEngine::new(audio::AlsaBackend).with_overheads(overheads);
    Ok(engine.run(capture, playback, &stream, &shutdown))
}

#[cfg(not(target_os = "linux"))]
fn run_session(_capture: HwAddress, _playback: HwAddress, _stream: StreamConfig, _overheads: bool, _shutdown: ShutdownFlag) -> Result<LoopbackReport> {
    anyhow::bail!("no PCM backend is available on this platform (ALSA is required)")
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let config = match parse_args(std::env::args_os()) {
        Ok(config) => config,
        Err(code) => return Ok(ExitCode::from(code)),
    };

    // Respect RUST_LOG env var, fallback to verbose flag, default to info.
    // Logs go to stderr; stdout only carries the frame count.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| if config.verbose { EnvFilter::try_new("debug") } else { EnvFilter::try_new("info") })
        .context("Invalid log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]")))
        .init();

    debug!("pcmloop v{}", env!("CARGO_PKG_VERSION"));

    let stream = match stream_config(&config) {
        Ok(stream) => stream,
        Err(code) => return Ok(ExitCode::from(code)),
    };
    config.log_config(&stream);

    let shutdown = ShutdownFlag::new();
    let signals = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = listen_for_signals(shutdown).await {
                error!("❌ Signal handling failed: {:#}", e);
            }
        }
    });

    // The relay blocks on device I/O, so keep it off the async workers.
    let (capture, playback, overheads) = (config.capture, config.playback, config.overheads);
    let session = tokio::task::spawn_blocking(move || run_session(capture, playback, stream, overheads, shutdown));
    let report = session.await.context("Loopback session panicked")??;

    signals.abort();

    match &report.stop {
        StopReason::Interrupted => info!("✅ Loopback stopped"),
        StopReason::Failed(_) => debug!("Loopback ended after an error"),
    }
    debug!("Relayed {} bytes in {} transfers", report.bytes, report.iterations);
    if let Some(bytes) = report.buffer_bytes {
        debug!("Transfer buffer was {} bytes", bytes);
    }
    if let Some(stats) = &report.overheads {
        debug!("Timed {} capture and {} playback transfers", stats.capture.count, stats.playback.count);
    }

    println!("\nLooped {} frames", report.frames);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exit_code(args: &[&str]) -> Option<u8> {
        let config = match parse_args(std::iter::once("pcmloop").chain(args.iter().copied())) {
            Ok(config) => config,
            Err(code) => return Some(code),
        };
        stream_config(&config).err()
    }

    #[test]
    fn test_no_arguments_exits_with_usage() {
        assert_eq!(exit_code(&[]), Some(1));
    }

    #[test]
    fn test_unsupported_bit_depth_exits_one() {
        assert_eq!(exit_code(&["-C", "hw:0,0", "-P", "hw:1,0", "-b", "12"]), Some(1));
    }

    #[test]
    fn test_oversized_channel_count_exits_one() {
        assert_eq!(exit_code(&["-c", "3000000000"]), Some(1));
    }

    #[test]
    fn test_unknown_option_exits_one() {
        assert_eq!(exit_code(&["--bogus"]), Some(1));
    }

    #[test]
    fn test_help_exits_zero() {
        assert_eq!(exit_code(&["--help"]), Some(0));
    }

    #[test]
    fn test_valid_arguments_proceed() {
        assert_eq!(exit_code(&["-C", "hw:0,0", "-P", "hw:1,0", "-b", "24"]), None);
    }
}
