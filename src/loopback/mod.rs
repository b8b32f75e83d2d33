//! The capture → playback relay.
//!
//! A [`LoopbackEngine`] opens both ends through a PCM backend, checks their
//! buffers line up, then copies one hardware buffer at a time until a
//! [`ShutdownFlag`] is raised or a transfer fails.

mod engine;
mod session;
mod shutdown;
mod timing;

pub use engine::{LoopbackEngine, LoopbackReport, StopReason};
pub use shutdown::{ShutdownFlag, listen_for_signals};
