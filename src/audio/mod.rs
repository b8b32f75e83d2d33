//! Audio device layer for the loopback.
//!
//! Defines the stream configuration, the PCM capability interface the engine
//! drives, and the ALSA implementation of it (Linux only).

#[cfg(target_os = "linux")]
mod alsa;
mod device;
mod format;
#[cfg(test)]
pub mod mock;

#[cfg(target_os = "linux")]
pub use self::alsa::AlsaBackend;
pub use device::{DeviceHandle, HwAddress, PcmBackend, PcmStream, StreamDirection};
pub use format::{SampleFormat, StreamConfig};
