//! Configuration module for the loopback.
//!
//! Provides CLI argument parsing and validation into a stream configuration.

#[allow(clippy::module_inception)]
mod config;

pub use config::AppConfig;
