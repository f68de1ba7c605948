//! vadev - Virtual Audio Device Streaming Engine
//!
//! Maintains the illusion of continuously flowing audio for a virtual
//! (non-hardware-backed) device: stream positions are derived from elapsed
//! clock ticks, each stream is backed by a fixed-size ring buffer, and a
//! fixed-layout shared parameter block exposes gain, peak, and position
//! data to consumers in other execution contexts.

pub mod audio;
pub mod config;
pub mod device;
pub mod error;

pub use error::{Result, VadevError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
