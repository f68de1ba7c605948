//! Device context: owns the clock, allocator, and shared parameter block
//!
//! One explicitly constructed `DeviceContext` per virtual device; every
//! operation hangs off it by reference. There is no ambient global state.

pub mod allocator;
pub mod events;
pub mod shared;

pub use allocator::{BufferAllocator, StreamBuffer};
pub use events::{DeviceEvent, EventSink};
pub use shared::{SharedBlockHandle, SharedParameters, SharedStateBlock};

use crate::audio::{AudioFormat, MonotonicClock, StreamController, StreamDirection, TickSource};
use crate::config::DeviceConfig;
use crate::error::Result;
use crossbeam_channel::Sender;
use std::sync::Arc;
use tracing::info;

/// Status word external pollers key on
pub const DEVICE_STATUS_MAGIC: u32 = 0x1337_BEEF;

/// Snapshot answered by a status query
#[derive(Debug, Clone)]
pub struct DeviceStatus {
    pub magic: u32,
    pub loopback_size: usize,
    pub byte_rate: u32,
    pub tick_frequency: i64,
}

/// A running virtual audio device.
///
/// Construction performs all blocking setup (loopback region, shared block
/// mapping); everything created afterwards borrows from here. Teardown is
/// `Drop`: the loopback region and the shared block die with the device.
pub struct DeviceContext {
    format: AudioFormat,
    clock: Arc<dyn TickSource>,
    allocator: Arc<BufferAllocator>,
    shared: Arc<SharedStateBlock>,
    events: EventSink,
}

impl DeviceContext {
    /// Start a device on the OS monotonic clock
    pub fn new(config: &DeviceConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Start a device on a caller-supplied tick source (tests, simulation)
    pub fn with_clock(config: &DeviceConfig, clock: Arc<dyn TickSource>) -> Result<Self> {
        let format = config.format();
        let allocator = Arc::new(BufferAllocator::new(
            config.loopback_bytes(),
            config.dedicated_limit(),
        ));

        let mut shared = SharedStateBlock::create(&config.name)?;
        shared.initialize(
            allocator.loopback_size() as u32,
            format.bytes_per_second(),
            clock.frequency(),
        );

        info!(
            "device '{}' started: {}, loopback {} bytes",
            config.name,
            format,
            allocator.loopback_size()
        );

        Ok(Self {
            format,
            clock,
            allocator,
            shared: Arc::new(shared),
            events: EventSink::disabled(),
        })
    }

    /// Register a channel for stream lifecycle events
    pub fn set_event_channel(&mut self, tx: Sender<DeviceEvent>) {
        self.events = EventSink::new(tx);
    }

    /// The device's active format
    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// The device-owned shared parameter block
    pub fn shared_block(&self) -> &SharedStateBlock {
        &self.shared
    }

    /// Loopback region size in bytes
    pub fn loopback_size(&self) -> usize {
        self.allocator.loopback_size()
    }

    /// Create a stream controller for `direction` with an already-validated
    /// format from the supported set.
    pub fn create_stream(
        &self,
        direction: StreamDirection,
        format: &AudioFormat,
    ) -> StreamController {
        let controller = StreamController::new(
            direction,
            format.bytes_per_second(),
            Arc::clone(&self.clock),
            Arc::clone(&self.allocator),
            Arc::clone(&self.shared),
            self.events.clone(),
        );
        info!("created {:?} stream ({})", direction, format);
        self.events.emit(DeviceEvent::StreamCreated { direction });
        controller
    }

    /// Answer a status query
    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            magic: DEVICE_STATUS_MAGIC,
            loopback_size: self.allocator.loopback_size(),
            byte_rate: self.format.bytes_per_second(),
            tick_frequency: self.clock.frequency(),
        }
    }

    /// Map the shared block into an external consumer's context
    pub fn map_shared_block(&self) -> Result<SharedBlockHandle> {
        self.shared.map_for_external_access()
    }
}
