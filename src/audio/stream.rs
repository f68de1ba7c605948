//! Per-stream state machine and position reporting
//!
//! Positions are derived from elapsed ticks since the Running transition,
//! not from bytes moved through the ring buffer. For a device with no
//! hardware behind it the clock is the only honest progress source, and the
//! rest of the system depends on exactly this behavior.

use crate::audio::buffer::RingBuffer;
use crate::audio::clock::{self, TickSource};
use crate::device::allocator::{BufferAllocator, StreamBuffer};
use crate::device::events::{DeviceEvent, EventSink};
use crate::device::shared::SharedStateBlock;
use crate::error::{Result, VadevError};
use std::sync::Arc;
use tracing::debug;

/// Direction of a stream, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    /// The engine exposes data for an external consumer to drain
    Render,
    /// The engine exposes a region an external producer fills
    Capture,
}

/// Stream run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Stopped,
    Paused,
    Running,
}

/// Controller for a single render or capture stream
pub struct StreamController {
    direction: StreamDirection,
    state: StreamState,
    /// Tick count at the last Running transition; 0 when not running
    start_ticks: i64,
    /// Offset pair reported while Paused
    frozen_offset: u64,
    byte_rate: u32,
    frequency: i64,
    clock: Arc<dyn TickSource>,
    allocator: Arc<BufferAllocator>,
    shared: Arc<SharedStateBlock>,
    buffer: Option<RingBuffer>,
    backing: Option<StreamBuffer>,
    events: EventSink,
}

impl StreamController {
    pub(crate) fn new(
        direction: StreamDirection,
        byte_rate: u32,
        clock: Arc<dyn TickSource>,
        allocator: Arc<BufferAllocator>,
        shared: Arc<SharedStateBlock>,
        events: EventSink,
    ) -> Self {
        // The tick frequency is constant per device; query it once
        let frequency = clock.frequency();
        Self {
            direction,
            state: StreamState::Stopped,
            start_ticks: 0,
            frozen_offset: 0,
            byte_rate,
            frequency,
            clock,
            allocator,
            shared,
            buffer: None,
            backing: None,
            events,
        }
    }

    pub fn direction(&self) -> StreamDirection {
        self.direction
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn byte_rate(&self) -> u32 {
        self.byte_rate
    }

    /// Transition the stream. Stopping is immediate and synchronous; there
    /// is no pending-cancellation state.
    pub fn set_state(&mut self, next: StreamState) {
        match next {
            StreamState::Running => {
                self.start_ticks = self.clock.now();
                let params = self.shared.params();
                match self.direction {
                    StreamDirection::Render => params.set_render_start_qpc(self.start_ticks),
                    StreamDirection::Capture => params.set_capture_start_qpc(self.start_ticks),
                }
            }
            StreamState::Stopped => {
                self.start_ticks = 0;
                self.frozen_offset = 0;
            }
            StreamState::Paused => {
                // Freeze what the clock says right now; start_ticks stays
                // untouched so a later Stopped/Running transition behaves
                // normally. Pausing an already-paused stream keeps the
                // existing frozen value.
                if self.state == StreamState::Running && self.start_ticks != 0 {
                    let pos = self.current_offset();
                    self.mirror(pos);
                    self.frozen_offset = pos;
                } else if self.state == StreamState::Stopped {
                    self.frozen_offset = 0;
                }
            }
        }
        debug!("{:?} stream state -> {:?}", self.direction, next);
        self.state = next;
        self.events.emit(DeviceEvent::StreamStateChanged {
            direction: self.direction,
            state: next,
        });
    }

    /// Current (play, write) byte offsets.
    ///
    /// Running: both offsets are the clock-derived position, which is also
    /// mirrored into the shared block. Paused: the frozen pair from the
    /// pause transition. Otherwise (0, 0). Fast path - never blocks or
    /// allocates.
    pub fn position(&self) -> (u64, u64) {
        match self.state {
            StreamState::Running if self.start_ticks != 0 => {
                let pos = self.current_offset();
                self.mirror(pos);
                (pos, pos)
            }
            StreamState::Paused => (self.frozen_offset, self.frozen_offset),
            _ => (0, 0),
        }
    }

    fn current_offset(&self) -> u64 {
        let size = self.buffer.as_ref().map_or(0, |b| b.size());
        if size == 0 {
            return 0;
        }
        let elapsed = self.clock.now() - self.start_ticks;
        clock::calculate_position(elapsed, self.byte_rate, self.frequency, size)
    }

    fn mirror(&self, pos: u64) {
        let params = self.shared.params();
        match self.direction {
            StreamDirection::Render => params.set_write_pos(pos as u32),
            StreamDirection::Capture => params.set_read_pos(pos as u32),
        }
    }

    /// Acquire backing memory and bind the ring buffer over it.
    ///
    /// Returns the actual buffer size, which is the loopback region size
    /// when the allocator fell back to sharing it.
    pub fn allocate_buffer(&mut self, requested: usize) -> Result<usize> {
        if self.backing.is_some() {
            return Err(VadevError::AlreadyAllocated);
        }

        let backing = Arc::clone(&self.allocator).allocate(requested)?;
        let actual = backing.len();
        debug!(
            "{:?} stream bound {} byte buffer (exclusive: {})",
            self.direction,
            actual,
            backing.is_exclusive()
        );

        self.buffer = Some(RingBuffer::new(backing.region(), actual));
        self.events.emit(DeviceEvent::BufferAllocated {
            direction: self.direction,
            bytes: actual,
            shared: !backing.is_exclusive(),
        });
        self.backing = Some(backing);
        Ok(actual)
    }

    /// Release the stream's buffer binding.
    ///
    /// Dedicated memory returns to the allocator budget; a shared loopback
    /// region is left for the device to destroy at teardown. Idempotent.
    pub fn free_buffer(&mut self) {
        if let Some(buffer) = &self.buffer {
            buffer.reset();
        }
        self.buffer = None;
        self.backing = None;
    }

    /// The bound ring buffer, if one has been allocated
    pub fn buffer(&self) -> Option<&RingBuffer> {
        self.buffer.as_ref()
    }

    /// Buffer size in bytes; fails before allocation
    pub fn buffer_size(&self) -> Result<usize> {
        self.buffer
            .as_ref()
            .map(|b| b.size())
            .ok_or(VadevError::DeviceNotReady("no audio buffer allocated"))
    }

    /// Whether the stream owns its backing memory exclusively
    pub fn has_exclusive_buffer(&self) -> bool {
        self.backing.as_ref().map_or(false, |b| b.is_exclusive())
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        // Cursors are zeroed on teardown; shared loopback memory survives us
        if let Some(buffer) = &self.buffer {
            buffer.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ManualClock;
    use crossbeam_channel::bounded;

    const QPC_FREQ: i64 = 10_000_000;
    const BYTE_RATE: u32 = 192_000;

    fn test_stream(
        direction: StreamDirection,
    ) -> (StreamController, Arc<ManualClock>, Arc<SharedStateBlock>) {
        let clock = Arc::new(ManualClock::new(QPC_FREQ));
        let allocator = Arc::new(BufferAllocator::new(128 * 1024, None));
        let mut block = SharedStateBlock::create("stream-test").unwrap();
        block.initialize(128 * 1024, BYTE_RATE, QPC_FREQ);
        let shared = Arc::new(block);
        let controller = StreamController::new(
            direction,
            BYTE_RATE,
            clock.clone(),
            allocator,
            shared.clone(),
            EventSink::disabled(),
        );
        (controller, clock, shared)
    }

    #[test]
    fn test_stopped_reports_zero() {
        let (stream, _clock, _shared) = test_stream(StreamDirection::Render);
        assert_eq!(stream.state(), StreamState::Stopped);
        assert_eq!(stream.position(), (0, 0));
    }

    #[test]
    fn test_running_position_is_clock_derived() {
        let (mut stream, clock, shared) = test_stream(StreamDirection::Render);
        assert_eq!(stream.allocate_buffer(192_000).unwrap(), 192_000);

        clock.set(1_000_000);
        stream.set_state(StreamState::Running);
        clock.set(6_000_000); // 0.5s at 10MHz since the transition
        assert_eq!(stream.position(), (96_000, 96_000));
        assert_eq!(shared.params().write_pos(), 96_000);

        // Nothing was written to the ring buffer; position moved anyway
        assert_eq!(stream.buffer().unwrap().available_read(), 0);
    }

    #[test]
    fn test_position_wraps_at_buffer_size() {
        let (mut stream, clock, _shared) = test_stream(StreamDirection::Render);
        stream.allocate_buffer(192_000).unwrap();

        clock.set(1_000_000);
        stream.set_state(StreamState::Running);
        clock.set(16_000_000); // 1.5s -> 288,000 raw bytes
        assert_eq!(stream.position(), (96_000, 96_000));
    }

    #[test]
    fn test_running_without_buffer_reports_zero() {
        let (mut stream, clock, _shared) = test_stream(StreamDirection::Render);
        clock.set(1_000_000);
        stream.set_state(StreamState::Running);
        clock.set(6_000_000);
        assert_eq!(stream.position(), (0, 0));
    }

    #[test]
    fn test_pause_freezes_position() {
        let (mut stream, clock, _shared) = test_stream(StreamDirection::Render);
        stream.allocate_buffer(192_000).unwrap();

        clock.set(1_000_000);
        stream.set_state(StreamState::Running);
        clock.set(6_000_000);
        stream.set_state(StreamState::Paused);

        // Wall-clock time keeps passing; the reported position must not
        clock.set(10_000_000);
        assert_eq!(stream.position(), (96_000, 96_000));
        clock.set(21_000_000);
        assert_eq!(stream.position(), (96_000, 96_000));
    }

    #[test]
    fn test_resume_reanchors_clock() {
        let (mut stream, clock, _shared) = test_stream(StreamDirection::Render);
        stream.allocate_buffer(192_000).unwrap();

        clock.set(1_000_000);
        stream.set_state(StreamState::Running);
        clock.set(6_000_000);
        stream.set_state(StreamState::Paused);

        clock.set(10_000_000);
        stream.set_state(StreamState::Running);
        clock.set(15_000_000); // 0.5s since resume
        assert_eq!(stream.position(), (96_000, 96_000));
    }

    #[test]
    fn test_stop_resets_position_state() {
        let (mut stream, clock, _shared) = test_stream(StreamDirection::Render);
        stream.allocate_buffer(192_000).unwrap();

        clock.set(1_000_000);
        stream.set_state(StreamState::Running);
        clock.set(6_000_000);
        stream.set_state(StreamState::Stopped);
        assert_eq!(stream.position(), (0, 0));

        // Pausing a stopped stream reports zero, not a stale freeze
        stream.set_state(StreamState::Paused);
        assert_eq!(stream.position(), (0, 0));
    }

    #[test]
    fn test_running_transition_mirrors_start_ticks() {
        let (mut render, clock, shared) = test_stream(StreamDirection::Render);
        clock.set(42);
        render.set_state(StreamState::Running);
        assert_eq!(shared.params().render_start_qpc(), 42);
        assert_eq!(shared.params().capture_start_qpc(), 0);
    }

    #[test]
    fn test_capture_mirrors_read_pos() {
        let (mut stream, clock, shared) = test_stream(StreamDirection::Capture);
        stream.allocate_buffer(192_000).unwrap();

        clock.set(1_000_000);
        stream.set_state(StreamState::Running);
        clock.set(6_000_000);
        stream.position();
        assert_eq!(shared.params().read_pos(), 96_000);
        assert_eq!(shared.params().write_pos(), 0);
        assert_eq!(shared.params().capture_start_qpc(), 1_000_000);
        assert_eq!(shared.params().render_start_qpc(), 0);
    }

    #[test]
    fn test_double_allocation_rejected() {
        let (mut stream, _clock, _shared) = test_stream(StreamDirection::Render);
        stream.allocate_buffer(4096).unwrap();
        assert!(matches!(
            stream.allocate_buffer(4096),
            Err(VadevError::AlreadyAllocated)
        ));
    }

    #[test]
    fn test_buffer_size_before_allocation() {
        let (stream, _clock, _shared) = test_stream(StreamDirection::Render);
        assert!(matches!(
            stream.buffer_size(),
            Err(VadevError::DeviceNotReady(_))
        ));
    }

    #[test]
    fn test_free_buffer_allows_reallocation() {
        let (mut stream, _clock, _shared) = test_stream(StreamDirection::Render);
        stream.allocate_buffer(4096).unwrap();
        assert!(stream.has_exclusive_buffer());

        stream.free_buffer();
        assert!(stream.buffer().is_none());
        assert_eq!(stream.allocate_buffer(8192).unwrap(), 8192);
    }

    #[test]
    fn test_state_changes_emit_events() {
        let clock = Arc::new(ManualClock::new(QPC_FREQ));
        let allocator = Arc::new(BufferAllocator::new(0, None));
        let mut block = SharedStateBlock::create("stream-events").unwrap();
        block.initialize(0, BYTE_RATE, QPC_FREQ);
        let (tx, rx) = bounded(16);
        let mut stream = StreamController::new(
            StreamDirection::Render,
            BYTE_RATE,
            clock,
            allocator,
            Arc::new(block),
            EventSink::new(tx),
        );

        stream.set_state(StreamState::Running);
        assert!(matches!(
            rx.try_recv(),
            Ok(DeviceEvent::StreamStateChanged {
                direction: StreamDirection::Render,
                state: StreamState::Running,
            })
        ));
    }
}
