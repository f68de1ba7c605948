//! Tick-to-byte conversion math and tick sources
//!
//! Stream positions are derived purely from elapsed ticks of a monotonic
//! counter, never from how many bytes actually moved through a buffer.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Convert elapsed ticks to an absolute byte offset.
///
/// Returns 0 for a degenerate clock (`frequency <= 0`) or a non-positive
/// elapsed value. The intermediate product is 128-bit: at 192kHz/24bit the
/// 64-bit product overflows after roughly 100 days of continuous playback.
pub fn ticks_to_bytes(elapsed_ticks: i64, byte_rate: u32, frequency: i64) -> u64 {
    if frequency <= 0 || elapsed_ticks <= 0 {
        return 0;
    }
    ((elapsed_ticks as i128 * byte_rate as i128) / frequency as i128) as u64
}

/// Convert elapsed ticks to a byte offset wrapped into a ring buffer.
///
/// When `buffer_size` is 0 the unreduced byte count is returned.
pub fn calculate_position(
    elapsed_ticks: i64,
    byte_rate: u32,
    frequency: i64,
    buffer_size: usize,
) -> u64 {
    let bytes = ticks_to_bytes(elapsed_ticks, byte_rate, frequency);
    if buffer_size > 0 {
        bytes % buffer_size as u64
    } else {
        bytes
    }
}

/// A monotonic high-resolution tick counter.
///
/// The frequency is constant for the lifetime of the source and is queried
/// once per device instance.
pub trait TickSource: Send + Sync {
    /// Current tick count
    fn now(&self) -> i64;

    /// Ticks per second
    fn frequency(&self) -> i64;
}

/// Tick source backed by the OS monotonic clock.
///
/// Ticks are nanoseconds since construction, so the frequency is fixed at
/// 1 GHz regardless of platform.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for MonotonicClock {
    fn now(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }

    fn frequency(&self) -> i64 {
        1_000_000_000
    }
}

/// Manually advanced tick source for deterministic tests and simulation
pub struct ManualClock {
    ticks: AtomicI64,
    frequency: i64,
}

impl ManualClock {
    /// Create a manual clock with the given frequency, starting at tick 0
    pub fn new(frequency: i64) -> Self {
        Self {
            ticks: AtomicI64::new(0),
            frequency,
        }
    }

    /// Set the absolute tick count
    pub fn set(&self, ticks: i64) {
        self.ticks.store(ticks, Ordering::Relaxed);
    }

    /// Advance the tick count by `delta`
    pub fn advance(&self, delta: i64) {
        self.ticks.fetch_add(delta, Ordering::Relaxed);
    }
}

impl TickSource for ManualClock {
    fn now(&self) -> i64 {
        self.ticks.load(Ordering::Relaxed)
    }

    fn frequency(&self) -> i64 {
        self.frequency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_frequency_returns_zero() {
        assert_eq!(ticks_to_bytes(5_000_000, 192_000, 0), 0);
        assert_eq!(ticks_to_bytes(5_000_000, 192_000, -1), 0);
        assert_eq!(ticks_to_bytes(i64::MAX, u32::MAX, 0), 0);
    }

    #[test]
    fn test_negative_elapsed_returns_zero() {
        assert_eq!(ticks_to_bytes(-1, 192_000, 10_000_000), 0);
        assert_eq!(ticks_to_bytes(0, 192_000, 10_000_000), 0);
    }

    #[test]
    fn test_half_second_at_qpc_rate() {
        // 5,000,000 ticks at 10MHz = 0.5s; 0.5s at 192000 B/s = 96,000 bytes
        assert_eq!(ticks_to_bytes(5_000_000, 192_000, 10_000_000), 96_000);
        assert_eq!(
            calculate_position(5_000_000, 192_000, 10_000_000, 192_000),
            96_000
        );
    }

    #[test]
    fn test_position_wraps_at_buffer_size() {
        // 15,000,000 ticks = 1.5s = 288,000 bytes; wrapped into 192,000
        assert_eq!(ticks_to_bytes(15_000_000, 192_000, 10_000_000), 288_000);
        assert_eq!(
            calculate_position(15_000_000, 192_000, 10_000_000, 192_000),
            96_000
        );
    }

    #[test]
    fn test_zero_buffer_size_is_unreduced() {
        assert_eq!(
            calculate_position(5_000_000, 192_000, 10_000_000, 0),
            96_000
        );
    }

    #[test]
    fn test_idempotent_and_monotonic() {
        let a = calculate_position(7_123_456, 176_400, 10_000_000, 88_200);
        let b = calculate_position(7_123_456, 176_400, 10_000_000, 88_200);
        assert_eq!(a, b);

        // Raw byte offset never decreases as elapsed increases
        let mut last = 0;
        for elapsed in (0..50_000_000).step_by(1_000_000) {
            let bytes = ticks_to_bytes(elapsed, 192_000, 10_000_000);
            assert!(bytes >= last);
            last = bytes;
        }
    }

    #[test]
    fn test_no_overflow_after_100_days() {
        // 100 days of 10MHz ticks at 192kHz/24bit stereo (1,152,000 B/s).
        // The naive 64-bit product overflows here; the result must not.
        let elapsed = 100 * 24 * 3600 * 10_000_000i64;
        let bytes = ticks_to_bytes(elapsed, 1_152_000, 10_000_000);
        assert_eq!(bytes, 100 * 24 * 3600 * 1_152_000u64);
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        assert_eq!(clock.frequency(), 1_000_000_000);
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(10_000_000);
        assert_eq!(clock.now(), 0);
        clock.set(42);
        assert_eq!(clock.now(), 42);
        clock.advance(8);
        assert_eq!(clock.now(), 50);
        assert_eq!(clock.frequency(), 10_000_000);
    }
}
