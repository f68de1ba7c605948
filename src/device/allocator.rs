//! Stream buffer acquisition with loopback fallback
//!
//! Dedicated allocations draw from an optional byte budget; when the budget
//! is exhausted, streams fall back to the device-wide loopback region and
//! share it. The loopback region is owned by the device and outlives every
//! stream bound to it.

use crate::audio::BufferRegion;
use crate::error::{Result, VadevError};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

struct Budget {
    limit: Option<usize>,
    in_use: usize,
}

/// Acquires backing memory for stream ring buffers
pub struct BufferAllocator {
    loopback: Option<Arc<BufferRegion>>,
    budget: Mutex<Budget>,
}

impl BufferAllocator {
    /// Create an allocator with a pre-allocated, zeroed loopback region of
    /// `loopback_bytes` (0 disables the fallback) and an optional cap on
    /// total dedicated bytes.
    pub fn new(loopback_bytes: usize, dedicated_limit: Option<usize>) -> Self {
        let loopback = if loopback_bytes > 0 {
            Some(Arc::new(BufferRegion::new(loopback_bytes)))
        } else {
            None
        };
        Self {
            loopback,
            budget: Mutex::new(Budget {
                limit: dedicated_limit,
                in_use: 0,
            }),
        }
    }

    /// The shared loopback region, if configured
    pub fn loopback(&self) -> Option<&Arc<BufferRegion>> {
        self.loopback.as_ref()
    }

    /// Loopback region size in bytes (0 when disabled)
    pub fn loopback_size(&self) -> usize {
        self.loopback.as_ref().map_or(0, |r| r.len())
    }

    /// Dedicated bytes currently handed out
    pub fn dedicated_in_use(&self) -> usize {
        self.budget.lock().in_use
    }

    /// Acquire a region of `requested` bytes.
    ///
    /// Tries a dedicated allocation first; on exhaustion falls back to the
    /// shared loopback region. Fails with `ResourceExhausted` only when both
    /// are unavailable. Setup path only; never called while a stream runs.
    pub fn allocate(self: Arc<Self>, requested: usize) -> Result<StreamBuffer> {
        if requested == 0 {
            return Err(VadevError::InvalidArgument("requested buffer size is zero"));
        }

        let fits = {
            let mut budget = self.budget.lock();
            let fits = budget
                .limit
                .map_or(true, |limit| budget.in_use + requested <= limit);
            if fits {
                budget.in_use += requested;
            }
            fits
        };
        if fits {
            debug!("allocated dedicated stream buffer: {} bytes", requested);
            return Ok(StreamBuffer {
                region: Arc::new(BufferRegion::new(requested)),
                size: requested,
                ownership: Ownership::Dedicated { allocator: self },
            });
        }

        if let Some(loopback) = &self.loopback {
            warn!(
                "dedicated allocation of {} bytes unavailable, sharing {} byte loopback region",
                requested,
                loopback.len()
            );
            return Ok(StreamBuffer {
                region: Arc::clone(loopback),
                size: loopback.len(),
                ownership: Ownership::Shared,
            });
        }

        Err(VadevError::ResourceExhausted(
            "dedicated allocation failed and no loopback region exists",
        ))
    }

    fn reclaim(&self, bytes: usize) {
        let mut budget = self.budget.lock();
        budget.in_use = budget.in_use.saturating_sub(bytes);
    }
}

enum Ownership {
    /// Exclusively owned; bytes return to the budget on drop
    Dedicated { allocator: Arc<BufferAllocator> },
    /// The device-wide loopback region; never freed by a stream
    Shared,
}

/// Backing memory handed to one stream.
///
/// Acquisition and release are symmetric by construction: dropping the value
/// releases dedicated memory on every exit path, and a shared region is left
/// untouched for the device to destroy at teardown.
pub struct StreamBuffer {
    region: Arc<BufferRegion>,
    size: usize,
    ownership: Ownership,
}

impl StreamBuffer {
    /// Handle to the backing region
    pub fn region(&self) -> Arc<BufferRegion> {
        Arc::clone(&self.region)
    }

    /// Usable size in bytes (the loopback size when shared)
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether this stream owns the memory exclusively
    pub fn is_exclusive(&self) -> bool {
        matches!(self.ownership, Ownership::Dedicated { .. })
    }
}

impl Drop for StreamBuffer {
    fn drop(&mut self) {
        if let Ownership::Dedicated { allocator } = &self.ownership {
            allocator.reclaim(self.size);
        }
    }
}
