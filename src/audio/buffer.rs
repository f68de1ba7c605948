//! Ring buffer over caller-owned backing memory
//!
//! One slot is permanently reserved so an empty buffer is distinguishable
//! from a full one: `available_read() + available_write() == size - 1`.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Fixed-size, zero-initialized backing region for one or more ring buffers.
///
/// The region does not track cursors; those belong to the `RingBuffer`s
/// bound over it. Several streams may bind the same region (the loopback
/// fallback), each with independent cursors.
pub struct BufferRegion {
    data: UnsafeCell<Box<[u8]>>,
}

// SAFETY: all access goes through raw pointers under the RingBuffer cursor
// discipline - a single writer advances write_pos, a single reader advances
// read_pos, and the reserved slot keeps their spans disjoint. Readers of a
// shared loopback region are torn-tolerant by contract.
unsafe impl Send for BufferRegion {}
unsafe impl Sync for BufferRegion {}

impl BufferRegion {
    /// Allocate a zeroed region of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            data: UnsafeCell::new(vec![0u8; size].into_boxed_slice()),
        }
    }

    /// Region length in bytes
    pub fn len(&self) -> usize {
        unsafe { (&*self.data.get()).len() }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn as_ptr(&self) -> *mut u8 {
        unsafe { (*self.data.get()).as_mut_ptr() }
    }
}

/// Single-producer single-consumer ring buffer
///
/// Cursor updates are single-writer-per-cursor: `write` alone advances
/// `write_pos`, `read` alone advances `read_pos`. That is sufficient for
/// lock-free operation with one concurrent writer and one concurrent reader.
/// Transfers never block and never fail; they move as many bytes as fit and
/// report the exact count.
pub struct RingBuffer {
    region: Arc<BufferRegion>,
    size: usize,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
}

impl RingBuffer {
    /// Bind a ring buffer over `region`, with both cursors at 0.
    ///
    /// `size` is clamped to the region length. Rebinding is creating a new
    /// value; the old cursor state is discarded with it.
    pub fn new(region: Arc<BufferRegion>, size: usize) -> Self {
        let size = size.min(region.len());
        Self {
            region,
            size,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    /// Buffer size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes that can be written without overtaking the reader
    pub fn available_write(&self) -> usize {
        if self.size == 0 {
            return 0;
        }
        let w = self.write_pos.load(Ordering::Acquire);
        let r = self.read_pos.load(Ordering::Acquire);
        if w >= r {
            self.size - (w - r) - 1
        } else {
            r - w - 1
        }
    }

    /// Bytes available to read
    pub fn available_read(&self) -> usize {
        if self.size == 0 {
            return 0;
        }
        let w = self.write_pos.load(Ordering::Acquire);
        let r = self.read_pos.load(Ordering::Acquire);
        if w >= r {
            w - r
        } else {
            self.size - (r - w)
        }
    }

    /// Write up to `data.len()` bytes, returning the count transferred.
    ///
    /// Copies in at most two contiguous spans (up to the physical end, then
    /// the wrapped remainder). Returns 0 silently when full.
    pub fn write(&self, data: &[u8]) -> usize {
        if self.size == 0 {
            return 0;
        }
        let w = self.write_pos.load(Ordering::Relaxed);
        let r = self.read_pos.load(Ordering::Acquire);
        let available = if w >= r {
            self.size - (w - r) - 1
        } else {
            r - w - 1
        };
        let to_write = data.len().min(available);
        if to_write == 0 {
            return 0;
        }

        let first = to_write.min(self.size - w);
        // SAFETY: w < size and the spans stay within [0, size); the reader
        // never touches the reserved gap between read_pos and write_pos.
        unsafe {
            let base = self.region.as_ptr();
            std::ptr::copy_nonoverlapping(data.as_ptr(), base.add(w), first);
            if first < to_write {
                std::ptr::copy_nonoverlapping(data.as_ptr().add(first), base, to_write - first);
            }
        }

        self.write_pos
            .store((w + to_write) % self.size, Ordering::Release);
        to_write
    }

    /// Read up to `buf.len()` bytes, returning the count transferred.
    ///
    /// Mirror of `write`; returns 0 silently when empty.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        if self.size == 0 {
            return 0;
        }
        let w = self.write_pos.load(Ordering::Acquire);
        let r = self.read_pos.load(Ordering::Relaxed);
        let available = if w >= r { w - r } else { self.size - (r - w) };
        let to_read = buf.len().min(available);
        if to_read == 0 {
            return 0;
        }

        let first = to_read.min(self.size - r);
        // SAFETY: r < size; the writer never reaches into the readable span.
        unsafe {
            let base = self.region.as_ptr();
            std::ptr::copy_nonoverlapping(base.add(r), buf.as_mut_ptr(), first);
            if first < to_read {
                std::ptr::copy_nonoverlapping(base, buf.as_mut_ptr().add(first), to_read - first);
            }
        }

        self.read_pos
            .store((r + to_read) % self.size, Ordering::Release);
        to_read
    }

    /// Zero both cursors. Memory contents are left as-is.
    pub fn reset(&self) {
        self.write_pos.store(0, Ordering::Release);
        self.read_pos.store(0, Ordering::Release);
    }
}
