//! Shared parameter block
//!
//! A single fixed-layout record per device, mapped into the engine's own
//! context and, on request, into one external consumer's context. Consumers
//! poll gain, peak, clock, and position fields directly from the mapping
//! without calling back into the engine.
//!
//! Field stores are plain single-word atomics with no cross-field ordering.
//! Each field is independently meaningful and overwritten on the next update
//! cycle, so a reader in the other context tolerates one stale interval.

use crate::error::{Result, VadevError};
use memmap2::MmapRaw;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use tracing::{debug, warn};

/// The shared record. Layout must be identical in every mapped context:
/// 64-bit fields lead so every field sits at its natural alignment, and the
/// reserved trailing word keeps the total size a multiple of 8 - no padding
/// anywhere.
#[repr(C)]
pub struct SharedParameters {
    qpc_frequency: AtomicI64,
    render_start_qpc: AtomicI64,
    capture_start_qpc: AtomicI64,
    master_gain_bits: AtomicU32,
    peak_l_bits: AtomicU32,
    peak_r_bits: AtomicU32,
    buffer_size: AtomicU32,
    byte_rate: AtomicU32,
    write_pos: AtomicU32,
    read_pos: AtomicU32,
    reserved: AtomicU32,
}

const _: () = assert!(std::mem::size_of::<SharedParameters>() == 56);

impl SharedParameters {
    /// Tick frequency of the device clock (ticks per second)
    pub fn qpc_frequency(&self) -> i64 {
        self.qpc_frequency.load(Ordering::Relaxed)
    }

    pub fn set_qpc_frequency(&self, freq: i64) {
        self.qpc_frequency.store(freq, Ordering::Relaxed);
    }

    /// Tick count at the render stream's last Running transition
    pub fn render_start_qpc(&self) -> i64 {
        self.render_start_qpc.load(Ordering::Relaxed)
    }

    pub fn set_render_start_qpc(&self, ticks: i64) {
        self.render_start_qpc.store(ticks, Ordering::Relaxed);
    }

    /// Tick count at the capture stream's last Running transition
    pub fn capture_start_qpc(&self) -> i64 {
        self.capture_start_qpc.load(Ordering::Relaxed)
    }

    pub fn set_capture_start_qpc(&self, ticks: i64) {
        self.capture_start_qpc.store(ticks, Ordering::Relaxed);
    }

    /// Master gain (stored as IEEE 754 bits for layout stability)
    pub fn master_gain(&self) -> f32 {
        f32::from_bits(self.master_gain_bits.load(Ordering::Relaxed))
    }

    pub fn set_master_gain(&self, gain: f32) {
        self.master_gain_bits.store(gain.to_bits(), Ordering::Relaxed);
    }

    /// Left/right channel peak levels
    pub fn peaks(&self) -> (f32, f32) {
        (
            f32::from_bits(self.peak_l_bits.load(Ordering::Relaxed)),
            f32::from_bits(self.peak_r_bits.load(Ordering::Relaxed)),
        )
    }

    pub fn set_peaks(&self, left: f32, right: f32) {
        self.peak_l_bits.store(left.to_bits(), Ordering::Relaxed);
        self.peak_r_bits.store(right.to_bits(), Ordering::Relaxed);
    }

    /// Loopback/shared buffer size in bytes
    pub fn buffer_size(&self) -> u32 {
        self.buffer_size.load(Ordering::Relaxed)
    }

    /// Bytes per second of the active format
    pub fn byte_rate(&self) -> u32 {
        self.byte_rate.load(Ordering::Relaxed)
    }

    /// Last-reported render position (byte offset)
    pub fn write_pos(&self) -> u32 {
        self.write_pos.load(Ordering::Relaxed)
    }

    pub fn set_write_pos(&self, pos: u32) {
        self.write_pos.store(pos, Ordering::Relaxed);
    }

    /// Last-reported capture position (byte offset)
    pub fn read_pos(&self) -> u32 {
        self.read_pos.load(Ordering::Relaxed)
    }

    pub fn set_read_pos(&self, pos: u32) {
        self.read_pos.store(pos, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.qpc_frequency.store(0, Ordering::Relaxed);
        self.render_start_qpc.store(0, Ordering::Relaxed);
        self.capture_start_qpc.store(0, Ordering::Relaxed);
        self.master_gain_bits.store(0, Ordering::Relaxed);
        self.peak_l_bits.store(0, Ordering::Relaxed);
        self.peak_r_bits.store(0, Ordering::Relaxed);
        self.buffer_size.store(0, Ordering::Relaxed);
        self.byte_rate.store(0, Ordering::Relaxed);
        self.write_pos.store(0, Ordering::Relaxed);
        self.read_pos.store(0, Ordering::Relaxed);
        self.reserved.store(0, Ordering::Relaxed);
    }
}

/// Disambiguates backing files when one process creates several devices
static BLOCK_SEQ: AtomicU64 = AtomicU64::new(0);

/// The device-owned shared block: a file-backed mapping that lives from
/// device start to device teardown and is never reallocated while mapped.
pub struct SharedStateBlock {
    map: MmapRaw,
    _file: File,
    path: PathBuf,
    initialized: bool,
}

impl SharedStateBlock {
    /// Size of the shared record in bytes
    pub fn len() -> usize {
        std::mem::size_of::<SharedParameters>()
    }

    /// Create the backing file and the engine-side mapping for `name`
    pub fn create(name: &str) -> Result<Self> {
        let seq = BLOCK_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "vadev-{}-{}-{}.params",
            name,
            std::process::id(),
            seq
        ));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| {
                warn!("failed to create shared block backing file: {}", e);
                VadevError::ResourceExhausted("shared block backing file creation failed")
            })?;

        file.set_len(Self::len() as u64).map_err(|e| {
            warn!("failed to size shared block backing file: {}", e);
            VadevError::ResourceExhausted("shared block backing file sizing failed")
        })?;

        let map = MmapRaw::map_raw(&file).map_err(|e| {
            warn!("failed to map shared block: {}", e);
            VadevError::ResourceExhausted("shared block mapping failed")
        })?;

        debug!("shared parameter block created at {}", path.display());

        Ok(Self {
            map,
            _file: file,
            path,
            initialized: false,
        })
    }

    /// Zero every field, then store the supplied geometry
    pub fn initialize(&mut self, buffer_size: u32, byte_rate: u32, tick_frequency: i64) {
        let params = self.params();
        params.reset();
        params.buffer_size.store(buffer_size, Ordering::Relaxed);
        params.byte_rate.store(byte_rate, Ordering::Relaxed);
        params.qpc_frequency.store(tick_frequency, Ordering::Relaxed);
        self.initialized = true;
    }

    /// Engine-side view of the record
    pub fn params(&self) -> &SharedParameters {
        // SAFETY: the mapping is page-aligned, at least len() bytes, and
        // lives as long as self; all fields are single-word atomics.
        unsafe { &*(self.map.as_mut_ptr() as *const SharedParameters) }
    }

    /// Map the same memory for an external consumer.
    ///
    /// The returned handle detaches on drop; no explicit unmap is required
    /// for the engine side to keep operating.
    pub fn map_for_external_access(&self) -> Result<SharedBlockHandle> {
        if !self.initialized {
            return Err(VadevError::DeviceNotReady(
                "shared parameter block not initialized",
            ));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| {
                warn!("failed to reopen shared block: {}", e);
                VadevError::ResourceExhausted("shared block reopen failed")
            })?;

        let map = MmapRaw::map_raw(&file).map_err(|e| {
            warn!("failed to map shared block externally: {}", e);
            VadevError::ResourceExhausted("external shared block mapping failed")
        })?;

        Ok(SharedBlockHandle { map, _file: file })
    }

    /// Copy the raw record into `dst`, returning the byte count.
    ///
    /// Reports the required size so a caller with a short buffer can retry.
    pub fn snapshot_into(&self, dst: &mut [u8]) -> Result<usize> {
        if !self.initialized {
            return Err(VadevError::DeviceNotReady(
                "shared parameter block not initialized",
            ));
        }
        let required = Self::len();
        if dst.len() < required {
            return Err(VadevError::BufferTooSmall { required });
        }
        // SAFETY: both spans are valid for `required` bytes; readers of the
        // snapshot accept torn fields the same way mapped readers do.
        unsafe {
            std::ptr::copy_nonoverlapping(self.map.as_mut_ptr(), dst.as_mut_ptr(), required);
        }
        Ok(required)
    }

    /// Path of the backing file (diagnostics)
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SharedStateBlock {
    fn drop(&mut self) {
        // Creator owns the backing file; consumers only hold mappings
        let _ = std::fs::remove_file(&self.path);
    }
}

/// An external context's mapping of the shared block
pub struct SharedBlockHandle {
    map: MmapRaw,
    _file: File,
}

impl SharedBlockHandle {
    /// Consumer-side view of the record
    pub fn params(&self) -> &SharedParameters {
        // SAFETY: same layout and lifetime argument as SharedStateBlock::params
        unsafe { &*(self.map.as_mut_ptr() as *const SharedParameters) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn test_layout_is_packed() {
        assert_eq!(std::mem::size_of::<SharedParameters>(), 56);
        assert_eq!(offset_of!(SharedParameters, qpc_frequency), 0);
        assert_eq!(offset_of!(SharedParameters, render_start_qpc), 8);
        assert_eq!(offset_of!(SharedParameters, capture_start_qpc), 16);
        assert_eq!(offset_of!(SharedParameters, master_gain_bits), 24);
        assert_eq!(offset_of!(SharedParameters, peak_l_bits), 28);
        assert_eq!(offset_of!(SharedParameters, peak_r_bits), 32);
        assert_eq!(offset_of!(SharedParameters, buffer_size), 36);
        assert_eq!(offset_of!(SharedParameters, byte_rate), 40);
        assert_eq!(offset_of!(SharedParameters, write_pos), 44);
        assert_eq!(offset_of!(SharedParameters, read_pos), 48);
        assert_eq!(offset_of!(SharedParameters, reserved), 52);
    }

    #[test]
    fn test_gain_and_peaks_round_trip_as_bits() {
        let mut block = SharedStateBlock::create("gain-test").unwrap();
        block.initialize(0, 0, 0);
        let params = block.params();

        params.set_master_gain(0.5);
        assert_eq!(params.master_gain(), 0.5);

        params.set_peaks(0.25, 0.75);
        assert_eq!(params.peaks(), (0.25, 0.75));
    }

    #[test]
    fn test_initialize_sets_geometry_and_zeroes_positions() {
        let mut block = SharedStateBlock::create("init-test").unwrap();
        block.params().set_write_pos(1234);
        block.initialize(128 * 1024, 192_000, 10_000_000);

        let params = block.params();
        assert_eq!(params.buffer_size(), 128 * 1024);
        assert_eq!(params.byte_rate(), 192_000);
        assert_eq!(params.qpc_frequency(), 10_000_000);
        assert_eq!(params.write_pos(), 0);
        assert_eq!(params.read_pos(), 0);
        assert_eq!(params.master_gain(), 0.0);
    }

    #[test]
    fn test_map_before_initialize_fails() {
        let block = SharedStateBlock::create("premap-test").unwrap();
        assert!(matches!(
            block.map_for_external_access(),
            Err(VadevError::DeviceNotReady(_))
        ));
    }

    #[test]
    fn test_external_mapping_sees_engine_writes() {
        let mut block = SharedStateBlock::create("xmap-test").unwrap();
        block.initialize(4096, 192_000, 10_000_000);

        let handle = block.map_for_external_access().unwrap();
        block.params().set_write_pos(96_000);
        assert_eq!(handle.params().write_pos(), 96_000);
        assert_eq!(handle.params().byte_rate(), 192_000);

        // And the other direction
        handle.params().set_master_gain(0.8);
        assert_eq!(block.params().master_gain(), 0.8);

        // Consumer detaching requires nothing of the engine side
        drop(handle);
        block.params().set_write_pos(100);
        assert_eq!(block.params().write_pos(), 100);
    }

    #[test]
    fn test_snapshot_requires_full_buffer() {
        let mut block = SharedStateBlock::create("snap-test").unwrap();
        block.initialize(4096, 192_000, 10_000_000);

        let mut short = [0u8; 8];
        match block.snapshot_into(&mut short) {
            Err(VadevError::BufferTooSmall { required }) => {
                assert_eq!(required, SharedStateBlock::len())
            }
            other => panic!("expected BufferTooSmall, got {:?}", other.map(|_| ())),
        }

        let mut dst = vec![0u8; SharedStateBlock::len()];
        assert_eq!(block.snapshot_into(&mut dst).unwrap(), dst.len());
        let byte_rate = u32::from_ne_bytes(dst[40..44].try_into().unwrap());
        assert_eq!(byte_rate, 192_000);
    }

    #[test]
    fn test_backing_file_removed_on_drop() {
        let block = SharedStateBlock::create("drop-test").unwrap();
        let path = block.path().to_path_buf();
        assert!(path.exists());
        drop(block);
        assert!(!path.exists());
    }
}
