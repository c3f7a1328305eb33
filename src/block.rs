//! Block-device collaborator.
//!
//! The pager never talks to a disk directly. It hands vectored reads and
//! writes to whatever implements [`BlockDevice`] — a virtio-blk driver, an
//! AHCI port, or (in tests) an in-memory backing store. This mirrors the
//! kernel module boundary in the host system, where `kmod_blk_read_bytes`
//! / `kmod_blk_write_bytes` are the only points of contact between the
//! swap driver and the block layer.

extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::errno::{EIO, KResult};

/// Device-local block address, in `DEV_BSIZE` sector units.
pub type DevBlock = u64;

/// Sector size used for on-disk addressing, independent of `PAGE_SIZE`.
pub const DEV_BSIZE: usize = 512;

/// A backing store capable of vectored block I/O. Implementors only need
/// to move bytes; all swap-specific addressing (striping, slot encoding)
/// happens above this layer.
pub trait BlockDevice: Send + Sync {
    /// Total addressable size, in `DEV_BSIZE` sectors.
    fn sector_count(&self) -> u64;

    /// Read `buf.len()` bytes starting at sector `sector`.
    fn read_at(&self, sector: DevBlock, buf: &mut [u8]) -> KResult<()>;

    /// Write `buf.len()` bytes starting at sector `sector`.
    fn write_at(&self, sector: DevBlock, buf: &[u8]) -> KResult<()>;
}

/// A handle to an open block device plus the bookkeeping the pager's
/// strategy dispatcher needs to route I/O to it.
///
/// Holds the backing device behind an `Arc` rather than a `Box` so a
/// caller can clone the handle out from under the metadata mutex and
/// issue the actual transfer after releasing it — the mutex covers the
/// device table's structure and counters, never the I/O itself.
#[derive(Clone)]
pub struct DeviceHandle {
    inner: Arc<dyn BlockDevice>,
}

impl DeviceHandle {
    pub fn new(inner: Box<dyn BlockDevice>) -> Self {
        Self { inner: Arc::from(inner) }
    }

    pub fn sector_count(&self) -> u64 {
        self.inner.sector_count()
    }

    pub fn read_at(&self, sector: DevBlock, buf: &mut [u8]) -> KResult<()> {
        self.inner.read_at(sector, buf)
    }

    pub fn write_at(&self, sector: DevBlock, buf: &[u8]) -> KResult<()> {
        self.inner.write_at(sector, buf)
    }
}

/// An in-memory block device, standing in for a real disk/partition in
/// tests and for the `simulate_io_error` based error-injection scenarios.
pub struct MemBlockDevice {
    storage: spin::Mutex<Vec<u8>>,
    fail_sector: spin::Mutex<Option<DevBlock>>,
}

impl MemBlockDevice {
    pub fn new(sectors: u64) -> Self {
        Self {
            storage: spin::Mutex::new(vec![0u8; sectors as usize * DEV_BSIZE]),
            fail_sector: spin::Mutex::new(None),
        }
    }

    /// Make the next I/O touching `sector` fail with `EIO`, once.
    pub fn inject_failure_at(&self, sector: DevBlock) {
        *self.fail_sector.lock() = Some(sector);
    }

    fn maybe_fail(&self, sector: DevBlock, len: usize) -> KResult<()> {
        let mut guard = self.fail_sector.lock();
        if let Some(bad) = *guard {
            let span = (len / DEV_BSIZE).max(1) as u64;
            if sector <= bad && bad < sector + span {
                *guard = None;
                return Err(EIO);
            }
        }
        Ok(())
    }
}

impl BlockDevice for MemBlockDevice {
    fn sector_count(&self) -> u64 {
        (self.storage.lock().len() / DEV_BSIZE) as u64
    }

    fn read_at(&self, sector: DevBlock, buf: &mut [u8]) -> KResult<()> {
        self.maybe_fail(sector, buf.len())?;
        let storage = self.storage.lock();
        let off = sector as usize * DEV_BSIZE;
        if off + buf.len() > storage.len() {
            return Err(EIO);
        }
        buf.copy_from_slice(&storage[off..off + buf.len()]);
        Ok(())
    }

    fn write_at(&self, sector: DevBlock, buf: &[u8]) -> KResult<()> {
        self.maybe_fail(sector, buf.len())?;
        let mut storage = self.storage.lock();
        let off = sector as usize * DEV_BSIZE;
        if off + buf.len() > storage.len() {
            return Err(EIO);
        }
        storage[off..off + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_read_write() {
        let dev = MemBlockDevice::new(16);
        let data = [0xABu8; DEV_BSIZE];
        dev.write_at(2, &data).unwrap();
        let mut out = [0u8; DEV_BSIZE];
        dev.read_at(2, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn injected_failure_fires_once() {
        let dev = MemBlockDevice::new(16);
        dev.inject_failure_at(4);
        let data = [1u8; DEV_BSIZE];
        assert!(dev.write_at(4, &data).is_err());
        assert!(dev.write_at(4, &data).is_ok());
    }

    #[test]
    fn out_of_range_access_errors() {
        let dev = MemBlockDevice::new(1);
        let data = [0u8; DEV_BSIZE];
        assert!(dev.write_at(5, &data).is_err());
    }
}
