//! Swap device table: the fixed-capacity array of devices that the
//! aggregate swap space is interleaved across, plus the slot <-> device
//! addressing math (`DMMAX` striping).

extern crate alloc;

use alloc::boxed::Box;

use crate::block::{DevBlock, DeviceHandle, DEV_BSIZE};
use crate::errno::{ENXIO, KResult};

/// Page size in bytes. Every swap slot is exactly one page.
pub const PAGE_SIZE: usize = 4096;

/// Sectors per page, used to convert page-unit block numbers to the
/// device's native sector addressing.
pub const SECTORS_PER_PAGE: u64 = (PAGE_SIZE / DEV_BSIZE) as u64;

/// Stripe width, in pages. `SWB_NPAGES` also sizes a metadata bucket
/// (`SWAP_META_PAGES`); `DMMAX` is always twice that.
pub const SWB_NPAGES: u64 = 16;
pub const DMMAX: u64 = SWB_NPAGES * 2;
pub const DMMAX_MASK: u64 = !(DMMAX - 1);

/// Maximum number of swap devices the table can hold.
pub const NSWAPDEV: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFlags {
    Idle,
    Active,
    Closing,
}

/// One entry of the swap device table.
pub struct SwapDevice {
    handle: Option<DeviceHandle>,
    /// Total capacity of this device, in pages.
    pub nblks: u64,
    /// Pages currently referenced by a `MetaBlock` entry on this device.
    pub used: u64,
    pub flags: DeviceFlags,
}

impl SwapDevice {
    const fn empty() -> Self {
        Self { handle: None, nblks: 0, used: 0, flags: DeviceFlags::Idle }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.flags, DeviceFlags::Active | DeviceFlags::Closing)
    }

    pub fn is_closing(&self) -> bool {
        self.flags == DeviceFlags::Closing
    }
}

/// Fixed-capacity array of device descriptors plus the derived `nswap`
/// (total pages across all active devices) that sizes the bitmap.
pub struct DeviceTable {
    devices: [SwapDevice; NSWAPDEV],
}

impl DeviceTable {
    pub const fn new() -> Self {
        Self {
            devices: [
                SwapDevice::empty(),
                SwapDevice::empty(),
                SwapDevice::empty(),
                SwapDevice::empty(),
            ],
        }
    }

    pub fn get(&self, idx: usize) -> Option<&SwapDevice> {
        self.devices.get(idx).filter(|d| d.is_active())
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut SwapDevice> {
        if self.devices.get(idx).map(|d| d.is_active()).unwrap_or(false) {
            self.devices.get_mut(idx)
        } else {
            None
        }
    }

    pub fn iter_active(&self) -> impl Iterator<Item = (usize, &SwapDevice)> {
        self.devices.iter().enumerate().filter(|(_, d)| d.is_active())
    }

    /// Install a new device in the first free slot. Returns the slot
    /// index and the number of pages added to `nswap`.
    pub fn install(&mut self, handle: Box<dyn crate::block::BlockDevice>, nblks: u64) -> KResult<usize> {
        let idx = self
            .devices
            .iter()
            .position(|d| d.flags == DeviceFlags::Idle)
            .ok_or(ENXIO)?;
        self.devices[idx] = SwapDevice {
            handle: Some(DeviceHandle::new(handle)),
            nblks,
            used: 0,
            flags: DeviceFlags::Active,
        };
        Ok(idx)
    }

    pub fn mark_closing(&mut self, idx: usize) -> KResult<()> {
        let dev = self.devices.get_mut(idx).filter(|d| d.flags == DeviceFlags::Active).ok_or(ENXIO)?;
        dev.flags = DeviceFlags::Closing;
        Ok(())
    }

    pub fn remove(&mut self, idx: usize) {
        self.devices[idx] = SwapDevice::empty();
    }

    /// Total pages across every active device, which is how `nswap` (the
    /// bitmap's capacity) is recomputed after an add/remove.
    pub fn total_pages(&self) -> u64 {
        self.iter_active().map(|(_, d)| d.nblks).sum()
    }

    /// The largest active device's capacity, rounded up to a `DMMAX`
    /// stripe boundary. Since every device index shares each stripe
    /// "row" of the interleave, the aggregate bitmap is sized as
    /// `NSWAPDEV * max_active_rows()` so growing or installing a bigger
    /// device only ever appends rows at the tail.
    pub fn max_active_rows(&self) -> u64 {
        self.iter_active().map(|(_, d)| round_up_dmmax(d.nblks)).max().unwrap_or(0)
    }

    pub fn read_page(&self, idx: usize, dev_block: DevBlock, buf: &mut [u8]) -> KResult<()> {
        let dev = self.devices[idx].handle.as_ref().ok_or(ENXIO)?;
        dev.read_at(dev_block * SECTORS_PER_PAGE, buf)
    }

    pub fn write_page(&self, idx: usize, dev_block: DevBlock, buf: &[u8]) -> KResult<()> {
        let dev = self.devices[idx].handle.as_ref().ok_or(ENXIO)?;
        dev.write_at(dev_block * SECTORS_PER_PAGE, buf)
    }

    /// Clone out the handle for `idx` so a caller can release the table
    /// lock before issuing the actual transfer.
    pub fn handle_for(&self, idx: usize) -> KResult<DeviceHandle> {
        self.devices.get(idx).and_then(|d| d.handle.clone()).ok_or(ENXIO)
    }
}

/// Split an aggregate swap slot into `(device_index, device-local block)`
/// given the number of currently active devices. Mirrors
/// `swapdev_strategy`'s conversion: `off = blk mod DMMAX`,
/// `seg = blk / DMMAX`, `dev = seg mod ndev`, `dev_block = (seg/ndev)*DMMAX + off`.
pub fn slot_to_device(slot: u64, ndev: usize) -> (usize, u64) {
    debug_assert!(ndev > 0);
    let ndev = ndev as u64;
    let off = slot % DMMAX;
    let seg = slot / DMMAX;
    let dev_index = seg % ndev;
    let dev_block = (seg / ndev) * DMMAX + off;
    (dev_index as usize, dev_block)
}

/// Inverse of [`slot_to_device`]: recompose an aggregate slot number from
/// a device index and a device-local block.
pub fn device_to_slot(dev_index: usize, dev_block: u64, ndev: usize) -> u64 {
    debug_assert!(ndev > 0);
    let ndev = ndev as u64;
    let off = dev_block % DMMAX;
    let local_seg = dev_block / DMMAX;
    let seg = local_seg * ndev + dev_index as u64;
    seg * DMMAX + off
}

/// True if `a` and `b` lie in the same `DMMAX`-aligned stripe.
pub fn same_stripe(a: u64, b: u64) -> bool {
    (a ^ b) & DMMAX_MASK == 0
}

/// Round `n` up to the next multiple of `DMMAX`.
pub fn round_up_dmmax(n: u64) -> u64 {
    (n + DMMAX - 1) / DMMAX * DMMAX
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_to_device_round_trips() {
        for ndev in 1..=4usize {
            for slot in 0..(DMMAX * ndev as u64 * 3) {
                let (dev, blk) = slot_to_device(slot, ndev);
                assert!(dev < ndev);
                let back = device_to_slot(dev, blk, ndev);
                assert_eq!(back, slot, "ndev={ndev} slot={slot}");
            }
        }
    }

    #[test]
    fn interleave_stripes_round_robin_across_devices() {
        // Consecutive stripes of DMMAX pages land on consecutive devices.
        let ndev = 3;
        let (dev0, _) = slot_to_device(0, ndev);
        let (dev1, _) = slot_to_device(DMMAX, ndev);
        let (dev2, _) = slot_to_device(DMMAX * 2, ndev);
        let (dev3, _) = slot_to_device(DMMAX * 3, ndev);
        assert_eq!([dev0, dev1, dev2], [0, 1, 2]);
        assert_eq!(dev3, 0);
    }

    #[test]
    fn same_stripe_detects_dmmax_aligned_boundary() {
        assert!(same_stripe(0, DMMAX - 1));
        assert!(!same_stripe(DMMAX - 1, DMMAX));
    }
}
