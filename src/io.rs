//! I/O engine: bounded buffer reservoirs, read/write clustering, and the
//! strategy dispatcher that converts a contiguous run of swap slots into
//! one device-level transfer.
//!
//! There is no real scheduler underneath this crate, so "suspension
//! points" in the host design (acquiring a reservoir slot, waiting on a
//! page's in-progress flag) are modelled as bounded spin-acquire
//! counters rather than true blocking. The accounting — capacity,
//! in-use count, release-on-completion — is exactly the same shape a
//! real reservoir would have; only the wake mechanism differs.

extern crate alloc;

use alloc::vec::Vec;

use spin::Mutex;

use crate::bitmap::NONE;
use crate::device::{device_to_slot, same_stripe, slot_to_device, DeviceTable, PAGE_SIZE};
use crate::errno::KResult;
use crate::meta::MetaStore;
use crate::object::{ObjectRef, Page};

/// A bounded pool of in-flight buffer slots. Three of these exist in the
/// pager core: read, sync-write, async-write.
pub struct Reservoir {
    capacity: u32,
    inuse: Mutex<u32>,
}

impl Reservoir {
    pub const fn new(capacity: u32) -> Self {
        Self { capacity, inuse: Mutex::new(0) }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn in_use(&self) -> u32 {
        *self.inuse.lock()
    }

    pub fn try_acquire(&self) -> bool {
        let mut guard = self.inuse.lock();
        if *guard < self.capacity {
            *guard += 1;
            true
        } else {
            false
        }
    }

    /// Spin until a slot is free. In a kernel build this parks the
    /// calling thread on the reservoir's wait queue instead.
    pub fn acquire(&self) {
        while !self.try_acquire() {
            core::hint::spin_loop();
        }
    }

    pub fn release(&self) {
        let mut guard = self.inuse.lock();
        *guard = guard.saturating_sub(1);
    }
}

/// Extend a read cluster leftwards and rightwards from `reqpage` while
/// neighbouring pages have slots exactly contiguous with `req_slot` and
/// within the same device stripe. Returns the half-open window `[i, j)`
/// of indices into `pages` to keep; everything outside it should be
/// released back to the VM layer untouched.
pub fn extend_read_cluster(
    meta: &mut MetaStore,
    object: &ObjectRef,
    pages: &[Page],
    reqpage: usize,
    req_slot: u64,
) -> (usize, usize) {
    let mut i = reqpage;
    while i > 0 {
        let cand_pindex = pages[i - 1].pindex;
        let cand_slot = meta.meta_ctl(object, cand_pindex, 0);
        let distance = (reqpage - (i - 1)) as u64;
        if cand_slot == NONE || cand_slot + distance != req_slot || !same_stripe(req_slot, cand_slot)
        {
            break;
        }
        i -= 1;
    }

    let mut j = reqpage + 1;
    while j < pages.len() {
        let cand_pindex = pages[j].pindex;
        let cand_slot = meta.meta_ctl(object, cand_pindex, 0);
        let distance = (j - reqpage) as u64;
        if cand_slot == NONE || cand_slot != req_slot + distance || !same_stripe(req_slot, cand_slot)
        {
            break;
        }
        j += 1;
    }

    (i, j)
}

/// Clamp a requested cluster length to the allocator quantum, the pages
/// actually remaining in the request, and the administrative cluster
/// cap (`MAX_PAGEOUT_CLUSTER`).
pub fn clamp_cluster_len(remaining: u64, max_alloc: u64, max_pageout_cluster: u64) -> u64 {
    remaining.min(max_alloc).min(max_pageout_cluster)
}

/// Read a contiguous run of `page_count` pages starting at swap slot
/// `first_slot` into `out`. The run is assumed (by the caller, via
/// `same_stripe` checks during clustering) to lie on a single device.
pub fn strategy_read(
    devices: &DeviceTable,
    ndev: usize,
    first_slot: u64,
    page_count: u64,
    out: &mut [u8],
) -> KResult<()> {
    debug_assert_eq!(out.len(), page_count as usize * PAGE_SIZE);
    let (dev_idx, dev_block) = slot_to_device(first_slot, ndev);
    devices.read_page(dev_idx, dev_block, out)
}

/// Write a contiguous run of `page_count` pages starting at swap slot
/// `first_slot` from `data`.
pub fn strategy_write(
    devices: &DeviceTable,
    ndev: usize,
    first_slot: u64,
    page_count: u64,
    data: &[u8],
) -> KResult<()> {
    debug_assert_eq!(data.len(), page_count as usize * PAGE_SIZE);
    let (dev_idx, dev_block) = slot_to_device(first_slot, ndev);
    devices.write_page(dev_idx, dev_block, data)
}

/// `BIO_DELETE`: a pure metadata free with no device I/O. Exposed here
/// because it shares the strategy dispatcher's entry point in the host
/// design, even though it never touches a device.
pub fn strategy_delete(meta: &mut MetaStore, object: &ObjectRef, pindex: u64, count: u64) -> Vec<u64> {
    meta.meta_free(object, pindex, count)
}

/// Recompose the absolute slot a device-local write landed at, used by
/// callers that only have `(dev_idx, dev_block)` on hand (e.g. when
/// reasoning about a specific device during drain).
pub fn slot_for(dev_idx: usize, dev_block: u64, ndev: usize) -> u64 {
    device_to_slot(dev_idx, dev_block, ndev)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservoir_respects_capacity() {
        let r = Reservoir::new(2);
        assert!(r.try_acquire());
        assert!(r.try_acquire());
        assert!(!r.try_acquire());
        r.release();
        assert!(r.try_acquire());
    }

    #[test]
    fn clamp_cluster_len_takes_the_tightest_bound() {
        assert_eq!(clamp_cluster_len(100, 256, 16), 16);
        assert_eq!(clamp_cluster_len(3, 256, 16), 3);
        assert_eq!(clamp_cluster_len(100, 8, 16), 8);
    }
}
