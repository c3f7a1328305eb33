//! swapon/swapoff coordinator.
//!
//! Adding or removing a device is rare and serialised end to end: only
//! one swapon or swapoff may be in flight at a time, enforced by
//! `SEQUENCER` below. Everything else in this crate (`getpages`,
//! `putpages`, `alloc`, `dealloc`) runs concurrently with whichever of
//! these is in progress; the device-closing flag and bitmap-parking in
//! [`SwapPager`] are what keep that safe.

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::BTreeSet;

use spin::Mutex;

use crate::block::BlockDevice;
use crate::device::NSWAPDEV;
use crate::errno::{ENOMEM, KResult};
use crate::object::{ObjectId, VmPageCache};
use crate::pager::SwapPager;
use crate::sysctl::NSWAP_LOWAT;
use crate::{kinfo, kwarn};

/// Caps a single device at `2^30 / META_RADIX / NSWAPDEV` pages, mirroring
/// the host bound on how large one swap partition may be relative to the
/// metadata hash table's addressable range.
const META_RADIX: u64 = 16;
pub const MAX_DEVICE_PAGES: u64 = (1u64 << 30) / META_RADIX / NSWAPDEV as u64;

/// Serialises swapon/swapoff so only one device add/remove runs at a
/// time. A plain `spin::Mutex<()>` is enough: the guard's lifetime *is*
/// the critical section.
static SEQUENCER: Mutex<()> = Mutex::new(());

/// Install a block device as a new swap device. Rejects devices too
/// large for the per-device page cap, page-aligns the usable size down,
/// and grows the bitmap to cover it.
pub fn swapon(pager: &SwapPager, block_device: Box<dyn BlockDevice>, nblks: u64) -> KResult<usize> {
    let _guard = SEQUENCER.lock();

    let nblks = nblks.min(MAX_DEVICE_PAGES);
    if nblks == 0 {
        return Err(ENOMEM);
    }

    let idx = pager.install_device(block_device, nblks)?;
    let added = pager.reserve_device_capacity(idx, nblks);
    kinfo!("swapon: device {} active, {} pages added", idx, added);
    Ok(idx)
}

/// Drain and remove an active device. Fails up front with `ENOMEM` if
/// there is not enough free+cache+swap space elsewhere to absorb the
/// pages this device is carrying, mirroring the host's pre-flight
/// admission check — draining a device the rest of the pool cannot
/// possibly absorb would just thrash forever.
pub fn swapoff(
    pager: &SwapPager,
    cache: &dyn VmPageCache,
    idx: usize,
    free_pages_elsewhere: u64,
) -> KResult<()> {
    let _guard = SEQUENCER.lock();

    let nblks = pager.device_nblks(idx);
    if free_pages_elsewhere < nblks + NSWAP_LOWAT {
        kwarn!("swapoff: device {} holds {} pages, insufficient headroom elsewhere", idx, nblks);
        return Err(ENOMEM);
    }

    pager.mark_device_closing(idx)?;
    pager.park_device_stripes(idx, nblks);

    drain_device(pager, cache, idx);

    pager.finish_device_removal(idx, nblks)?;
    kinfo!("swapoff: device {} removed", idx);
    Ok(())
}

/// Repeatedly full-scan the metadata for live slots on the closing
/// device and force them back into the VM page cache. Within one pass,
/// a match whose object currently has nonzero pip (paging-in-progress)
/// is skipped rather than waited on, so the pass keeps making progress
/// against every other match in the meantime. Only once an entire pass
/// finds nothing but pip-busy objects does the loop wait — on one such
/// object's pip reaching zero — before starting the next pass; this is
/// what keeps a busy object from livelocking the whole drain.
fn drain_device(pager: &SwapPager, cache: &dyn VmPageCache, idx: usize) {
    loop {
        let mut skip: BTreeSet<ObjectId> = BTreeSet::new();
        let mut progressed = false;

        loop {
            let Some((object_id, pindex)) = pager.next_drain_target_excluding(idx, &skip) else { break };
            let Some(object) = pager.lookup_object(object_id) else {
                // Object already torn down; its slots were released by
                // `dealloc`, so this entry must be stale. Skip past it
                // for the rest of this pass.
                skip.insert(object_id);
                continue;
            };

            if object.pip_count() > 0 {
                skip.insert(object_id);
                continue;
            }

            force_pagein(pager, cache, &object, pindex);
            pager.clear_drained_slot(&object, pindex);
            progressed = true;
        }

        if progressed {
            continue;
        }

        // Every match left on this device belongs to a pip-busy object
        // (or there is nothing left at all). Wait on one of them, then
        // rescan from scratch.
        let Some((object_id, _)) = pager.next_drain_target(idx) else { break };
        if let Some(object) = pager.lookup_object(object_id) {
            while object.pip_count() > 0 {
                core::hint::spin_loop();
            }
        }
    }
}

/// Bring page `pindex` of `object` fully into memory and off swap: if
/// it is already resident and valid, just mark it dirty so the pageout
/// daemon never needs to read the (about-to-vanish) swap slot again;
/// otherwise fault it in via `getpages` and install the freshly-read
/// page back into the cache.
fn force_pagein(pager: &SwapPager, cache: &dyn VmPageCache, object: &crate::object::ObjectRef, pindex: u64) {
    if cache.is_resident_valid(pindex) {
        cache.mark_dirty_resident(pindex);
        return;
    }

    let mut page = cache.fault_in(pindex);
    let mut pages = [page.clone()];
    object.pip_start();
    let _ = pager.getpages(object, &mut pages, 0);
    object.pip_end();
    page = pages[0].clone();
    page.flags.dirty = true;
    cache.install(page);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;
    use crate::device::PAGE_SIZE;
    use crate::object::MemPageCache;
    use crate::pager::PutRtval;

    fn sectors_for(pages: u64) -> u64 {
        pages * (PAGE_SIZE / crate::block::DEV_BSIZE) as u64
    }

    #[test]
    fn swapon_then_swapoff_drains_clean() {
        let pager = SwapPager::new(4, 4, 4);
        let dev = MemBlockDevice::new(sectors_for(64));
        let idx = swapon(&pager, Box::new(dev), 64).unwrap();

        let object = pager.alloc(None, 4);
        let mut pages: alloc::vec::Vec<_> = (0..4)
            .map(|i| {
                let mut p = crate::object::Page::new(i);
                p.flags.busy = true;
                p.data = [i as u8; PAGE_SIZE];
                p
            })
            .collect();
        let mut rtvals = alloc::vec![PutRtval::Fail; 4];
        pager.putpages(&object, &mut pages, true, &mut rtvals);
        assert!(rtvals.iter().all(|r| *r == PutRtval::Ok));

        let cache = MemPageCache::new();
        swapoff(&pager, &cache, idx, 1024).unwrap();

        assert_eq!(pager.device_used(idx), 0);
        for i in 0..4u64 {
            let snap = cache.snapshot(i).expect("drained page installed back into cache");
            assert!(snap.flags.dirty);
        }
    }

    #[test]
    fn swapoff_refuses_without_headroom() {
        let pager = SwapPager::new(4, 4, 4);
        let dev = MemBlockDevice::new(sectors_for(64));
        let idx = swapon(&pager, Box::new(dev), 64).unwrap();

        let object = pager.alloc(None, 4);
        let mut pages: alloc::vec::Vec<_> = (0..4)
            .map(|i| {
                let mut p = crate::object::Page::new(i);
                p.flags.busy = true;
                p
            })
            .collect();
        let mut rtvals = alloc::vec![PutRtval::Fail; 4];
        pager.putpages(&object, &mut pages, true, &mut rtvals);

        let cache = MemPageCache::new();
        let result = swapoff(&pager, &cache, idx, 0);
        assert!(result.is_err());
    }
}
