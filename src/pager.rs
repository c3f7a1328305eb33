//! The pager core: ties the device table, bitmap allocator and metadata
//! store together behind the operations vtable the VM object layer
//! consumes.
//!
//! Per the design note on global state, there is no process-wide
//! singleton here: `SwapPager::new` builds one explicit value, and
//! callers (the swapon/swapoff coordinator, the system-call shims) hold
//! a `&SwapPager` for as long as they need it.

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use spin::Mutex;

use crate::bitmap::{BList, NONE};
use crate::block::BlockDevice;
use crate::device::{
    device_to_slot, same_stripe, slot_to_device, DeviceTable, DMMAX, DMMAX_MASK, NSWAPDEV,
    PAGE_SIZE, SECTORS_PER_PAGE,
};
use crate::errno::{ENOMEM, KResult};
use crate::io::{clamp_cluster_len, extend_read_cluster, Reservoir};
use crate::meta::{MetaStore, META_FREE, META_POP};
use crate::object::{ObjectId, ObjectRef, ObjectState, Page, PagerType};
use crate::sysctl::{MAX_PAGEOUT_CLUSTER, SwapInfoEntry, SysctlSnapshot};
use crate::{kerror, kwarn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetPagesResult {
    Ok,
    Fail,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutRtval {
    Ok,
    Pend,
    Fail,
}

/// The capability set a pager variant exposes to the VM object layer.
/// The core implements this for the SWAP variant; the other three
/// variants are realised as trivial stubs so `PagerRegistry` has
/// something real to dispatch to for every `PagerType`.
pub trait PagerOps: Send + Sync {
    fn pager_type(&self) -> PagerType;
    fn dealloc(&self, object: &ObjectRef);
    fn getpages(&self, object: &ObjectRef, pages: &mut [Page], reqpage: usize) -> GetPagesResult;
    fn putpages(&self, object: &ObjectRef, pages: &mut [Page], sync: bool, rtvals: &mut [PutRtval]);
    fn haspage(&self, object: &ObjectRef, pindex: u64) -> (bool, u32, u32);
    fn unswapped(&self, object: &ObjectRef, pindex: u64);
}

struct PagerCore {
    devices: DeviceTable,
    bitmap: Option<BList>,
    meta: MetaStore,
}

struct ObjectRegistry {
    named: BTreeMap<u64, ObjectId>,
    unnamed: Vec<ObjectId>,
    by_id: BTreeMap<ObjectId, ObjectRef>,
}

impl ObjectRegistry {
    fn new() -> Self {
        Self { named: BTreeMap::new(), unnamed: Vec::new(), by_id: BTreeMap::new() }
    }
}

/// The SWAP pager variant: device table, bitmap, metadata store, and the
/// three I/O reservoirs, under the two-mutex discipline from the
/// concurrency model (metadata+bitmap+device-counters vs. the
/// allocation/object-list lock).
pub struct SwapPager {
    core: Mutex<PagerCore>,
    objects: Mutex<ObjectRegistry>,
    reservoir_read: Reservoir,
    reservoir_write_sync: Reservoir,
    reservoir_write_async: Reservoir,
    async_max: AtomicU32,
    next_object_id: AtomicU64,
    swap_full: AtomicU8,
}

impl SwapPager {
    pub fn new(reservoir_read: u32, reservoir_write_sync: u32, reservoir_write_async: u32) -> Self {
        Self {
            core: Mutex::new(PagerCore {
                devices: DeviceTable::new(),
                bitmap: None,
                meta: MetaStore::new(4096),
            }),
            objects: Mutex::new(ObjectRegistry::new()),
            reservoir_read: Reservoir::new(reservoir_read),
            reservoir_write_sync: Reservoir::new(reservoir_write_sync),
            reservoir_write_async: Reservoir::new(reservoir_write_async),
            async_max: AtomicU32::new(1),
            next_object_id: AtomicU64::new(1),
            swap_full: AtomicU8::new(0),
        }
    }

    fn alloc_object_id(&self) -> ObjectId {
        self.next_object_id.fetch_add(1, Ordering::Relaxed)
    }

    // ---- object lifecycle (§4.3) ----

    /// Look up an existing named object by handle, or create a new
    /// default object and convert it to SWAP via a NONE-slot
    /// `meta_build`. Serialised under the allocation lock so two
    /// concurrent callers never create duplicate named objects.
    pub fn alloc(&self, handle: Option<u64>, size_pages: u64) -> ObjectRef {
        let mut registry = self.objects.lock();
        if let Some(h) = handle {
            if let Some(id) = registry.named.get(&h) {
                if let Some(existing) = registry.by_id.get(id) {
                    return existing.clone();
                }
            }
        }

        let id = self.alloc_object_id();
        let object = ObjectState::new(id, handle, size_pages);
        {
            let mut core = self.core.lock();
            core.meta.meta_build(&object, 0, NONE);
        }
        registry.by_id.insert(id, object.clone());
        match handle {
            Some(h) => {
                registry.named.insert(h, id);
            }
            None => registry.unnamed.push(id),
        }
        object
    }

    pub fn lookup_object(&self, id: ObjectId) -> Option<ObjectRef> {
        self.objects.lock().by_id.get(&id).cloned()
    }

    /// Remove from the object list immediately, wait for in-progress
    /// paging to drain, then free every metadata assignment.
    pub fn dealloc(&self, object: &ObjectRef) {
        {
            let mut registry = self.objects.lock();
            registry.by_id.remove(&object.id());
            registry.unnamed.retain(|&id| id != object.id());
            if let Some(h) = object.handle() {
                registry.named.remove(&h);
            }
        }
        while object.pip_count() > 0 {
            core::hint::spin_loop();
        }
        let mut core = self.core.lock();
        let freed = core.meta.meta_free_all(object);
        self.release_slots(&mut core, &freed);
    }

    /// For each destination page, the destination wins if it already has
    /// a slot; otherwise the source's slot is popped over. When
    /// `destroy_src`, `src` is removed from the object list up front and
    /// fully freed at the end.
    pub fn copy(&self, src: &ObjectRef, dst: &ObjectRef, offset: u64, destroy_src: bool) {
        if destroy_src {
            let mut registry = self.objects.lock();
            registry.by_id.remove(&src.id());
            registry.unnamed.retain(|&id| id != src.id());
            if let Some(h) = src.handle() {
                registry.named.remove(&h);
            }
        }

        let dst_size = dst.size_pages();
        for i in 0..dst_size {
            let mut core = self.core.lock();
            let dst_slot = core.meta.meta_ctl(dst, i, 0);
            if dst_slot != NONE {
                let freed = core.meta.meta_ctl(src, i + offset, META_FREE);
                if freed != NONE {
                    self.release_slots(&mut core, &[freed]);
                }
            } else {
                let popped = core.meta.meta_ctl(src, i + offset, META_POP);
                if popped != NONE {
                    core.meta.meta_build(dst, i, popped);
                }
            }
        }

        if destroy_src {
            let mut core = self.core.lock();
            let freed = core.meta.meta_free_all(src);
            self.release_slots(&mut core, &freed);
            src.set_pager_type(PagerType::Default);
        }
    }

    fn has_page_impl(&self, object: &ObjectRef, pindex: u64) -> (bool, u32, u32) {
        let half = crate::meta::SWAP_META_PAGES / 2;
        let mut core = self.core.lock();
        let slot = core.meta.meta_ctl(object, pindex, 0);
        if slot == NONE {
            return (false, 0, 0);
        }
        let mut before = 0u32;
        for k in 1..=half {
            if pindex < k {
                break;
            }
            let cand = core.meta.meta_ctl(object, pindex - k, 0);
            if cand == NONE || cand + k != slot || !same_stripe(slot, cand) {
                break;
            }
            before += 1;
        }
        let mut after = 0u32;
        for k in 1..=half {
            let cand = core.meta.meta_ctl(object, pindex + k, 0);
            if cand == NONE || cand != slot + k || !same_stripe(slot, cand) {
                break;
            }
            after += 1;
        }
        (true, before, after)
    }

    fn unswapped_impl(&self, object: &ObjectRef, pindex: u64) {
        let mut core = self.core.lock();
        let slot = core.meta.meta_ctl(object, pindex, META_FREE);
        if slot != NONE {
            self.release_slots(&mut core, &[slot]);
        }
    }

    /// Free slots back to the bitmap and decrement each owning device's
    /// `used` counter — unless that device is currently closing, in
    /// which case the bit must stay parked (`freeswapspace` refuses to
    /// return bits to a draining device's pool).
    fn release_slots(&self, core: &mut PagerCore, slots: &[u64]) {
        for &s in slots {
            let (dev_idx, _) = slot_to_device(s, NSWAPDEV);
            let closing = core.devices.get(dev_idx).map(|d| d.is_closing()).unwrap_or(false);
            if let Some(dev) = core.devices.get_mut(dev_idx) {
                dev.used = dev.used.saturating_sub(1);
            }
            if !closing {
                if let Some(bitmap) = core.bitmap.as_mut() {
                    bitmap.free(s, 1);
                }
            }
        }
    }

    fn note_alloc_failure(&self) {
        loop {
            let cur = self.swap_full.load(Ordering::Relaxed);
            let next = if cur == 0 { 1 } else { 2 };
            if self
                .swap_full
                .compare_exchange(cur, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                if next == 2 {
                    kerror!("swap space exhausted twice in a row");
                } else {
                    kwarn!("swap space running low");
                }
                break;
            }
        }
    }

    fn note_alloc_success(&self) {
        self.swap_full.store(0, Ordering::Relaxed);
    }

    pub fn swap_full_level(&self) -> u8 {
        self.swap_full.load(Ordering::Relaxed)
    }

    // ---- read path (§4.4) ----

    pub fn getpages(&self, object: &ObjectRef, pages: &mut [Page], reqpage: usize) -> GetPagesResult {
        let req_pindex = pages[reqpage].pindex;
        let blk = {
            let mut core = self.core.lock();
            core.meta.meta_ctl(object, req_pindex, 0)
        };
        if blk == NONE {
            for (k, p) in pages.iter_mut().enumerate() {
                if k != reqpage {
                    p.flags.busy = false;
                }
            }
            return GetPagesResult::Fail;
        }

        let (i, j) = {
            let mut core = self.core.lock();
            extend_read_cluster(&mut core.meta, object, pages, reqpage, blk)
        };
        for (k, p) in pages.iter_mut().enumerate() {
            if k < i || k >= j {
                p.flags.busy = false;
            }
        }

        let first_slot = blk - (reqpage - i) as u64;
        let page_count = (j - i) as u64;

        self.reservoir_read.acquire();
        for page in &mut pages[i..j] {
            page.flags.swap_in_progress = true;
        }

        let (dev_idx, dev_block) = slot_to_device(first_slot, NSWAPDEV);
        let handle = {
            let core = self.core.lock();
            core.devices.handle_for(dev_idx)
        };

        let io_result = match handle {
            Ok(handle) => {
                let mut buf = vec![0u8; page_count as usize * PAGE_SIZE];
                handle.read_at(dev_block * SECTORS_PER_PAGE, &mut buf).map(|_| buf)
            }
            Err(e) => Err(e),
        };

        let result = match io_result {
            Ok(buf) => {
                for (offset, k) in (i..j).enumerate() {
                    let page = &mut pages[k];
                    page.data.copy_from_slice(&buf[offset * PAGE_SIZE..(offset + 1) * PAGE_SIZE]);
                    page.flags.swap_in_progress = false;
                    page.flags.dirty = false;
                    page.flags.valid = true;
                    if k != reqpage {
                        page.flags.busy = false;
                    }
                }
                GetPagesResult::Ok
            }
            Err(_) => {
                for page in &mut pages[i..j] {
                    page.flags.swap_in_progress = false;
                    page.flags.valid = false;
                }
                for k in i..j {
                    if k != reqpage {
                        pages[k].flags.busy = false;
                    }
                }
                GetPagesResult::Error
            }
        };
        self.reservoir_read.release();
        result
    }

    // ---- write path (§4.5) ----

    pub fn putpages(&self, object: &ObjectRef, pages: &mut [Page], sync: bool, rtvals: &mut [PutRtval]) {
        debug_assert_eq!(pages.len(), rtvals.len());
        if object.pager_type() != PagerType::Swap {
            let mut core = self.core.lock();
            let pindex0 = pages.first().map(|p| p.pindex).unwrap_or(0);
            core.meta.meta_build(object, pindex0, NONE);
        }
        self.reconcile_async_max();

        let mut i = 0usize;
        while i < pages.len() {
            let remaining = (pages.len() - i) as u64;
            let n = clamp_cluster_len(remaining, crate::bitmap::BLIST_MAX_ALLOC, MAX_PAGEOUT_CLUSTER) as usize;
            let advanced = self.write_cluster(object, pages, rtvals, i, n, sync);
            i += advanced;
        }
    }

    fn reconcile_async_max(&self) {
        let bound = (self.reservoir_write_async.capacity() / 2).max(1);
        let cur = self.async_max.load(Ordering::Relaxed);
        if cur == 0 || cur > bound {
            self.async_max.store(bound, Ordering::Relaxed);
        }
    }

    fn write_cluster(
        &self,
        object: &ObjectRef,
        pages: &mut [Page],
        rtvals: &mut [PutRtval],
        start: usize,
        n: usize,
        sync: bool,
    ) -> usize {
        if n == 0 {
            return 0;
        }

        let alloc_result = {
            let mut core = self.core.lock();
            core.bitmap.as_mut().and_then(|bitmap| alloc_with_backoff(bitmap, n as u64))
        };
        let Some((first_slot, mut n_actual)) = alloc_result else {
            for rv in &mut rtvals[start..start + n] {
                *rv = PutRtval::Fail;
            }
            self.note_alloc_failure();
            return n;
        };
        self.note_alloc_success();

        // Trim the tail if the run crossed a stripe boundary.
        let last_slot = first_slot + n_actual - 1;
        if !same_stripe(first_slot, last_slot) {
            let stripe_start = first_slot & DMMAX_MASK;
            let fit = stripe_start + DMMAX - first_slot;
            let tail = n_actual - fit;
            let mut core = self.core.lock();
            if let Some(bitmap) = core.bitmap.as_mut() {
                bitmap.free(first_slot + fit, tail);
            }
            n_actual = fit;
        }

        let (dev_idx, dev_block) = slot_to_device(first_slot, NSWAPDEV);
        let handle = {
            let mut core = self.core.lock();
            for j in 0..n_actual {
                let k = start + j as usize;
                let pindex = pages[k].pindex;
                core.meta.meta_build(object, pindex, first_slot + j);
            }
            if let Some(dev) = core.devices.get_mut(dev_idx) {
                dev.used += n_actual;
            }
            core.devices.handle_for(dev_idx)
        };

        let reservoir = if sync { &self.reservoir_write_sync } else { &self.reservoir_write_async };
        reservoir.acquire();

        let mut buf = vec![0u8; n_actual as usize * PAGE_SIZE];
        for j in 0..n_actual {
            let k = start + j as usize;
            pages[k].flags.dirty = true;
            pages[k].flags.swap_in_progress = true;
            buf[j as usize * PAGE_SIZE..(j as usize + 1) * PAGE_SIZE].copy_from_slice(&pages[k].data);
            rtvals[k] = if sync { PutRtval::Pend } else { PutRtval::Ok };
        }

        let io_result = match handle {
            Ok(handle) => handle.write_at(dev_block * SECTORS_PER_PAGE, &buf),
            Err(e) => Err(e),
        };

        match io_result {
            Ok(()) => {
                for j in 0..n_actual {
                    let k = start + j as usize;
                    pages[k].flags.swap_in_progress = false;
                    pages[k].flags.dirty = false;
                    rtvals[k] = PutRtval::Ok;
                }
            }
            Err(_) => {
                // Write error: quarantine the slot (never freed), redirty
                // and reactivate the page, never surfaced as a per-page
                // failure to the caller.
                kerror!("swap write error on slot {}, quarantining", first_slot);
                for j in 0..n_actual {
                    let k = start + j as usize;
                    pages[k].flags.swap_in_progress = false;
                    pages[k].flags.dirty = true;
                    rtvals[k] = PutRtval::Ok;
                }
            }
        }
        reservoir.release();

        n_actual as usize
    }

    // ---- strategy / BIO_DELETE (§4.7) ----

    pub fn strategy_delete(&self, object: &ObjectRef, pindex: u64, count: u64) -> Vec<u64> {
        let mut core = self.core.lock();
        let freed = core.meta.meta_free(object, pindex, count);
        self.release_slots(&mut core, &freed);
        freed
    }

    // ---- swapon/swapoff primitives, consumed by `swapon` module ----

    pub fn install_device(&self, block_device: Box<dyn BlockDevice>, nblks: u64) -> KResult<usize> {
        let mut core = self.core.lock();
        core.devices.install(block_device, nblks)
    }

    /// Grow (or create) the bitmap to cover the new device, then free
    /// exactly that device's own stripe ranges into it. Returns the
    /// number of pages freed (the amount `vm_swap_size` grows by).
    pub fn reserve_device_capacity(&self, idx: usize, nblks: u64) -> u64 {
        let mut core = self.core.lock();
        let new_rows = core.devices.max_active_rows();
        let new_capacity = NSWAPDEV as u64 * new_rows;

        match core.bitmap.as_mut() {
            None => {
                let mut bitmap = BList::create(new_capacity);
                bitmap.fill(0, new_capacity);
                core.bitmap = Some(bitmap);
            }
            Some(bitmap) => {
                let old_capacity = bitmap.capacity();
                if new_capacity > old_capacity {
                    bitmap.resize(new_capacity);
                    bitmap.fill(old_capacity, new_capacity - old_capacity);
                }
            }
        }

        let mut freed_total = 0u64;
        if let Some(bitmap) = core.bitmap.as_mut() {
            let mut base = 0u64;
            while base < nblks {
                let len = DMMAX.min(nblks - base);
                let slot = device_to_slot(idx, base, NSWAPDEV);
                bitmap.free(slot, len);
                freed_total += len;
                base += DMMAX;
            }
        }
        freed_total
    }

    pub fn mark_device_closing(&self, idx: usize) -> KResult<()> {
        self.core.lock().devices.mark_closing(idx)
    }

    /// Claim every currently-free bit on the closing device's stripes so
    /// nothing new can be allocated there while draining.
    pub fn park_device_stripes(&self, idx: usize, nblks: u64) {
        let mut core = self.core.lock();
        if let Some(bitmap) = core.bitmap.as_mut() {
            let mut base = 0u64;
            while base < nblks {
                let len = DMMAX.min(nblks - base);
                let slot = device_to_slot(idx, base, NSWAPDEV);
                bitmap.fill(slot, len);
                base += DMMAX;
            }
        }
    }

    pub fn device_used(&self, idx: usize) -> u64 {
        self.core.lock().devices.get(idx).map(|d| d.used).unwrap_or(0)
    }

    pub fn device_nblks(&self, idx: usize) -> u64 {
        self.core.lock().devices.get(idx).map(|d| d.nblks).unwrap_or(0)
    }

    pub fn next_drain_target(&self, idx: usize) -> Option<(ObjectId, u64)> {
        self.core.lock().meta.find_any_slot_on_device(NSWAPDEV, idx)
    }

    /// Same as [`next_drain_target`], skipping objects already found
    /// pip-busy during the current full pass.
    pub fn next_drain_target_excluding(&self, idx: usize, exclude: &BTreeSet<ObjectId>) -> Option<(ObjectId, u64)> {
        self.core.lock().meta.find_any_slot_on_device_excluding(NSWAPDEV, idx, exclude)
    }

    /// Clear a drained slot's metadata entry without returning its bit
    /// to the bitmap — the device is closing, so the bit stays parked
    /// until [`finish_device_removal`] discards the whole range.
    pub fn clear_drained_slot(&self, object: &ObjectRef, pindex: u64) {
        let mut core = self.core.lock();
        let slot = core.meta.meta_ctl(object, pindex, META_POP);
        if slot != NONE {
            let (dev_idx, _) = slot_to_device(slot, NSWAPDEV);
            if let Some(dev) = core.devices.get_mut(dev_idx) {
                dev.used = dev.used.saturating_sub(1);
            }
        }
    }

    /// Post-condition check, device close, bitmap shrink. Fatal if
    /// `used != 0` — the drain loop is supposed to guarantee that.
    pub fn finish_device_removal(&self, idx: usize, nblks: u64) -> KResult<()> {
        let mut core = self.core.lock();
        let used = core.devices.get(idx).map(|d| d.used).unwrap_or(0);
        if used != 0 {
            kerror!("swapoff: device {} drained with used={}, expected 0", idx, used);
            return Err(ENOMEM);
        }

        if let Some(bitmap) = core.bitmap.as_mut() {
            let mut base = 0u64;
            while base < nblks {
                let len = DMMAX.min(nblks - base);
                let slot = device_to_slot(idx, base, NSWAPDEV);
                bitmap.free(slot, len);
                base += DMMAX;
            }
        }

        core.devices.remove(idx);

        let new_rows = core.devices.max_active_rows();
        let new_capacity = NSWAPDEV as u64 * new_rows;
        if let Some(bitmap) = core.bitmap.take() {
            if new_capacity == 0 {
                bitmap.destroy();
            } else if new_capacity < bitmap.capacity() && bitmap.can_shrink_to(new_capacity) {
                let mut bitmap = bitmap;
                bitmap.resize(new_capacity);
                core.bitmap = Some(bitmap);
            } else {
                core.bitmap = Some(bitmap);
            }
        }
        Ok(())
    }

    pub fn sysctl_snapshot(&self) -> SysctlSnapshot {
        let core = self.core.lock();
        let devices = (0..NSWAPDEV)
            .map(|idx| {
                let active = core.devices.get(idx);
                SwapInfoEntry {
                    index: idx,
                    in_use: active.is_some(),
                    closing: active.map(|d| d.is_closing()).unwrap_or(false),
                    nblks: active.map(|d| d.nblks).unwrap_or(0),
                    used: active.map(|d| d.used).unwrap_or(0),
                }
            })
            .collect();
        SysctlSnapshot {
            swap_async_max: self.async_max.load(Ordering::Relaxed),
            dmmax: DMMAX,
            nswapdev: NSWAPDEV,
            devices,
        }
    }
}

impl PagerOps for SwapPager {
    fn pager_type(&self) -> PagerType {
        PagerType::Swap
    }

    fn dealloc(&self, object: &ObjectRef) {
        SwapPager::dealloc(self, object)
    }

    fn getpages(&self, object: &ObjectRef, pages: &mut [Page], reqpage: usize) -> GetPagesResult {
        SwapPager::getpages(self, object, pages, reqpage)
    }

    fn putpages(&self, object: &ObjectRef, pages: &mut [Page], sync: bool, rtvals: &mut [PutRtval]) {
        SwapPager::putpages(self, object, pages, sync, rtvals)
    }

    fn haspage(&self, object: &ObjectRef, pindex: u64) -> (bool, u32, u32) {
        self.has_page_impl(object, pindex)
    }

    fn unswapped(&self, object: &ObjectRef, pindex: u64) {
        self.unswapped_impl(object, pindex)
    }
}

fn alloc_with_backoff(bitmap: &mut BList, n: u64) -> Option<(u64, u64)> {
    let mut try_n = n;
    loop {
        let slot = bitmap.alloc(try_n);
        if slot != NONE {
            return Some((slot, try_n));
        }
        if try_n <= 4 {
            return None;
        }
        try_n = (try_n / 2).max(4);
    }
}

/// Trivial stub pager variants, so the table-driven registry below has a
/// real implementor for every `PagerType`. None of these are reachable
/// from the swap-pager scenarios this crate models; they exist to make
/// the vtable polymorphism honest rather than a single-case enum in
/// disguise.
macro_rules! stub_pager_ops {
    ($name:ident, $ty:expr) => {
        pub struct $name;
        impl PagerOps for $name {
            fn pager_type(&self) -> PagerType {
                $ty
            }
            fn dealloc(&self, _object: &ObjectRef) {}
            fn getpages(&self, _object: &ObjectRef, _pages: &mut [Page], _reqpage: usize) -> GetPagesResult {
                GetPagesResult::Fail
            }
            fn putpages(&self, _object: &ObjectRef, _pages: &mut [Page], _sync: bool, rtvals: &mut [PutRtval]) {
                for rv in rtvals {
                    *rv = PutRtval::Fail;
                }
            }
            fn haspage(&self, _object: &ObjectRef, _pindex: u64) -> (bool, u32, u32) {
                (false, 0, 0)
            }
            fn unswapped(&self, _object: &ObjectRef, _pindex: u64) {}
        }
    };
}

stub_pager_ops!(DefaultPagerOps, PagerType::Default);
stub_pager_ops!(DevicePagerOps, PagerType::Device);
stub_pager_ops!(VnodePagerOps, PagerType::Vnode);

/// Table-driven dispatch from an object's pager type to the operations
/// implementation backing it.
pub struct PagerRegistry<'a> {
    pub swap: &'a SwapPager,
    pub default_ops: DefaultPagerOps,
    pub device_ops: DevicePagerOps,
    pub vnode_ops: VnodePagerOps,
}

impl<'a> PagerRegistry<'a> {
    pub fn new(swap: &'a SwapPager) -> Self {
        Self { swap, default_ops: DefaultPagerOps, device_ops: DevicePagerOps, vnode_ops: VnodePagerOps }
    }

    pub fn dispatch(&self, ty: PagerType) -> &dyn PagerOps {
        match ty {
            PagerType::Swap => self.swap,
            PagerType::Default => &self.default_ops,
            PagerType::Device => &self.device_ops,
            PagerType::Vnode => &self.vnode_ops,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;

    fn make_pager_with_device(pages: u64) -> (SwapPager, usize) {
        let pager = SwapPager::new(4, 4, 4);
        let dev = MemBlockDevice::new(pages * (PAGE_SIZE / crate::block::DEV_BSIZE) as u64);
        let idx = pager.install_device(Box::new(dev), pages).unwrap();
        pager.reserve_device_capacity(idx, pages);
        (pager, idx)
    }

    fn mkpage(pindex: u64, byte: u8) -> Page {
        let mut p = Page::new(pindex);
        p.data = [byte; PAGE_SIZE];
        p.flags.busy = true;
        p
    }

    #[test]
    fn round_trip_write_then_read() {
        let (pager, _idx) = make_pager_with_device(64);
        let object = pager.alloc(None, 4);

        let mut pages: Vec<Page> = (0..4).map(|i| mkpage(i, 0xA0 + i as u8)).collect();
        let mut rtvals = vec![PutRtval::Fail; 4];
        pager.putpages(&object, &mut pages, true, &mut rtvals);
        assert!(rtvals.iter().all(|r| *r == PutRtval::Ok));

        let mut read_pages: Vec<Page> = (0..4)
            .map(|i| {
                let mut p = Page::new(i);
                p.flags.busy = true;
                p
            })
            .collect();
        let result = pager.getpages(&object, &mut read_pages, 0);
        assert_eq!(result, GetPagesResult::Ok);
        for (i, p) in read_pages.iter().enumerate() {
            assert!(p.flags.valid);
            assert_eq!(p.data[0], 0xA0 + i as u8);
        }
    }

    #[test]
    fn copy_with_overlap_prefers_destination() {
        let (pager, _idx) = make_pager_with_device(64);
        let src = pager.alloc(None, 4);
        let dst = pager.alloc(None, 4);

        let mut src_pages: Vec<Page> = (0..4).map(|i| mkpage(i, 0x10 + i as u8)).collect();
        let mut src_rtvals = vec![PutRtval::Fail; 4];
        pager.putpages(&src, &mut src_pages, true, &mut src_rtvals);

        let mut dst_pages = vec![mkpage(1, 0xFF)];
        let mut dst_rtvals = vec![PutRtval::Fail; 1];
        pager.putpages(&dst, &mut dst_pages, true, &mut dst_rtvals);

        let dst_old_slot1 = pager.has_page_impl(&dst, 1).0;
        assert!(dst_old_slot1);

        pager.copy(&src, &dst, 0, true);

        assert_eq!(pager.has_page_impl(&dst, 0).0, true);
        assert_eq!(pager.has_page_impl(&dst, 1).0, true);
        assert_eq!(pager.has_page_impl(&dst, 2).0, true);
        assert_eq!(pager.has_page_impl(&dst, 3).0, true);
        assert_eq!(src.pager_type(), PagerType::Default);
        assert_eq!(src.bcount(), 0);
    }

    #[test]
    fn write_error_quarantines_the_slot() {
        let pager = SwapPager::new(4, 4, 4);
        let dev = MemBlockDevice::new(64 * (PAGE_SIZE / crate::block::DEV_BSIZE) as u64);
        dev.inject_failure_at(0);
        let idx = pager.install_device(Box::new(dev), 64).unwrap();
        pager.reserve_device_capacity(idx, 64);
        let object = pager.alloc(None, 1);

        let mut pages = vec![mkpage(0, 0x42)];
        let mut rtvals = vec![PutRtval::Fail; 1];
        pager.putpages(&object, &mut pages, true, &mut rtvals);

        assert!(pages[0].flags.dirty);
        let (has, _, _) = pager.has_page_impl(&object, 0);
        assert!(has, "quarantined slot is still recorded in metadata");
    }

    #[test]
    fn allocation_backoff_succeeds_at_four() {
        let (pager, _idx) = make_pager_with_device(32);
        let object = pager.alloc(None, 32);

        // Fragment the bitmap down to 4-slot runs directly.
        {
            let mut core = pager.core.lock();
            let bitmap = core.bitmap.as_mut().unwrap();
            let mut held = Vec::new();
            for _ in 0..4 {
                held.push(bitmap.alloc(4));
                held.push(bitmap.alloc(4));
            }
            for (i, slot) in held.iter().enumerate() {
                if i % 2 == 0 {
                    bitmap.free(*slot, 4);
                }
            }
        }

        let mut pages: Vec<Page> = (0..16).map(|i| mkpage(i, 1)).collect();
        let mut rtvals = vec![PutRtval::Fail; 16];
        pager.putpages(&object, &mut pages, true, &mut rtvals);
        assert!(rtvals.iter().all(|r| *r == PutRtval::Ok));
    }

    #[test]
    fn write_cluster_trims_at_stripe_boundary() {
        // A device wider than one DMMAX stripe (32 pages), so a single
        // contiguous free run can straddle the boundary at slot 32.
        let (pager, _idx) = make_pager_with_device(64);
        let object = pager.alloc(None, 20);

        // Punch a single free run spanning slots 20..40, straddling the
        // stripe boundary, irrespective of how device installation
        // originally partitioned the bitmap.
        {
            let mut core = pager.core.lock();
            let bitmap = core.bitmap.as_mut().unwrap();
            bitmap.fill(0, 64);
            bitmap.free(20, 20);
        }

        let mut pages: Vec<Page> = (0..20).map(|i| mkpage(i, 0x55)).collect();
        let mut rtvals = vec![PutRtval::Fail; 20];
        let n_written = pager.write_cluster(&object, &mut pages, &mut rtvals, 0, 20, true);

        // Only the 12 pages up to the stripe boundary (20..32) could be
        // assigned contiguously; the rest must be trimmed and returned
        // to the bitmap rather than handed out straddling two devices.
        assert_eq!(n_written, 12);
        assert!(rtvals[..12].iter().all(|r| *r == PutRtval::Ok));
        assert!(rtvals[12..].iter().all(|r| *r == PutRtval::Fail));

        let mut core = pager.core.lock();
        let bitmap = core.bitmap.as_mut().unwrap();
        assert_eq!(bitmap.alloc(8), 32, "trimmed tail must be freed back to the bitmap");
    }
}
