//! The virtual-memory object model.
//!
//! This is deliberately thin: the real VM object layer (pages, objects,
//! pip counts) is an external collaborator the pager core only consumes
//! through a narrow interface. [`VmObject`] is that interface; [`Page`]
//! is the per-page state the VM layer hands the pager during
//! `getpages`/`putpages`. A minimal concrete implementation is provided
//! so the pager core can be driven and tested end to end without a real
//! kernel underneath it.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use spin::Mutex;

pub type ObjectId = u64;

/// Which pager variant currently backs an object. The host kernel
/// realises this as a vtable-of-function-pointers dispatch with four
/// variants; we keep the same variant set but dispatch through a trait
/// registry (see `pager::PagerOps`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PagerType {
    Default = 0,
    Swap = 1,
    Device = 2,
    Vnode = 3,
}

impl PagerType {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => PagerType::Swap,
            2 => PagerType::Device,
            3 => PagerType::Vnode,
            _ => PagerType::Default,
        }
    }
}

/// Per-page flags the pager core manipulates during I/O. Ownership of the
/// page (busy-locking it against concurrent faults) belongs to the VM
/// layer; the pager only ever flips these bits while the page is busy.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageFlags {
    pub busy: bool,
    pub valid: bool,
    pub dirty: bool,
    pub swap_in_progress: bool,
}

/// A single page of an object's address space, as handed to the pager by
/// the VM layer for `getpages`/`putpages`.
#[derive(Debug, Clone)]
pub struct Page {
    pub pindex: u64,
    pub flags: PageFlags,
    pub data: [u8; crate::device::PAGE_SIZE],
}

impl Page {
    pub fn new(pindex: u64) -> Self {
        Self { pindex, flags: PageFlags::default(), data: [0; crate::device::PAGE_SIZE] }
    }
}

/// The object-lifecycle state the pager core needs: which pager variant
/// backs the object, how many `MetaBlock`s reference it, and the
/// paging-in-progress counter that gates `dealloc`/drain waits.
pub struct ObjectState {
    id: ObjectId,
    handle: Option<u64>,
    size_pages: AtomicU64,
    pager_type: AtomicU8,
    bcount: AtomicU32,
    pip: AtomicU32,
}

pub type ObjectRef = Arc<ObjectState>;

impl ObjectState {
    pub fn new(id: ObjectId, handle: Option<u64>, size_pages: u64) -> ObjectRef {
        Arc::new(Self {
            id,
            handle,
            size_pages: AtomicU64::new(size_pages),
            pager_type: AtomicU8::new(PagerType::Default as u8),
            bcount: AtomicU32::new(0),
            pip: AtomicU32::new(0),
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn handle(&self) -> Option<u64> {
        self.handle
    }

    pub fn size_pages(&self) -> u64 {
        self.size_pages.load(Ordering::Relaxed)
    }

    pub fn set_size_pages(&self, size: u64) {
        self.size_pages.store(size, Ordering::Relaxed);
    }

    pub fn pager_type(&self) -> PagerType {
        PagerType::from_u8(self.pager_type.load(Ordering::Acquire))
    }

    pub fn set_pager_type(&self, ty: PagerType) {
        self.pager_type.store(ty as u8, Ordering::Release);
    }

    pub fn bcount(&self) -> u32 {
        self.bcount.load(Ordering::Relaxed)
    }

    pub fn inc_bcount(&self) {
        self.bcount.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements and returns the new count. Never underflows below zero.
    pub fn dec_bcount(&self) -> u32 {
        let prev = self.bcount.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
            Some(v.saturating_sub(1))
        });
        prev.unwrap_or(0).saturating_sub(1)
    }

    pub fn pip_count(&self) -> u32 {
        self.pip.load(Ordering::Relaxed)
    }

    pub fn pip_start(&self) {
        self.pip.fetch_add(1, Ordering::AcqRel);
    }

    pub fn pip_end(&self) {
        self.pip.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The VM layer's page cache, as seen by the swapoff drain protocol:
/// "grab (or create) the VM page at `(object, pindex)`". The pager core
/// never depends on this directly; only the swapon/swapoff coordinator's
/// `force_pagein` step does.
pub trait VmPageCache: Send + Sync {
    fn is_resident_valid(&self, pindex: u64) -> bool;
    /// Fault a page in for I/O: returns a busied, not-yet-valid page.
    fn fault_in(&self, pindex: u64) -> Page;
    /// Install a page back into the cache after I/O, unbusied.
    fn install(&self, page: Page);
    /// Mark an already-resident page active and dirty, without I/O.
    fn mark_dirty_resident(&self, pindex: u64);
}

/// An in-memory stand-in for the VM layer's page cache, used by tests
/// and by the swapoff drain scenarios that need a concrete collaborator.
pub struct MemPageCache {
    pages: Mutex<BTreeMap<u64, Page>>,
}

impl MemPageCache {
    pub fn new() -> Self {
        Self { pages: Mutex::new(BTreeMap::new()) }
    }

    pub fn seed(&self, page: Page) {
        self.pages.lock().insert(page.pindex, page);
    }

    pub fn snapshot(&self, pindex: u64) -> Option<Page> {
        self.pages.lock().get(&pindex).cloned()
    }
}

impl Default for MemPageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl VmPageCache for MemPageCache {
    fn is_resident_valid(&self, pindex: u64) -> bool {
        self.pages.lock().get(&pindex).map(|p| p.flags.valid).unwrap_or(false)
    }

    fn fault_in(&self, pindex: u64) -> Page {
        let mut guard = self.pages.lock();
        let page = guard.entry(pindex).or_insert_with(|| Page::new(pindex));
        page.flags.busy = true;
        page.clone()
    }

    fn install(&self, mut page: Page) {
        page.flags.busy = false;
        self.pages.lock().insert(page.pindex, page);
    }

    fn mark_dirty_resident(&self, pindex: u64) {
        if let Some(page) = self.pages.lock().get_mut(&pindex) {
            page.flags.dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bcount_never_underflows() {
        let obj = ObjectState::new(1, None, 4);
        assert_eq!(obj.dec_bcount(), 0);
        obj.inc_bcount();
        obj.inc_bcount();
        assert_eq!(obj.dec_bcount(), 1);
        assert_eq!(obj.dec_bcount(), 0);
        assert_eq!(obj.dec_bcount(), 0);
    }

    #[test]
    fn pager_type_round_trips_through_u8_storage() {
        let obj = ObjectState::new(1, None, 4);
        assert_eq!(obj.pager_type(), PagerType::Default);
        obj.set_pager_type(PagerType::Swap);
        assert_eq!(obj.pager_type(), PagerType::Swap);
    }
}
