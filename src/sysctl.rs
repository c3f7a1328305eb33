//! Configuration constants and the read-only/read-write sysctl surface.
//!
//! A real kernel exposes these under the `vm.*` sysctl namespace; here
//! they are a thin struct the host can format however it likes (a procfs
//! shim, a debug command, a metrics exporter).

extern crate alloc;

use alloc::vec::Vec;

pub use crate::device::{DMMAX, NSWAPDEV};

/// Pages per async write cluster; also the meta-bucket size
/// (`SWAP_META_PAGES`). Must be a power of two.
pub const SWB_NPAGES: u64 = crate::device::SWB_NPAGES;

/// Upper bound on pages moved by a single `getpages`/`putpages` cluster.
pub const MAX_PAGEOUT_CLUSTER: u64 = 16;

/// Low-water mark, in pages: below this, swap is reported "almost full".
pub const NSWAP_LOWAT: u64 = 128;

/// High-water mark, in pages: hysteresis partner to `NSWAP_LOWAT`.
pub const NSWAP_HIWAT: u64 = 512;

/// Snapshot of one device table entry, as reported by `vm.swap_info.<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapInfoEntry {
    pub index: usize,
    pub in_use: bool,
    pub closing: bool,
    pub nblks: u64,
    pub used: u64,
}

/// Aggregate sysctl snapshot: per-device entries plus the tunable knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysctlSnapshot {
    pub swap_async_max: u32,
    pub dmmax: u64,
    pub nswapdev: usize,
    pub devices: Vec<SwapInfoEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_powers_of_two_where_required() {
        assert_eq!(SWB_NPAGES & (SWB_NPAGES - 1), 0);
        assert_eq!(DMMAX, SWB_NPAGES * 2);
    }
}
