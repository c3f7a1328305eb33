//! A standalone, `no_std` swap-pager core: block allocator, device table,
//! page-indexed metadata store, clustered I/O engine, and the
//! swapon/swapoff drain coordinator.
//!
//! This crate models the policy and data structures of a kernel's swap
//! subsystem without depending on a real kernel underneath it — the VM
//! page cache and the block devices it pages to are external
//! collaborators the pager core only reaches through the [`object::VmPageCache`]
//! and [`block::BlockDevice`] traits. That keeps the core testable as an
//! ordinary library while staying faithful to the concurrency and
//! locking discipline a real kernel build would need.

#![no_std]

extern crate alloc;

pub mod bitmap;
pub mod block;
pub mod device;
pub mod errno;
pub mod io;
pub mod logger;
pub mod meta;
pub mod object;
pub mod pager;
pub mod swapon;
pub mod sysctl;

pub use errno::{KResult, ENOMEM};
pub use pager::SwapPager;
