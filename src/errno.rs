//! POSIX-style error numbers shared by the pager, the swapon/swapoff
//! coordinator, and the sysctl surface.

#![allow(dead_code)]

pub const EPERM: i32 = 1;
pub const ENOENT: i32 = 2;
pub const EIO: i32 = 5;
pub const EBUSY: i32 = 16;
pub const EEXIST: i32 = 17;
pub const ENOTDIR: i32 = 20;
pub const EISDIR: i32 = 21;
pub const EINVAL: i32 = 22;
pub const ENOSPC: i32 = 28;
pub const ENOSYS: i32 = 38;
pub const ENOMEM: i32 = 12;
pub const ENXIO: i32 = 6;

/// Result alias used throughout the pager for syscall-shaped return values.
pub type KResult<T> = Result<T, i32>;
