//! Platform-specific memory mapping primitives.
//!
//! Only the handful of calls the mapped column storage needs: writable
//! shared file maps, anonymous maps, unmapping and access advice.

use std::fs::File;

use crate::error::Result;

/// Memory access advice for the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advice {
    /// Normal access pattern.
    Normal,

    /// Random access pattern.
    Random,

    /// Sequential access pattern.
    Sequential,

    /// Will need soon.
    WillNeed,

    /// Don't need anymore. Pages of an anonymous map read back as zero.
    DontNeed,
}

#[cfg(unix)]
mod unix;

#[cfg(windows)]
mod windows;

#[cfg(not(any(unix, windows)))]
mod unsupported;

/// Map `len` bytes of `file` shared and writable.
///
/// # Safety
///
/// The returned region aliases the file; callers must keep the file at
/// least `len` bytes long while the map is alive.
pub unsafe fn map_file(file: &File, len: usize, populate: bool) -> Result<crate::mmap::MmapRaw> {
    #[cfg(unix)]
    return unix::map_file(file, len, populate);

    #[cfg(windows)]
    return windows::map_file(file, len, populate);

    #[cfg(not(any(unix, windows)))]
    return unsupported::map_file(file, len, populate);
}

/// Create an anonymous, zero-filled, writable map.
///
/// # Safety
///
/// The returned pointer is only valid until [`unmap`] is called on it.
pub unsafe fn map_anon(len: usize, populate: bool) -> Result<crate::mmap::MmapRaw> {
    #[cfg(unix)]
    return unix::map_anon(len, populate);

    #[cfg(windows)]
    return windows::map_anon(len, populate);

    #[cfg(not(any(unix, windows)))]
    return unsupported::map_anon(len, populate);
}

/// Unmap memory.
///
/// # Safety
///
/// `addr`/`len` must describe a live mapping created by this module.
pub unsafe fn unmap(addr: *mut u8, len: usize) -> Result<()> {
    #[cfg(unix)]
    return unix::unmap(addr, len);

    #[cfg(windows)]
    return windows::unmap(addr, len);

    #[cfg(not(any(unix, windows)))]
    return unsupported::unmap(addr, len);
}

/// Advise the kernel about how the memory map will be accessed.
///
/// # Safety
///
/// `addr`/`len` must describe a live mapping created by this module.
pub unsafe fn advise(addr: *mut u8, len: usize, advice: Advice) -> Result<()> {
    #[cfg(unix)]
    return unix::advise(addr, len, advice);

    #[cfg(windows)]
    return windows::advise(addr, len, advice);

    #[cfg(not(any(unix, windows)))]
    return unsupported::advise(addr, len, advice);
}
