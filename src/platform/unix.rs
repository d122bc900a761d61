//! Unix memory mapping implementation.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::ptr;

use libc::{
    c_int, c_void, madvise, mmap, munmap, MADV_DONTNEED, MADV_NORMAL, MADV_RANDOM,
    MADV_SEQUENTIAL, MADV_WILLNEED, MAP_ANON, MAP_PRIVATE, MAP_SHARED, PROT_READ, PROT_WRITE,
};

use crate::error::{Error, Result};
use crate::mmap::MmapRaw;
use crate::platform::Advice;

#[cfg(any(target_os = "linux", target_os = "android"))]
fn populate_flag(populate: bool) -> c_int {
    if populate {
        libc::MAP_POPULATE
    } else {
        0
    }
}

// MAP_POPULATE is Linux only; elsewhere the pages fault in lazily.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn populate_flag(_populate: bool) -> c_int {
    0
}

/// Map a file shared and writable.
///
/// # Safety
///
/// See [`crate::platform::map_file`].
pub unsafe fn map_file(file: &File, len: usize, populate: bool) -> Result<MmapRaw> {
    let flags = MAP_SHARED | populate_flag(populate);

    let addr = mmap(
        ptr::null_mut(),
        len,
        PROT_READ | PROT_WRITE,
        flags,
        file.as_raw_fd(),
        0,
    );

    if addr == libc::MAP_FAILED {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    Ok(MmapRaw { ptr: addr as *mut u8, len })
}

/// Create an anonymous private map.
///
/// # Safety
///
/// See [`crate::platform::map_anon`].
pub unsafe fn map_anon(len: usize, populate: bool) -> Result<MmapRaw> {
    let flags = MAP_PRIVATE | MAP_ANON | populate_flag(populate);

    let addr = mmap(ptr::null_mut(), len, PROT_READ | PROT_WRITE, flags, -1, 0);

    if addr == libc::MAP_FAILED {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    Ok(MmapRaw { ptr: addr as *mut u8, len })
}

/// Unmap memory.
///
/// # Safety
///
/// See [`crate::platform::unmap`].
pub unsafe fn unmap(addr: *mut u8, len: usize) -> Result<()> {
    if munmap(addr as *mut c_void, len) == 0 {
        Ok(())
    } else {
        Err(Error::Io(io::Error::last_os_error()))
    }
}

/// Advise the kernel about how the memory map will be accessed.
///
/// # Safety
///
/// See [`crate::platform::advise`].
pub unsafe fn advise(addr: *mut u8, len: usize, advice: Advice) -> Result<()> {
    let advice_flag = match advice {
        Advice::Normal => MADV_NORMAL,
        Advice::Random => MADV_RANDOM,
        Advice::Sequential => MADV_SEQUENTIAL,
        Advice::WillNeed => MADV_WILLNEED,
        Advice::DontNeed => MADV_DONTNEED,
    };

    if madvise(addr as *mut c_void, len, advice_flag) == 0 {
        Ok(())
    } else {
        Err(Error::Io(io::Error::last_os_error()))
    }
}
