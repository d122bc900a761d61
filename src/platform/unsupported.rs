//! Fallback for targets without memory mapping.
//!
//! Every call fails with `ENOSYS`; callers keep columns on the heap instead.

use std::fs::File;

use crate::error::{Error, Result};
use crate::mmap::MmapRaw;
use crate::platform::Advice;

const ENOSYS: i32 = 38;

pub unsafe fn map_file(_file: &File, _len: usize, _populate: bool) -> Result<MmapRaw> {
    Err(Error::PlatformError(ENOSYS))
}

pub unsafe fn map_anon(_len: usize, _populate: bool) -> Result<MmapRaw> {
    Err(Error::PlatformError(ENOSYS))
}

pub unsafe fn unmap(_addr: *mut u8, _len: usize) -> Result<()> {
    Err(Error::PlatformError(ENOSYS))
}

pub unsafe fn advise(_addr: *mut u8, _len: usize, _advice: Advice) -> Result<()> {
    Ok(())
}
