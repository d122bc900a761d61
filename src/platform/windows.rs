//! Windows memory mapping implementation.

use std::fs::File;
use std::io;
use std::os::windows::io::AsRawHandle;
use std::ptr;

use winapi::shared::basetsd::SIZE_T;
use winapi::shared::minwindef::{DWORD, LPVOID};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::memoryapi::{
    CreateFileMappingW, MapViewOfFile, UnmapViewOfFile, FILE_MAP_READ, FILE_MAP_WRITE,
};
use winapi::um::winnt::{HANDLE, PAGE_READWRITE, SEC_COMMIT};

use crate::error::{Error, Result};
use crate::mmap::MmapRaw;
use crate::platform::Advice;
use crate::utils::alignment::page_size;

/// Map a file shared and writable.
///
/// # Safety
///
/// See [`crate::platform::map_file`].
pub unsafe fn map_file(file: &File, len: usize, populate: bool) -> Result<MmapRaw> {
    map_view(file.as_raw_handle() as HANDLE, len, populate)
}

/// Create an anonymous map backed by the paging file.
///
/// # Safety
///
/// See [`crate::platform::map_anon`].
pub unsafe fn map_anon(len: usize, populate: bool) -> Result<MmapRaw> {
    map_view(INVALID_HANDLE_VALUE, len, populate)
}

unsafe fn map_view(handle: HANDLE, len: usize, populate: bool) -> Result<MmapRaw> {
    let size = len as u64;
    let mapping = CreateFileMappingW(
        handle,
        ptr::null_mut(),
        PAGE_READWRITE | SEC_COMMIT,
        (size >> 32) as DWORD,
        (size & 0xFFFF_FFFF) as DWORD,
        ptr::null(),
    );

    if mapping.is_null() {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    let addr = MapViewOfFile(mapping, FILE_MAP_READ | FILE_MAP_WRITE, 0, 0, len as SIZE_T);

    // The view keeps the section alive.
    CloseHandle(mapping);

    if addr.is_null() {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    if populate {
        let page_size = page_size();
        for i in (0..len).step_by(page_size) {
            ptr::read_volatile((addr as usize + i) as *const u8);
        }
    }

    Ok(MmapRaw { ptr: addr as *mut u8, len })
}

/// Unmap memory.
///
/// # Safety
///
/// See [`crate::platform::unmap`].
pub unsafe fn unmap(addr: *mut u8, _len: usize) -> Result<()> {
    if UnmapViewOfFile(addr as LPVOID) != 0 {
        Ok(())
    } else {
        Err(Error::Io(io::Error::last_os_error()))
    }
}

/// Windows has no madvise equivalent for views; advice is ignored.
///
/// # Safety
///
/// See [`crate::platform::advise`].
pub unsafe fn advise(_addr: *mut u8, _len: usize, _advice: Advice) -> Result<()> {
    Ok(())
}
