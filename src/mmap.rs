//! Writable memory maps used as column storage.
//!
//! Mapped columns never persist anything: a map is either anonymous or
//! backed by an unlinked temp file, and lives exactly as long as the
//! buffer that owns it.

use std::fs::File;
use std::ops::{Deref, DerefMut};
use std::slice;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};
use crate::platform::{self, Advice};
use crate::utils::alignment;

/// Statistics for memory mapping operations
static TOTAL_MAPPED_MEMORY: AtomicUsize = AtomicUsize::new(0);
static ACTIVE_MAPPINGS: AtomicUsize = AtomicUsize::new(0);

/// Configuration options for memory mapping.
#[derive(Debug, Clone, Default)]
pub struct MmapOptions {
    /// The length of the memory map.
    len: Option<usize>,

    /// Whether to populate (prefault) the map.
    pub populate: bool,

    /// Access pattern hint applied right after mapping.
    pub advice: Option<Advice>,
}

impl MmapOptions {
    /// Create a new set of options for configuring memory maps.
    #[inline]
    pub fn new() -> MmapOptions {
        MmapOptions::default()
    }

    /// Set the length of the memory map.
    #[inline]
    pub fn len(mut self, len: usize) -> MmapOptions {
        self.len = Some(len);
        self
    }

    /// Configure the memory map to be pre-populated (prefaulted).
    #[inline]
    pub fn populate(mut self, populate: bool) -> MmapOptions {
        self.populate = populate;
        self
    }

    /// Hint the kernel about the expected access pattern.
    #[inline]
    pub fn advise(mut self, advice: Advice) -> MmapOptions {
        self.advice = Some(advice);
        self
    }

    /// Create a writable shared map of `file`, growing the file to the
    /// mapped length first.
    ///
    /// # Safety
    ///
    /// The caller must make sure nothing else truncates or remaps the file
    /// while the map is alive.
    pub unsafe fn map_mut(&self, file: &File) -> Result<MmapMut> {
        let len = self.checked_len()?;
        let file_len = alignment::align_up(len, alignment::page_size());
        file.set_len(file_len as u64)?;

        let raw = platform::map_file(file, len, self.populate)?;
        self.finish(raw)
    }

    /// Create an anonymous, zero-filled writable map.
    ///
    /// # Safety
    ///
    /// The returned map hands out raw pointers; callers are responsible for
    /// synchronizing access through them.
    pub unsafe fn map_anon(&self) -> Result<MmapMut> {
        let len = self.checked_len()?;
        let raw = platform::map_anon(len, self.populate)?;
        self.finish(raw)
    }

    fn checked_len(&self) -> Result<usize> {
        let len = self.len.ok_or_else(|| {
            Error::InvalidArgument("Length must be specified for a column mapping".into())
        })?;
        if len == 0 {
            return Err(Error::ZeroSizedMapping);
        }
        if len > isize::MAX as usize {
            return Err(Error::SizeExceedsSystemLimit);
        }
        Ok(len)
    }

    unsafe fn finish(&self, raw: MmapRaw) -> Result<MmapMut> {
        TOTAL_MAPPED_MEMORY.fetch_add(raw.len, Ordering::Relaxed);
        ACTIVE_MAPPINGS.fetch_add(1, Ordering::Relaxed);

        if let Some(advice) = self.advice {
            raw.advise(advice)?;
        }
        log::debug!("mapped {} bytes (populate: {})", raw.len, self.populate);
        Ok(MmapMut { inner: raw })
    }
}

/// Raw memory map handle.
#[derive(Debug)]
pub struct MmapRaw {
    /// Pointer to the mapped memory.
    pub(crate) ptr: *mut u8,

    /// Length of the mapped memory.
    pub(crate) len: usize,
}

// The mapping is plain memory; synchronization is up to the owner.
unsafe impl Send for MmapRaw {}
unsafe impl Sync for MmapRaw {}

impl MmapRaw {
    /// Advise the kernel about how the memory map will be accessed.
    #[inline]
    pub fn advise(&self, advice: Advice) -> Result<()> {
        unsafe { platform::advise(self.ptr, self.len, advice) }
    }
}

impl Drop for MmapRaw {
    fn drop(&mut self) {
        unsafe {
            if !self.ptr.is_null() {
                ACTIVE_MAPPINGS.fetch_sub(1, Ordering::Relaxed);
                TOTAL_MAPPED_MEMORY.fetch_sub(self.len, Ordering::Relaxed);

                if let Err(err) = platform::unmap(self.ptr, self.len) {
                    log::warn!("failed to unmap {} bytes: {}", self.len, err);
                }
            }
        }
    }
}

/// A writable memory map.
#[derive(Debug)]
pub struct MmapMut {
    inner: MmapRaw,
}

impl MmapMut {
    /// Return the length of the memory map.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len
    }

    /// Return true if the memory map is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Return a pointer to the memory map.
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.inner.ptr
    }

    /// Advise the kernel about how the memory map will be accessed.
    #[inline]
    pub fn advise(&self, advice: Advice) -> Result<()> {
        self.inner.advise(advice)
    }
}

impl Deref for MmapMut {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.inner.ptr, self.inner.len) }
    }
}

impl DerefMut for MmapMut {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.inner.ptr, self.inner.len) }
    }
}

/// Get the total amount of memory currently mapped.
#[inline]
pub fn total_mapped_memory() -> usize {
    TOTAL_MAPPED_MEMORY.load(Ordering::Relaxed)
}

/// Get the number of active memory mappings.
#[inline]
pub fn active_mappings() -> usize {
    ACTIVE_MAPPINGS.load(Ordering::Relaxed)
}
