//! Storage backends for column buffers.
//!
//! A backend hands out zero-filled raw buffers of a requested size. The
//! default [`Storage`] keeps small buffers on the heap and, when mapping is
//! enabled, places large ones in anonymous maps or in unlinked temp files so
//! the kernel can page them out instead of keeping them resident.

use std::fmt;
use std::mem;
use std::path::PathBuf;
use std::slice;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::error::{Error, Result};
use crate::mmap::{MmapMut, MmapOptions};
use crate::platform::Advice;

/// Storage options for column buffers.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Whether large buffers are memory mapped
    pub use_mmap: bool,

    /// Directory for temp files backing mapped buffers; anonymous maps when `None`
    pub base_dir: Option<PathBuf>,

    /// Whether to create `base_dir` if it doesn't exist
    pub create_dirs: bool,

    /// Smallest buffer, in bytes, that is placed in a mapped region
    pub mmap_threshold: usize,

    /// Whether mapped regions are prefaulted
    pub populate: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        StorageOptions {
            use_mmap: false,
            base_dir: None,
            create_dirs: true,
            mmap_threshold: 1 << 20,
            populate: false,
        }
    }
}

impl StorageOptions {
    /// Heap-only storage.
    pub fn heap() -> Self {
        StorageOptions::default()
    }

    /// Map every buffer of at least `threshold` bytes anonymously.
    pub fn mapped(threshold: usize) -> Self {
        StorageOptions {
            use_mmap: true,
            mmap_threshold: threshold,
            ..StorageOptions::default()
        }
    }

    /// Back mapped buffers with temp files in `dir`.
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Prefault mapped regions.
    pub fn populate(mut self, populate: bool) -> Self {
        self.populate = populate;
        self
    }
}

/// Allocator collaborator for column buffers.
///
/// Implementations must return zero-filled memory: columns rely on an
/// all-zero cell meaning "unset".
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Allocate a zero-filled buffer of at least `bytes` bytes.
    fn allocate(&self, bytes: usize) -> Result<RawBuffer>;
}

/// A zero-filled buffer handed out by a [`StorageBackend`].
///
/// The memory is only ever accessed through atomic cell views, so a
/// `RawBuffer` can be shared between threads freely.
pub struct RawBuffer {
    bytes: usize,
    backing: Backing,
}

enum Backing {
    Heap(Box<[AtomicU64]>),
    Mapped(MmapMut),
}

impl RawBuffer {
    /// Allocate a zero-filled heap buffer.
    pub fn heap(bytes: usize) -> Self {
        let words = bytes.div_ceil(mem::size_of::<u64>());
        let cells: Box<[AtomicU64]> = (0..words).map(|_| AtomicU64::new(0)).collect();
        RawBuffer {
            bytes: words * mem::size_of::<u64>(),
            backing: Backing::Heap(cells),
        }
    }

    /// Wrap a fresh writable map. Fresh maps are zero-filled.
    pub fn mapped(map: MmapMut) -> Self {
        RawBuffer {
            bytes: map.len(),
            backing: Backing::Mapped(map),
        }
    }

    /// Usable size in bytes.
    #[inline]
    pub fn len_bytes(&self) -> usize {
        self.bytes
    }

    /// Whether the buffer lives in a mapped region.
    #[inline]
    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }

    /// View the buffer as a slice of atomic cells.
    #[inline]
    pub fn cells<W: AtomicCell>(&self) -> &[W] {
        let ptr = match &self.backing {
            Backing::Heap(words) => words.as_ptr() as *const u8,
            Backing::Mapped(map) => map.as_ptr(),
        };
        // Heap words are 8-byte aligned and maps are page aligned, both of
        // which satisfy every `AtomicCell`. Zero is a valid bit pattern for
        // all of them, and all access goes through atomic operations.
        unsafe { slice::from_raw_parts(ptr as *const W, self.bytes / mem::size_of::<W>()) }
    }

    /// Give the pages of a retired mapped buffer back to the kernel.
    ///
    /// The region stays mapped, so late optimistic readers still read valid
    /// memory and then fail validation.
    pub fn release(&self) -> Result<()> {
        match &self.backing {
            Backing::Heap(_) => Ok(()),
            Backing::Mapped(map) => map.advise(Advice::DontNeed),
        }
    }
}

impl fmt::Debug for RawBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawBuffer")
            .field("bytes", &self.bytes)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for std::sync::atomic::AtomicU8 {}
    impl Sealed for std::sync::atomic::AtomicU32 {}
    impl Sealed for std::sync::atomic::AtomicU64 {}
}

/// Atomic integer types a [`RawBuffer`] can be viewed as.
pub trait AtomicCell: sealed::Sealed + Send + Sync {
    /// Plain integer stored in the cell.
    type Raw: Copy + Eq + fmt::Debug;

    /// Load the cell.
    fn load_cell(&self) -> Self::Raw;

    /// Store into the cell.
    fn store_cell(&self, value: Self::Raw);

    /// Store into the cell, returning the previous content.
    fn swap_cell(&self, value: Self::Raw) -> Self::Raw;
}

macro_rules! atomic_cell {
    ($atomic:ty, $raw:ty) => {
        impl AtomicCell for $atomic {
            type Raw = $raw;

            #[inline]
            fn load_cell(&self) -> $raw {
                self.load(Ordering::Acquire)
            }

            #[inline]
            fn store_cell(&self, value: $raw) {
                self.store(value, Ordering::Release)
            }

            #[inline]
            fn swap_cell(&self, value: $raw) -> $raw {
                self.swap(value, Ordering::AcqRel)
            }
        }
    };
}

atomic_cell!(AtomicU8, u8);
atomic_cell!(AtomicU32, u32);
atomic_cell!(AtomicU64, u64);

/// Default backend: heap, anonymous maps or temp-file maps by size.
#[derive(Debug, Clone)]
pub struct Storage {
    options: StorageOptions,
}

impl Storage {
    /// Create a new storage backend.
    pub fn new(options: StorageOptions) -> Result<Self> {
        if let Some(dir) = &options.base_dir {
            if options.create_dirs && !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
            if !dir.is_dir() {
                return Err(Error::InvalidArgument(format!(
                    "Storage directory {} does not exist",
                    dir.display()
                )));
            }
        }

        Ok(Storage { options })
    }

    /// Heap-only backend.
    pub fn heap() -> Self {
        Storage {
            options: StorageOptions::heap(),
        }
    }

    /// Get the storage options.
    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    fn map(&self, bytes: usize) -> Result<RawBuffer> {
        let options = MmapOptions::new()
            .len(bytes)
            .populate(self.options.populate)
            .advise(Advice::Random);

        let map = match &self.options.base_dir {
            Some(dir) => {
                let file = tempfile::tempfile_in(dir)?;
                unsafe { options.map_mut(&file)? }
            }
            None => unsafe { options.map_anon()? },
        };
        Ok(RawBuffer::mapped(map))
    }
}

impl Default for Storage {
    fn default() -> Self {
        Storage::heap()
    }
}

impl StorageBackend for Storage {
    fn allocate(&self, bytes: usize) -> Result<RawBuffer> {
        if self.options.use_mmap && bytes > 0 && bytes >= self.options.mmap_threshold {
            self.map(bytes)
        } else {
            Ok(RawBuffer::heap(bytes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_buffers_round_up_to_words() {
        let buffer = RawBuffer::heap(13);
        assert_eq!(buffer.len_bytes(), 16);
        assert_eq!(buffer.cells::<AtomicU64>().len(), 2);
        assert_eq!(buffer.cells::<AtomicU32>().len(), 4);
        assert_eq!(buffer.cells::<AtomicU8>().len(), 16);
        assert!(!buffer.is_mapped());
    }

    #[test]
    fn small_buffers_stay_on_the_heap() {
        let storage = Storage::new(StorageOptions::mapped(4096)).unwrap();
        assert!(!storage.allocate(64).unwrap().is_mapped());
        assert!(storage.allocate(4096).unwrap().is_mapped());
    }

    #[test]
    fn mapped_buffers_start_zeroed() {
        let storage = Storage::new(StorageOptions::mapped(0)).unwrap();
        let buffer = storage.allocate(1 << 16).unwrap();
        let cells = buffer.cells::<AtomicU64>();
        assert!(cells.iter().all(|c| c.load(Ordering::Relaxed) == 0));

        cells[10].store(99, Ordering::Relaxed);
        assert_eq!(cells[10].load(Ordering::Relaxed), 99);
    }

    #[test]
    fn temp_file_storage_creates_its_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("columns");
        let storage = Storage::new(StorageOptions::mapped(0).base_dir(&nested)).unwrap();
        assert!(nested.is_dir());

        let buffer = storage.allocate(8192).unwrap();
        assert!(buffer.is_mapped());
        buffer.cells::<AtomicU64>()[1].store(5, Ordering::Relaxed);
        buffer.release().unwrap();
    }
}
