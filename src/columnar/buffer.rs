//! Fixed-size cell buffers.
//!
//! A buffer never changes size. Growing means building a larger buffer and
//! moving the values over, which [`ConcurrentColumn`] does under its write
//! lock before swapping the new buffer in. Every cell is accessed through
//! `&self`, atomically, so an optimistic reader racing with a move reads
//! either the old or the new content of a cell and never a torn value.
//!
//! Primitive buffers are encoded so that an all-zero cell means "unset",
//! which lets fresh heap and mapped memory start out empty without a fill
//! pass:
//!
//! * floats store their bits XOR the canonical NaN, so zero decodes to NaN
//!   and NaN is the null sentinel;
//! * integers and booleans carry a presence tag next to the value.
//!
//! [`ConcurrentColumn`]: crate::columnar::ConcurrentColumn

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::columnar::storage::{AtomicCell, RawBuffer, StorageBackend};
use crate::error::{Error, Result};

/// Cell storage of one column at one fixed capacity.
pub trait ColumnBuffer: Send + Sync + Sized + 'static {
    /// Value held by a cell.
    type Value: Clone + Send + Sync + 'static;

    /// Read a cell. `None` means unset.
    fn get(&self, index: usize) -> Option<Self::Value>;

    /// Overwrite a cell, returning its previous value.
    fn set(&self, index: usize, value: Option<Self::Value>) -> Option<Self::Value>;

    /// Number of cells.
    fn capacity(&self) -> usize;

    /// Build a buffer of `capacity` cells holding this buffer's values.
    ///
    /// The new buffer is fully built before anything else changes, so an
    /// allocation failure leaves `self` untouched.
    fn grow(&self, capacity: usize) -> Result<Self>;

    /// Called once after the buffer has been replaced by a grown one.
    fn retire(&self) {}
}

/// Zero-means-unset encoding of a primitive value into an atomic cell.
pub trait CellCodec: Send + Sync + 'static {
    /// Decoded value.
    type Value: Copy + Send + Sync + fmt::Debug + 'static;

    /// Atomic cell the value is stored in.
    type Cell: AtomicCell;

    /// Encode a value; `None` must encode to zero.
    fn encode(value: Option<Self::Value>) -> <Self::Cell as AtomicCell>::Raw;

    /// Decode a raw cell.
    fn decode(raw: <Self::Cell as AtomicCell>::Raw) -> Option<Self::Value>;
}

const F64_NAN_BITS: u64 = 0x7ff8_0000_0000_0000;
const F32_NAN_BITS: u32 = 0x7fc0_0000;
const PRESENT_TAG: u64 = 1 << 32;

/// `f64` cells with NaN as the null sentinel.
#[derive(Debug, Clone, Copy)]
pub enum F64Codec {}

impl CellCodec for F64Codec {
    type Value = f64;
    type Cell = AtomicU64;

    #[inline]
    fn encode(value: Option<f64>) -> u64 {
        value.unwrap_or(f64::NAN).to_bits() ^ F64_NAN_BITS
    }

    #[inline]
    fn decode(raw: u64) -> Option<f64> {
        let value = f64::from_bits(raw ^ F64_NAN_BITS);
        if value.is_nan() {
            None
        } else {
            Some(value)
        }
    }
}

/// `f32` cells with NaN as the null sentinel.
#[derive(Debug, Clone, Copy)]
pub enum F32Codec {}

impl CellCodec for F32Codec {
    type Value = f32;
    type Cell = AtomicU32;

    #[inline]
    fn encode(value: Option<f32>) -> u32 {
        value.unwrap_or(f32::NAN).to_bits() ^ F32_NAN_BITS
    }

    #[inline]
    fn decode(raw: u32) -> Option<f32> {
        let value = f32::from_bits(raw ^ F32_NAN_BITS);
        if value.is_nan() {
            None
        } else {
            Some(value)
        }
    }
}

/// `i32` cells with a presence tag in the upper half of a 64-bit word.
#[derive(Debug, Clone, Copy)]
pub enum I32Codec {}

impl CellCodec for I32Codec {
    type Value = i32;
    type Cell = AtomicU64;

    #[inline]
    fn encode(value: Option<i32>) -> u64 {
        match value {
            Some(v) => PRESENT_TAG | u64::from(v as u32),
            None => 0,
        }
    }

    #[inline]
    fn decode(raw: u64) -> Option<i32> {
        if raw & PRESENT_TAG == 0 {
            None
        } else {
            Some(raw as u32 as i32)
        }
    }
}

/// Boolean cells: 0 unset, 1 false, 2 true.
#[derive(Debug, Clone, Copy)]
pub enum BoolCodec {}

impl CellCodec for BoolCodec {
    type Value = bool;
    type Cell = AtomicU8;

    #[inline]
    fn encode(value: Option<bool>) -> u8 {
        match value {
            None => 0,
            Some(false) => 1,
            Some(true) => 2,
        }
    }

    #[inline]
    fn decode(raw: u8) -> Option<bool> {
        match raw {
            0 => None,
            1 => Some(false),
            _ => Some(true),
        }
    }
}

/// Primitive cells in a raw buffer from a [`StorageBackend`].
pub struct PrimitiveBuffer<C: CellCodec> {
    raw: RawBuffer,
    capacity: usize,
    storage: Arc<dyn StorageBackend>,
    _codec: PhantomData<C>,
}

/// Nullable `f64` cells, NaN is unset.
pub type Float64Buffer = PrimitiveBuffer<F64Codec>;
/// Nullable `f32` cells, NaN is unset.
pub type Float32Buffer = PrimitiveBuffer<F32Codec>;
/// Nullable `i32` cells.
pub type Int32Buffer = PrimitiveBuffer<I32Codec>;
/// Nullable `bool` cells.
pub type BoolBuffer = PrimitiveBuffer<BoolCodec>;

impl<C: CellCodec> PrimitiveBuffer<C> {
    /// Allocate `capacity` unset cells from `storage`.
    pub fn allocate(capacity: usize, storage: &Arc<dyn StorageBackend>) -> Result<Self> {
        let bytes = capacity
            .checked_mul(mem::size_of::<C::Cell>())
            .ok_or(Error::SizeExceedsSystemLimit)?;
        let raw = storage.allocate(bytes)?;
        if raw.len_bytes() < bytes {
            return Err(Error::InvalidArgument(format!(
                "Storage returned {} bytes, {} requested",
                raw.len_bytes(),
                bytes
            )));
        }

        Ok(PrimitiveBuffer {
            raw,
            capacity,
            storage: Arc::clone(storage),
            _codec: PhantomData,
        })
    }

    /// Whether the cells live in a mapped region.
    pub fn is_mapped(&self) -> bool {
        self.raw.is_mapped()
    }

    #[inline]
    fn cells(&self) -> &[C::Cell] {
        &self.raw.cells::<C::Cell>()[..self.capacity]
    }
}

impl<C: CellCodec> ColumnBuffer for PrimitiveBuffer<C> {
    type Value = C::Value;

    #[inline]
    fn get(&self, index: usize) -> Option<C::Value> {
        C::decode(self.cells()[index].load_cell())
    }

    #[inline]
    fn set(&self, index: usize, value: Option<C::Value>) -> Option<C::Value> {
        C::decode(self.cells()[index].swap_cell(C::encode(value)))
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn grow(&self, capacity: usize) -> Result<Self> {
        let grown = PrimitiveBuffer::<C>::allocate(capacity, &self.storage)?;
        let copied = self.capacity.min(capacity);
        for (to, from) in grown.cells()[..copied].iter().zip(self.cells()) {
            to.store_cell(from.load_cell());
        }
        Ok(grown)
    }

    fn retire(&self) {
        if let Err(err) = self.raw.release() {
            log::warn!("failed to release retired mapped buffer: {}", err);
        }
    }
}

impl<C: CellCodec> fmt::Debug for PrimitiveBuffer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimitiveBuffer")
            .field("capacity", &self.capacity)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

/// Heap cells for arbitrary values, each behind its own tiny lock.
///
/// Intended for cheaply clonable values such as `Arc<T>`, plain enums or
/// small strings.
pub struct ObjectBuffer<T> {
    cells: Box<[Mutex<Option<T>>]>,
}

impl<T> ObjectBuffer<T> {
    /// Allocate `capacity` unset cells.
    pub fn new(capacity: usize) -> Self {
        ObjectBuffer {
            cells: (0..capacity).map(|_| Mutex::new(None)).collect(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> ColumnBuffer for ObjectBuffer<T> {
    type Value = T;

    #[inline]
    fn get(&self, index: usize) -> Option<T> {
        self.cells[index].lock().clone()
    }

    #[inline]
    fn set(&self, index: usize, value: Option<T>) -> Option<T> {
        mem::replace(&mut *self.cells[index].lock(), value)
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.cells.len()
    }

    // Values are moved, not cloned. A late optimistic reader of the old
    // buffer sees an empty cell and then fails validation.
    fn grow(&self, capacity: usize) -> Result<Self> {
        let grown = ObjectBuffer::new(capacity);
        for (to, from) in grown.cells.iter().zip(self.cells.iter()) {
            *to.lock() = from.lock().take();
        }
        Ok(grown)
    }
}

impl<T> fmt::Debug for ObjectBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBuffer")
            .field("capacity", &self.cells.len())
            .finish()
    }
}
