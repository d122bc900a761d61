//! Columns: resizable, indexable storage for one attribute across all rows.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::columnar::buffer::ColumnBuffer;
use crate::columnar::data_type::{AnyValue, DataType, DataTypeRef};
use crate::error::{Error, Result};
use crate::utils::concurrency::StampedLock;
use crate::utils::metrics::{self, Operation};

/// Storage for one attribute across all rows of a schema.
///
/// All methods take `&self`; implementations are shared between worker
/// threads and must make concurrent cell access and growth safe.
pub trait Column<T>: Send + Sync {
    /// Read a cell. `None` means unset. `index` must be below `capacity()`.
    fn get(&self, index: usize) -> Option<T>;

    /// Overwrite a cell and return its previous value.
    ///
    /// The stored value is exact under any interleaving. The returned
    /// previous value is not when the write races a resize of the same
    /// column: it may then be the value this call just stored.
    fn set(&self, index: usize, value: Option<T>) -> Option<T>;

    /// Current number of cells.
    fn capacity(&self) -> usize;

    /// Grow to at least `new_size` cells, keeping existing values.
    ///
    /// Returns whether the column actually grew.
    fn resize_to(&self, new_size: usize) -> Result<bool>;

    /// Grow only if `required` exceeds the current capacity.
    fn ensure_capacity(&self, required: usize) -> Result<bool> {
        if required > self.capacity() {
            self.resize_to(required)
        } else {
            Ok(false)
        }
    }

    /// Reset a cell to unset, returning its previous value.
    fn clear(&self, index: usize) -> Option<T> {
        self.set(index, None)
    }

    /// Free memory superseded by earlier growth. Returns how many buffers
    /// were freed.
    fn reclaim_retired(&mut self) -> usize {
        0
    }
}

/// A column that keeps cell access non-blocking while it grows.
///
/// Cell reads and writes run optimistically against the current buffer and
/// are validated against the stamped lock afterwards. Only when a resize
/// overlapped does the access run again under the shared lock. Resizing
/// takes the exclusive lock, builds the grown buffer, and swaps it in.
///
/// Superseded buffers are retired rather than freed: an optimistic access
/// may still be reading one. They are dropped with the column or by
/// [`reclaim_retired`](Self::reclaim_retired). Growth at least doubles the
/// capacity, which keeps retired memory below the live capacity.
pub struct ConcurrentColumn<B: ColumnBuffer> {
    current: AtomicPtr<B>,
    lock: StampedLock,
    retired: Mutex<Vec<Box<B>>>,
}

impl<B: ColumnBuffer> ConcurrentColumn<B> {
    /// Wrap an initial buffer.
    pub fn new(buffer: B) -> Self {
        ConcurrentColumn {
            current: AtomicPtr::new(Box::into_raw(Box::new(buffer))),
            lock: StampedLock::new(),
            retired: Mutex::new(Vec::new()),
        }
    }

    #[inline]
    fn buffer(&self) -> &B {
        // `current` always points at a live buffer: replaced buffers are
        // kept in `retired` until `&mut self` or drop proves no reader is left.
        unsafe { &*self.current.load(Ordering::Acquire) }
    }

    /// Run `op` against the current buffer, optimistically first.
    #[inline]
    fn access<R>(&self, index: usize, op: impl Fn(&B) -> R) -> R {
        if let Some(stamp) = self.lock.try_optimistic_read() {
            let buffer = self.buffer();
            if index < buffer.capacity() {
                let result = op(buffer);
                if self.lock.validate(stamp) {
                    return result;
                }
            }
        }

        metrics::record_operation(Operation::OptimisticRetry);
        let _guard = self.lock.read();
        op(self.buffer())
    }

    /// Number of buffers waiting to be freed.
    pub fn retired_count(&self) -> usize {
        self.retired.lock().len()
    }

    /// Free every retired buffer. Exclusive access proves no optimistic
    /// reader can still hold one.
    pub fn reclaim_retired(&mut self) -> usize {
        let retired = self.retired.get_mut();
        let count = retired.len();
        retired.clear();
        count
    }
}

impl<B: ColumnBuffer> Column<B::Value> for ConcurrentColumn<B> {
    #[inline]
    fn get(&self, index: usize) -> Option<B::Value> {
        self.access(index, |buffer| buffer.get(index))
    }

    // A failed optimistic attempt is replayed, so the value is cloned. The
    // replay reports what the grown buffer held, which is this value if the
    // attempt landed before the copy.
    #[inline]
    fn set(&self, index: usize, value: Option<B::Value>) -> Option<B::Value> {
        self.access(index, |buffer| buffer.set(index, value.clone()))
    }

    fn capacity(&self) -> usize {
        if let Some(stamp) = self.lock.try_optimistic_read() {
            let capacity = self.buffer().capacity();
            if self.lock.validate(stamp) {
                return capacity;
            }
        }

        let _guard = self.lock.read();
        self.buffer().capacity()
    }

    fn resize_to(&self, new_size: usize) -> Result<bool> {
        if new_size <= self.capacity() {
            return Ok(false);
        }

        let _guard = self.lock.write();
        let current = self.buffer();
        let capacity = current.capacity();
        if new_size <= capacity {
            return Ok(false);
        }

        let target = new_size.max(capacity.saturating_mul(2));
        let grown = Box::new(current.grow(target)?);
        let old = self.current.swap(Box::into_raw(grown), Ordering::AcqRel);

        // Only this thread, under the write lock, ever swaps `current`.
        let old = unsafe { Box::from_raw(old) };
        old.retire();
        self.retired.lock().push(old);

        metrics::record_operation(Operation::ColumnResize);
        metrics::record_operation(Operation::RetireBuffer);
        log::trace!("column grew from {} to {} cells", capacity, target);
        Ok(true)
    }

    fn reclaim_retired(&mut self) -> usize {
        ConcurrentColumn::reclaim_retired(self)
    }
}

impl<B: ColumnBuffer> Drop for ConcurrentColumn<B> {
    fn drop(&mut self) {
        let current = *self.current.get_mut();
        if !current.is_null() {
            drop(unsafe { Box::from_raw(current) });
        }
    }
}

impl<B: ColumnBuffer + fmt::Debug> fmt::Debug for ConcurrentColumn<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let _guard = self.lock.read();
        f.debug_struct("ConcurrentColumn")
            .field("buffer", self.buffer())
            .field("retired", &self.retired_count())
            .finish()
    }
}

/// Type-erased column as kept in the schema registry.
pub(crate) trait ErasedColumn: Send + Sync {
    fn data_type(&self) -> DataTypeRef;

    fn name(&self) -> &str;

    fn capacity(&self) -> usize;

    fn resize_to(&self, new_size: usize) -> Result<bool>;

    fn get_any(&self, index: usize) -> Option<AnyValue>;

    fn set_any(&self, index: usize, value: Option<AnyValue>) -> Result<Option<AnyValue>>;

    fn reclaim_retired(&mut self) -> usize;

    fn as_any(&self) -> &dyn Any;

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A column together with the data type that created it.
pub(crate) struct TypedColumn<D: DataType> {
    pub(crate) data_type: Arc<D>,
    pub(crate) column: Box<dyn Column<D::Value>>,
}

impl<D: DataType> ErasedColumn for TypedColumn<D> {
    fn data_type(&self) -> DataTypeRef {
        self.data_type.clone()
    }

    fn name(&self) -> &str {
        self.data_type.unique_id()
    }

    fn capacity(&self) -> usize {
        self.column.capacity()
    }

    fn resize_to(&self, new_size: usize) -> Result<bool> {
        self.column.resize_to(new_size)
    }

    fn get_any(&self, index: usize) -> Option<AnyValue> {
        self.column
            .get(index)
            .map(|value| Box::new(value) as AnyValue)
    }

    fn set_any(&self, index: usize, value: Option<AnyValue>) -> Result<Option<AnyValue>> {
        let value = match value {
            Some(value) => match value.downcast::<D::Value>() {
                Ok(value) => Some(*value),
                Err(_) => return Err(Error::type_mismatch::<D::Value>(self.data_type.unique_id())),
            },
            None => None,
        };
        Ok(self
            .column
            .set(index, value)
            .map(|previous| Box::new(previous) as AnyValue))
    }

    fn reclaim_retired(&mut self) -> usize {
        self.column.reclaim_retired()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Registry entry for one attribute: its column and registration order.
#[derive(Clone)]
pub struct ColumnEntry {
    pub(crate) column: Arc<dyn ErasedColumn>,
    pub(crate) ordinal: u64,
}

impl ColumnEntry {
    pub(crate) fn new<D: DataType>(data_type: Arc<D>, column: Box<dyn Column<D::Value>>) -> Self {
        ColumnEntry {
            column: Arc::new(TypedColumn { data_type, column }),
            ordinal: 0,
        }
    }

    /// Data type the column was created for.
    pub fn data_type(&self) -> DataTypeRef {
        self.column.data_type()
    }

    /// Current capacity of the column.
    pub fn capacity(&self) -> usize {
        self.column.capacity()
    }

    pub(crate) fn typed<D: DataType>(&self) -> Result<&TypedColumn<D>> {
        self.column
            .as_any()
            .downcast_ref::<TypedColumn<D>>()
            .ok_or_else(|| Error::type_mismatch::<D::Value>(self.column.data_type().name()))
    }
}

impl fmt::Debug for ColumnEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnEntry")
            .field("data_type", &self.data_type())
            .field("capacity", &self.capacity())
            .field("ordinal", &self.ordinal)
            .finish()
    }
}

/// Typed handle on one registered column.
///
/// Skips the registry lookup, for callers touching many cells of the same
/// attribute.
pub struct ColumnHandle<D: DataType> {
    column: Arc<TypedColumn<D>>,
}

impl<D: DataType> ColumnHandle<D> {
    pub(crate) fn from_entry(entry: &ColumnEntry) -> Result<Self> {
        let name = entry.column.data_type().name().to_string();
        let column = Arc::clone(&entry.column)
            .into_any_arc()
            .downcast::<TypedColumn<D>>()
            .map_err(|_| Error::type_mismatch::<D::Value>(&name))?;
        Ok(ColumnHandle { column })
    }

    /// The data type of this column.
    pub fn data_type(&self) -> &D {
        &self.column.data_type
    }

    /// The column itself.
    pub fn column(&self) -> &dyn Column<D::Value> {
        self.column.column.as_ref()
    }

    /// Read a cell.
    #[inline]
    pub fn get(&self, index: usize) -> Option<D::Value> {
        self.column.column.get(index)
    }

    /// Overwrite a cell, returning the previous value.
    #[inline]
    pub fn set(&self, index: usize, value: impl Into<Option<D::Value>>) -> Option<D::Value> {
        self.column.column.set(index, value.into())
    }
}

impl<D: DataType> Clone for ColumnHandle<D> {
    fn clone(&self) -> Self {
        ColumnHandle {
            column: Arc::clone(&self.column),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columnar::buffer::{Float64Buffer, ObjectBuffer};
    use crate::columnar::storage::{Storage, StorageBackend};
    use std::thread;

    fn float_column(capacity: usize) -> ConcurrentColumn<Float64Buffer> {
        let storage: Arc<dyn StorageBackend> = Arc::new(Storage::heap());
        ConcurrentColumn::new(Float64Buffer::allocate(capacity, &storage).unwrap())
    }

    #[test]
    fn resize_is_idempotent_below_capacity() {
        let column = float_column(10);
        assert!(!column.resize_to(5).unwrap());
        assert!(!column.resize_to(10).unwrap());
        assert!(!column.ensure_capacity(8).unwrap());
        assert_eq!(column.capacity(), 10);
        assert_eq!(column.retired_count(), 0);
    }

    #[test]
    fn resize_grows_at_least_geometrically() {
        let column = float_column(10);
        assert!(column.resize_to(11).unwrap());
        assert_eq!(column.capacity(), 20);
        assert!(column.resize_to(100).unwrap());
        assert_eq!(column.capacity(), 100);
        assert_eq!(column.retired_count(), 2);
    }

    #[test]
    fn values_survive_growth() {
        let column = float_column(4);
        column.set(3, Some(2.5));
        column.resize_to(1000).unwrap();
        assert_eq!(column.get(3), Some(2.5));
        assert_eq!(column.get(999), None);
        assert_eq!(column.clear(3), Some(2.5));
        assert_eq!(column.get(3), None);
    }

    #[test]
    fn reclaim_frees_retired_buffers() {
        let mut column = ConcurrentColumn::new(ObjectBuffer::<String>::new(1));
        column.set(0, Some("a".to_string()));
        column.resize_to(2).unwrap();
        column.resize_to(8).unwrap();
        assert_eq!(column.reclaim_retired(), 2);
        assert_eq!(column.retired_count(), 0);
        assert_eq!(column.get(0).as_deref(), Some("a"));
    }

    #[test]
    fn writers_racing_a_resize_lose_nothing() {
        let column = float_column(64);
        let writers = 4;
        let per_writer = 16;

        thread::scope(|scope| {
            for w in 0..writers {
                let column = &column;
                scope.spawn(move || {
                    for round in 0..200 {
                        for i in 0..per_writer {
                            let index = w * per_writer + i;
                            column.set(index, Some((round * 1000 + index) as f64));
                        }
                    }
                });
            }
            let column = &column;
            scope.spawn(move || {
                for size in (65..4096).step_by(97) {
                    column.resize_to(size).unwrap();
                }
            });
        });

        for index in 0..writers * per_writer {
            assert_eq!(column.get(index), Some((199 * 1000 + index) as f64));
        }
    }

    #[test]
    fn object_writers_racing_a_resize_lose_nothing() {
        let column = ConcurrentColumn::new(ObjectBuffer::<Arc<str>>::new(32));
        let writers = 4;
        let per_writer = 8;

        thread::scope(|scope| {
            for w in 0..writers {
                let column = &column;
                scope.spawn(move || {
                    for round in 0..300 {
                        for i in 0..per_writer {
                            let index = w * per_writer + i;
                            column.set(index, Some(Arc::from(format!("{}-{}", round, index))));
                        }
                    }
                });
            }
            let column = &column;
            scope.spawn(move || {
                for size in (33..8192).step_by(61) {
                    column.resize_to(size).unwrap();
                }
            });
        });

        for index in 0..writers * per_writer {
            assert_eq!(column.get(index).as_deref(), Some(format!("299-{}", index).as_str()));
        }
        assert!(column.capacity() >= 8131);
    }

    #[test]
    fn boxed_columns_reclaim_through_the_trait() {
        let mut column: Box<dyn Column<f64>> = Box::new(float_column(2));
        column.set(1, Some(4.0));
        column.resize_to(3).unwrap();
        column.resize_to(9).unwrap();
        assert_eq!(column.reclaim_retired(), 2);
        assert_eq!(column.reclaim_retired(), 0);
        assert_eq!(column.get(1), Some(4.0));
    }
}
