//! The schema: registered columns plus the shared row bookkeeping.
//!
//! A [`Schema`] owns every column of one logical table, the shared column
//! length all of them are at least as long as, and the row index
//! allocator. Structural changes (registering attributes, growing every
//! column) are serialized by one stamped lock; cell access never takes it.
//!
//! ```
//! use std::sync::Arc;
//! use rowbase::columnar::{Float64Type, Int32Type, Row, Schema, SchemaOptions};
//!
//! # fn main() -> rowbase::Result<()> {
//! let schema = Arc::new(Schema::with_options(SchemaOptions::new().initial_capacity(10))?);
//! let area = Float64Type::new("area");
//! let charge = Int32Type::new("charge");
//! schema.add_data_type(&area)?;
//! schema.add_data_type(&charge)?;
//!
//! let row = Row::new(&schema)?;
//! row.set(&area, 2.5)?;
//! row.set(&charge, 2)?;
//! assert_eq!(row.get(&area)?, Some(2.5));
//! assert_eq!(row.get(&charge)?, Some(2));
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::RwLock;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use rustc_hash::FxBuildHasher;

use crate::columnar::column::{ColumnEntry, ColumnHandle, ErasedColumn, TypedColumn};
use crate::columnar::data_type::{data_type_ref, AnyDataType, AnyValue, DataType, DataTypeKey, DataTypeRef};
use crate::columnar::storage::{Storage, StorageBackend, StorageOptions};
use crate::error::{Error, Result};
use crate::utils::concurrency::{StampedLock, StampedReadGuard};
use crate::utils::metrics::{self, Operation};

/// Default number of rows a new schema has room for.
pub const DEFAULT_INITIAL_CAPACITY: usize = 5000;

/// Default number of rows added per growth.
pub const DEFAULT_INCREMENT: usize = 5000;

/// Options for creating a schema.
#[derive(Debug, Clone)]
pub struct SchemaOptions {
    /// Rows every column has room for from the start
    pub initial_capacity: usize,

    /// Rows added to every column whenever the allocator runs out
    pub increment: usize,

    /// Whether columns are grown in parallel on the resize pool
    pub parallel_resize: bool,

    /// Where primitive column buffers live
    pub storage: StorageOptions,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        SchemaOptions {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            increment: DEFAULT_INCREMENT,
            parallel_resize: true,
            storage: StorageOptions::default(),
        }
    }
}

impl SchemaOptions {
    /// Create new options with default values.
    pub fn new() -> Self {
        SchemaOptions::default()
    }

    /// Set the initial capacity.
    pub fn initial_capacity(mut self, rows: usize) -> Self {
        self.initial_capacity = rows;
        self
    }

    /// Set the growth increment.
    pub fn increment(mut self, rows: usize) -> Self {
        self.increment = rows;
        self
    }

    /// Enable or disable parallel column growth.
    pub fn parallel_resize(mut self, parallel: bool) -> Self {
        self.parallel_resize = parallel;
        self
    }

    /// Set the storage options.
    pub fn storage(mut self, storage: StorageOptions) -> Self {
        self.storage = storage;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.increment == 0 {
            return Err(Error::InvalidArgument("Schema increment must be positive".to_string()));
        }
        Ok(())
    }
}

/// Receives attribute registrations.
///
/// Called synchronously, after the registration is committed and without
/// any schema lock held, so a listener may freely call back into the schema.
pub trait SchemaListener: Send + Sync {
    /// Attributes were added to or removed from the schema.
    fn on_schema_change(&self, added: &[DataTypeRef], removed: &[DataTypeRef]);
}

impl<F> SchemaListener for F
where
    F: Fn(&[DataTypeRef], &[DataTypeRef]) + Send + Sync,
{
    fn on_schema_change(&self, added: &[DataTypeRef], removed: &[DataTypeRef]) {
        self(added, removed)
    }
}

/// Extra per-row state kept in lock-step with the columns.
///
/// [`grow_to`](Self::grow_to) runs under the exclusive structural lock after
/// every column grew and before the new column length is published. A
/// failure aborts the growth.
pub trait SchemaExtension: Send + Sync + 'static {
    /// Make room for `rows` rows.
    fn grow_to(&self, rows: usize) -> Result<()>;

    /// Free buffers superseded by growth. Returns how many were freed.
    fn reclaim_retired(&mut self) -> usize {
        0
    }
}

impl SchemaExtension for () {
    fn grow_to(&self, _rows: usize) -> Result<()> {
        Ok(())
    }
}

/// Threads that grow columns in parallel.
///
/// Only column resize jobs run here. A schema caller blocked on the
/// structural lock never occupies one of these threads, so a growth waiting
/// on them always completes. `None` if the pool could not be started.
fn resize_pool() -> Option<&'static ThreadPool> {
    static POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();
    POOL.get_or_init(|| {
        match ThreadPoolBuilder::new()
            .thread_name(|i| format!("rowbase-resize-{}", i))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(err) => {
                log::warn!("parallel column growth disabled: {}", err);
                None
            }
        }
    })
    .as_ref()
}

/// Per-schema counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchemaStats {
    /// Rows every column has room for.
    pub column_length: usize,

    /// Row indices handed out so far.
    pub rows_issued: usize,

    /// Registered attributes.
    pub column_count: usize,

    /// Growth events.
    pub growths: u64,

    /// Attributes registered.
    pub registrations: u64,
}

/// Shared structural lock held by [`Schema::lock_read`].
///
/// While it is held no attribute can be registered and no column can grow.
/// Registering an attribute or growing the schema on the same thread while
/// holding it deadlocks, and so does allocating a row that needs growth.
pub struct SchemaReadGuard<'a> {
    _guard: StampedReadGuard<'a>,
}

/// Columns of one logical table.
///
/// `X` is an optional [`SchemaExtension`]; see
/// [`MultiFileSchema`](crate::columnar::MultiFileSchema).
pub struct Schema<X: SchemaExtension = ()> {
    columns: DashMap<DataTypeKey, ColumnEntry, FxBuildHasher>,
    structure: StampedLock,
    column_length: AtomicUsize,
    next_row: AtomicUsize,
    next_ordinal: AtomicU64,
    increment: usize,
    parallel_resize: bool,
    storage: Arc<dyn StorageBackend>,
    listeners: RwLock<Vec<Arc<dyn SchemaListener>>>,
    growths: AtomicU64,
    registrations: AtomicU64,
    extension: X,
}

impl Schema<()> {
    /// Create a heap-backed schema with default options.
    pub fn new() -> Self {
        let options = SchemaOptions::default();
        Schema::build(&options, Arc::new(Storage::heap()), ())
    }

    /// Create a schema.
    pub fn with_options(options: SchemaOptions) -> Result<Self> {
        Schema::with_extension(options, ())
    }

    /// Create a schema allocating primitive buffers from `storage`.
    /// `options.storage` is ignored.
    pub fn with_storage(options: SchemaOptions, storage: Arc<dyn StorageBackend>) -> Result<Self> {
        options.validate()?;
        Ok(Schema::build(&options, storage, ()))
    }
}

impl Default for Schema<()> {
    fn default() -> Self {
        Schema::new()
    }
}

impl<X: SchemaExtension> Schema<X> {
    /// Create a schema carrying `extension`.
    ///
    /// The extension is grown to the initial capacity before the schema is
    /// returned.
    pub fn with_extension(options: SchemaOptions, extension: X) -> Result<Self> {
        options.validate()?;
        let storage: Arc<dyn StorageBackend> = Arc::new(Storage::new(options.storage.clone())?);
        extension.grow_to(options.initial_capacity)?;
        Ok(Schema::build(&options, storage, extension))
    }

    fn build(options: &SchemaOptions, storage: Arc<dyn StorageBackend>, extension: X) -> Self {
        log::debug!(
            "creating schema with {} rows, increment {}",
            options.initial_capacity,
            options.increment
        );

        Schema {
            columns: DashMap::with_hasher(FxBuildHasher),
            structure: StampedLock::new(),
            column_length: AtomicUsize::new(options.initial_capacity),
            next_row: AtomicUsize::new(0),
            next_ordinal: AtomicU64::new(0),
            increment: options.increment,
            parallel_resize: options.parallel_resize,
            storage,
            listeners: RwLock::new(Vec::new()),
            growths: AtomicU64::new(0),
            registrations: AtomicU64::new(0),
            extension,
        }
    }

    /// Whether `data_type` is registered.
    #[inline]
    pub fn contains_data_type<D: DataType>(&self, data_type: &D) -> bool {
        self.columns
            .get(&DataTypeKey::of(data_type))
            .map_or(false, |entry| entry.column.name() == data_type.unique_id())
    }

    /// Whether an attribute with `key` and `name` is registered.
    ///
    /// A different attribute under the same key is an error rather than a
    /// match.
    fn registered(&self, key: &DataTypeKey, name: &str) -> Result<bool> {
        match self.columns.get(key) {
            Some(entry) if entry.column.name() == name => Ok(true),
            Some(entry) => Err(Error::InvalidArgument(format!(
                "Attribute {} has the same key as registered attribute {}",
                name,
                entry.column.name()
            ))),
            None => Ok(false),
        }
    }

    /// Register `data_type` unless it already is.
    ///
    /// Returns whether this call created the column. Listeners are told
    /// about the new attribute once the column is in place.
    pub fn add_data_type<D: DataType>(&self, data_type: &D) -> Result<bool> {
        let key = DataTypeKey::of(data_type);
        if self.registered(&key, data_type.unique_id())? {
            return Ok(false);
        }

        {
            let _guard = self.structure.write();
            if self.registered(&key, data_type.unique_id())? {
                return Ok(false);
            }

            let length = self.column_length.load(Ordering::Acquire);
            let entry = data_type.create_entry(length, &self.storage)?;
            self.commit(key, entry);
            log::debug!(
                "registered attribute {} with {} rows",
                data_type.unique_id(),
                length
            );
        }

        self.notify(&[data_type_ref(data_type)], &[]);
        Ok(true)
    }

    /// Register every data type not registered yet.
    ///
    /// Either all new columns are created or, when one fails to allocate,
    /// none is. Returns the newly registered data types in the order given;
    /// listeners get them in a single notification.
    pub fn add_data_types<I>(&self, data_types: I) -> Result<Vec<DataTypeRef>>
    where
        I: IntoIterator<Item = DataTypeRef>,
    {
        let mut pending: Vec<DataTypeRef> = Vec::new();
        for data_type in data_types {
            if !self.registered(&data_type.key(), data_type.name())? {
                pending.push(data_type);
            }
        }
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let added = {
            let _guard = self.structure.write();
            let length = self.column_length.load(Ordering::Acquire);

            let mut fresh: Vec<(DataTypeKey, ColumnEntry, DataTypeRef)> = Vec::with_capacity(pending.len());
            for data_type in pending {
                let key = data_type.key();
                if self.registered(&key, data_type.name())? {
                    continue;
                }
                if let Some((_, _, known)) = fresh.iter().find(|(k, _, _)| *k == key) {
                    if known.name() == data_type.name() {
                        continue;
                    }
                    return Err(Error::InvalidArgument(format!(
                        "Attribute {} has the same key as attribute {}",
                        data_type.name(),
                        known.name()
                    )));
                }
                let entry = data_type.create_entry(length, &self.storage)?;
                fresh.push((key, entry, data_type));
            }

            let mut added = Vec::with_capacity(fresh.len());
            for (key, entry, data_type) in fresh {
                self.commit(key, entry);
                log::debug!("registered attribute {} with {} rows", data_type.name(), length);
                added.push(data_type);
            }
            added
        };

        if !added.is_empty() {
            self.notify(&added, &[]);
        }
        Ok(added)
    }

    // Caller holds the structural write lock.
    fn commit(&self, key: DataTypeKey, mut entry: ColumnEntry) {
        entry.ordinal = self.next_ordinal.fetch_add(1, Ordering::Relaxed);
        self.columns.insert(key, entry);
        self.registrations.fetch_add(1, Ordering::Relaxed);
        metrics::record_operation(Operation::Registration);
    }

    fn notify(&self, added: &[DataTypeRef], removed: &[DataTypeRef]) {
        let listeners = self.listeners.read().clone();
        log::trace!(
            "notifying {} listeners: {} added, {} removed",
            listeners.len(),
            added.len(),
            removed.len()
        );
        for listener in listeners {
            listener.on_schema_change(added, removed);
        }
    }

    /// Hand out the next row index, growing every column first if the index
    /// would be out of bounds.
    ///
    /// An index is never handed out twice. If growth fails the index is
    /// consumed and the error returned.
    pub fn add_row_get_index(&self) -> Result<usize> {
        let index = self.next_row.fetch_add(1, Ordering::AcqRel);
        let length = self.column_length();
        if index >= length {
            let steps = (index - length) / self.increment + 1;
            let target = steps
                .checked_mul(self.increment)
                .and_then(|rows| rows.checked_add(length))
                .ok_or(Error::SizeExceedsSystemLimit)?;
            self.resize_columns_to(target)?;
        }
        Ok(index)
    }

    /// Grow every column, and the extension, to at least `final_size` rows.
    ///
    /// Returns whether this call grew the schema. The new column length is
    /// only published once everything grew, so a failed allocation leaves
    /// the schema as it was.
    pub fn resize_columns_to(&self, final_size: usize) -> Result<bool> {
        if self.column_length() >= final_size {
            return Ok(false);
        }

        let _guard = self.structure.write();
        let old_length = self.column_length.load(Ordering::Acquire);
        if old_length >= final_size {
            return Ok(false);
        }

        let columns: Vec<Arc<dyn ErasedColumn>> = self
            .columns
            .iter()
            .map(|entry| Arc::clone(&entry.value().column))
            .collect();

        metrics::measure_growth(|| {
            self.resize_all(&columns, final_size)?;
            self.extension.grow_to(final_size)
        })?;

        self.column_length.store(final_size, Ordering::Release);
        self.growths.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "schema grew from {} to {} rows across {} columns",
            old_length,
            final_size,
            columns.len()
        );
        Ok(true)
    }

    fn resize_all(&self, columns: &[Arc<dyn ErasedColumn>], size: usize) -> Result<()> {
        // A rayon worker waiting on another pool keeps stealing from its own,
        // where a job may block on the structural lock this thread holds.
        let pool = if self.parallel_resize && columns.len() > 1 && rayon::current_thread_index().is_none() {
            resize_pool()
        } else {
            None
        };

        match pool {
            Some(pool) => pool.install(|| {
                columns
                    .par_iter()
                    .try_for_each(|column| column.resize_to(size).map(|_| ()))
            }),
            None => {
                for column in columns {
                    column.resize_to(size)?;
                }
                Ok(())
            }
        }
    }

    #[inline]
    fn check_row(&self, index: usize) {
        debug_assert!(
            index < self.column_length.load(Ordering::Relaxed),
            "row index {} out of bounds for column length {}",
            index,
            self.column_length.load(Ordering::Relaxed)
        );
    }

    #[inline]
    fn with_column<D, R>(&self, data_type: &D, f: impl FnOnce(&TypedColumn<D>) -> R) -> Result<R>
    where
        D: DataType,
    {
        let entry = self
            .columns
            .get(&DataTypeKey::of(data_type))
            .filter(|entry| entry.column.name() == data_type.unique_id())
            .ok_or_else(|| Error::UnknownDataType(data_type.unique_id().to_string()))?;
        Ok(f(entry.typed::<D>()?))
    }

    /// Read a cell.
    ///
    /// Fails with [`Error::UnknownDataType`] if `data_type` is not
    /// registered.
    #[inline]
    pub fn get<D: DataType>(&self, index: usize, data_type: &D) -> Result<Option<D::Value>> {
        self.check_row(index);
        self.with_column(data_type, |typed| typed.column.get(index))
    }

    /// Overwrite a cell and return its previous value. Passing `None`
    /// clears the cell.
    ///
    /// The attribute must be registered first; cells never register their
    /// attribute implicitly.
    #[inline]
    pub fn set<D: DataType>(
        &self,
        index: usize,
        data_type: &D,
        value: impl Into<Option<D::Value>>,
    ) -> Result<Option<D::Value>> {
        self.check_row(index);
        let value = value.into();
        self.with_column(data_type, |typed| typed.column.set(index, value))
    }

    /// Read a cell, or `default` if the cell is unset or the attribute is not
    /// registered.
    ///
    /// Any other lookup failure, such as a column of another value type
    /// under the same key, is returned.
    pub fn get_or_default<D: DataType>(&self, index: usize, data_type: &D, default: D::Value) -> Result<D::Value> {
        match self.get(index, data_type) {
            Ok(value) => Ok(value.unwrap_or(default)),
            Err(Error::UnknownDataType(_)) => Ok(default),
            Err(err) => Err(err),
        }
    }

    /// Read a cell, computing a fallback if it is unset.
    ///
    /// Unlike [`get_or_default`](Self::get_or_default) an unregistered
    /// attribute is an error.
    pub fn get_non_null_else<D, F>(&self, index: usize, data_type: &D, fallback: F) -> Result<D::Value>
    where
        D: DataType,
        F: FnOnce() -> D::Value,
    {
        Ok(self.get(index, data_type)?.unwrap_or_else(fallback))
    }

    pub(crate) fn set_any(&self, index: usize, data_type: &DataTypeRef, value: Option<AnyValue>) -> Result<Option<AnyValue>> {
        self.check_row(index);
        let entry = self
            .columns
            .get(&data_type.key())
            .filter(|entry| entry.column.name() == data_type.name())
            .ok_or_else(|| Error::UnknownDataType(data_type.name().to_string()))?;
        entry.column.set_any(index, value)
    }

    /// Typed handle on the column of `data_type`.
    pub fn column<D: DataType>(&self, data_type: &D) -> Result<ColumnHandle<D>> {
        let entry = self
            .columns
            .get(&DataTypeKey::of(data_type))
            .filter(|entry| entry.column.name() == data_type.unique_id())
            .ok_or_else(|| Error::UnknownDataType(data_type.unique_id().to_string()))?;
        ColumnHandle::from_entry(entry.value())
    }

    /// Hold off structural changes while reading several columns.
    pub fn lock_read(&self) -> SchemaReadGuard<'_> {
        SchemaReadGuard {
            _guard: self.structure.read(),
        }
    }

    fn ordered_columns(&self) -> Vec<(u64, Arc<dyn ErasedColumn>)> {
        let mut columns: Vec<_> = self
            .columns
            .iter()
            .map(|entry| (entry.value().ordinal, Arc::clone(&entry.value().column)))
            .collect();
        columns.sort_unstable_by_key(|(ordinal, _)| *ordinal);
        columns
    }

    /// Non-empty cells of row `index` in registration order.
    ///
    /// The set of columns is fixed when this is called; values are read as
    /// the iterator advances.
    pub fn stream_row(&self, index: usize) -> impl Iterator<Item = (DataTypeRef, AnyValue)> {
        self.check_row(index);
        let columns = {
            let _guard = self.lock_read();
            self.ordered_columns()
        };
        columns
            .into_iter()
            .filter_map(move |(_, column)| column.get_any(index).map(|value| (column.data_type(), value)))
    }

    /// Registered data types in registration order.
    pub fn data_types(&self) -> Vec<DataTypeRef> {
        self.ordered_columns()
            .into_iter()
            .map(|(_, column)| column.data_type())
            .collect()
    }

    /// Number of registered attributes.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Number of row indices handed out.
    pub fn row_count(&self) -> usize {
        self.next_row.load(Ordering::Acquire)
    }

    /// Rows every column has room for.
    pub fn column_length(&self) -> usize {
        if let Some(stamp) = self.structure.try_optimistic_read() {
            let length = self.column_length.load(Ordering::Acquire);
            if self.structure.validate(stamp) {
                return length;
            }
        }

        let _guard = self.structure.read();
        self.column_length.load(Ordering::Acquire)
    }

    /// Rows added per growth.
    pub fn increment(&self) -> usize {
        self.increment
    }

    /// Backend primitive columns allocate from.
    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// The schema extension.
    pub fn extension(&self) -> &X {
        &self.extension
    }

    /// Snapshot of this schema's counters.
    pub fn stats(&self) -> SchemaStats {
        SchemaStats {
            column_length: self.column_length(),
            rows_issued: self.row_count(),
            column_count: self.column_count(),
            growths: self.growths.load(Ordering::Relaxed),
            registrations: self.registrations.load(Ordering::Relaxed),
        }
    }

    /// Free the buffers every column and the extension retired while
    /// growing. Returns how many were freed.
    ///
    /// Columns with a live [`ColumnHandle`] are skipped; their buffers are
    /// freed by a later call once the handles are gone.
    pub fn reclaim_retired(&mut self) -> usize {
        let mut freed = 0;
        let mut skipped = 0;
        for mut entry in self.columns.iter_mut() {
            match Arc::get_mut(&mut entry.value_mut().column) {
                Some(column) => freed += column.reclaim_retired(),
                None => skipped += 1,
            }
        }
        freed += self.extension.reclaim_retired();

        log::debug!(
            "reclaimed {} retired buffers, {} columns still shared",
            freed,
            skipped
        );
        freed
    }

    /// Subscribe to attribute registrations.
    pub fn add_listener(&self, listener: Arc<dyn SchemaListener>) {
        self.listeners.write().push(listener);
    }

    /// Unsubscribe a listener added with [`add_listener`](Self::add_listener).
    ///
    /// Returns whether it was subscribed.
    pub fn remove_listener(&self, listener: &Arc<dyn SchemaListener>) -> bool {
        let mut listeners = self.listeners.write();
        let target = Arc::as_ptr(listener) as *const ();
        match listeners.iter().position(|l| Arc::as_ptr(l) as *const () == target) {
            Some(position) => {
                listeners.remove(position);
                true
            }
            None => {
                log::warn!("removing a schema listener that was never added");
                false
            }
        }
    }
}

impl<X: SchemaExtension> fmt::Debug for Schema<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("data_types", &self.data_types())
            .field("column_length", &self.column_length())
            .field("rows", &self.row_count())
            .field("increment", &self.increment)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columnar::column::Column;
    use crate::columnar::types::{Float64Type, Int32Type, ObjectType};
    use parking_lot::Mutex;

    fn small(capacity: usize, increment: usize) -> Schema {
        Schema::with_options(
            SchemaOptions::new()
                .initial_capacity(capacity)
                .increment(increment),
        )
        .unwrap()
    }

    #[test]
    fn zero_increment_is_rejected() {
        let err = Schema::with_options(SchemaOptions::new().increment(0)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn unknown_attributes_fail_fast() {
        let schema = small(4, 4);
        let height = Float64Type::new("height");
        let err = schema.set(0, &height, 1.0).unwrap_err();
        assert!(matches!(err, Error::UnknownDataType(ref name) if name == "height"));
        assert!(schema.get(0, &height).is_err());
        assert!(schema.column(&height).is_err());
        assert_eq!(schema.get_or_default(0, &height, 3.0).unwrap(), 3.0);
        assert!(schema.get_non_null_else(0, &height, || 3.0).is_err());
    }

    #[test]
    fn registration_is_idempotent() {
        let schema = small(4, 4);
        let mz = Float64Type::new("mz");
        assert!(schema.add_data_type(&mz).unwrap());
        assert!(!schema.add_data_type(&mz).unwrap());
        assert!(schema.contains_data_type(&mz));
        assert_eq!(schema.column_count(), 1);
        assert_eq!(schema.stats().registrations, 1);
    }

    #[test]
    fn batch_registration_skips_known_and_duplicate_types() {
        let schema = small(4, 4);
        let mz = Float64Type::new("mz");
        schema.add_data_type(&mz).unwrap();

        let added = schema
            .add_data_types(vec![
                data_type_ref(&mz),
                data_type_ref(&Int32Type::new("charge")),
                data_type_ref(&Int32Type::new("charge")),
                data_type_ref(&ObjectType::<String>::new("comment")),
            ])
            .unwrap();

        let names: Vec<_> = added.iter().map(|d| d.name().to_string()).collect();
        assert_eq!(names, vec!["charge", "comment"]);
        let order: Vec<_> = schema.data_types().iter().map(|d| d.name().to_string()).collect();
        assert_eq!(order, vec!["mz", "charge", "comment"]);
    }

    #[test]
    fn allocation_grows_by_increment() {
        let schema = small(2, 3);
        let indices: Vec<_> = (0..3).map(|_| schema.add_row_get_index().unwrap()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(schema.column_length(), 5);
        assert_eq!(schema.stats().growths, 1);
    }

    #[test]
    fn resize_is_a_no_op_when_large_enough() {
        let schema = small(10, 10);
        assert!(!schema.resize_columns_to(10).unwrap());
        assert!(schema.resize_columns_to(11).unwrap());
        assert_eq!(schema.column_length(), 11);
    }

    #[test]
    fn new_columns_cover_the_current_length() {
        let schema = small(2, 2);
        for _ in 0..7 {
            schema.add_row_get_index().unwrap();
        }
        let charge = Int32Type::new("charge");
        schema.add_data_type(&charge).unwrap();
        assert!(schema.column(&charge).unwrap().column().capacity() >= schema.column_length());
        schema.set(6, &charge, 1).unwrap();
        assert_eq!(schema.get(6, &charge).unwrap(), Some(1));
    }

    #[test]
    fn set_returns_previous_and_none_clears() {
        let schema = small(4, 4);
        let label = ObjectType::<String>::new("label");
        schema.add_data_type(&label).unwrap();
        assert_eq!(schema.set(1, &label, "a".to_string()).unwrap(), None);
        assert_eq!(schema.set(1, &label, "b".to_string()).unwrap().as_deref(), Some("a"));
        assert_eq!(schema.set(1, &label, None).unwrap().as_deref(), Some("b"));
        assert_eq!(schema.get_non_null_else(1, &label, || "none".to_string()).unwrap(), "none");
    }

    #[test]
    fn listeners_hear_each_registration_once() {
        let schema = small(4, 4);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Arc<dyn SchemaListener> = Arc::new(move |added: &[DataTypeRef], _: &[DataTypeRef]| {
            sink.lock().extend(added.iter().map(|d| d.name().to_string()));
        });
        schema.add_listener(Arc::clone(&listener));

        let rt = Float64Type::new("rt");
        schema.add_data_type(&rt).unwrap();
        schema.add_data_type(&rt).unwrap();
        assert_eq!(*seen.lock(), vec!["rt"]);

        assert!(schema.remove_listener(&listener));
        assert!(!schema.remove_listener(&listener));
        schema.add_data_type(&Float64Type::new("intensity")).unwrap();
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn stream_row_yields_set_cells_in_registration_order() {
        let schema = small(4, 4);
        let mz = Float64Type::new("mz");
        let charge = Int32Type::new("charge");
        let note = ObjectType::<String>::new("note");
        schema.add_data_type(&mz).unwrap();
        schema.add_data_type(&charge).unwrap();
        schema.add_data_type(&note).unwrap();
        schema.set(2, &note, "x".to_string()).unwrap();
        schema.set(2, &mz, 301.5).unwrap();

        let cells: Vec<_> = schema.stream_row(2).collect();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].0.name(), "mz");
        assert_eq!(cells[0].1.downcast_ref::<f64>(), Some(&301.5));
        assert_eq!(cells[1].1.downcast_ref::<String>().map(String::as_str), Some("x"));
        assert_eq!(schema.stream_row(3).count(), 0);
    }

    #[test]
    fn failing_extension_aborts_growth() {
        struct Refuse;

        impl SchemaExtension for Refuse {
            fn grow_to(&self, rows: usize) -> Result<()> {
                if rows > 4 {
                    Err(Error::SizeExceedsSystemLimit)
                } else {
                    Ok(())
                }
            }
        }

        let schema = Schema::with_extension(SchemaOptions::new().initial_capacity(4).increment(4), Refuse).unwrap();
        assert!(schema.resize_columns_to(8).is_err());
        assert_eq!(schema.column_length(), 4);
    }

    // Every instance reports the same variant, as two names whose hashes
    // collide would.
    #[derive(Debug, Clone)]
    struct Colliding(&'static str);

    impl DataType for Colliding {
        type Value = f64;

        fn unique_id(&self) -> &str {
            self.0
        }

        fn variant(&self) -> u64 {
            7
        }
    }

    #[test]
    fn attributes_sharing_a_key_stay_apart() {
        let schema = small(4, 4);
        let area = Colliding("area");
        let height = Colliding("height");
        assert!(schema.add_data_type(&area).unwrap());

        let err = schema.add_data_type(&height).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(schema.add_data_types(vec![data_type_ref(&height)]).is_err());
        assert!(!schema.contains_data_type(&height));
        assert_eq!(schema.column_count(), 1);

        schema.set(0, &area, 2.0).unwrap();
        assert!(matches!(schema.get(0, &height), Err(Error::UnknownDataType(_))));
        assert!(matches!(schema.set(0, &height, 1.0), Err(Error::UnknownDataType(_))));
        assert!(schema.column(&height).is_err());
        assert_eq!(schema.get_or_default(0, &height, -1.0).unwrap(), -1.0);
        assert_eq!(schema.get(0, &area).unwrap(), Some(2.0));
    }

    #[test]
    fn batch_with_two_attributes_on_one_key_registers_neither() {
        let schema = small(4, 4);
        let result = schema.add_data_types(vec![data_type_ref(&Colliding("a")), data_type_ref(&Colliding("b"))]);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(schema.column_count(), 0);
    }

    #[test]
    fn get_or_default_only_covers_missing_cells_and_attributes() {
        let schema = small(4, 4);
        let charge = Int32Type::new("charge");
        assert_eq!(schema.get_or_default(1, &charge, 9).unwrap(), 9);
        schema.add_data_type(&charge).unwrap();
        assert_eq!(schema.get_or_default(1, &charge, 9).unwrap(), 9);
        schema.set(1, &charge, 3).unwrap();
        assert_eq!(schema.get_or_default(1, &charge, 9).unwrap(), 3);
    }

    #[test]
    fn reclaim_frees_buffers_retired_by_growth() {
        let mut schema = small(2, 2);
        let mz = Float64Type::new("mz");
        let note = ObjectType::<String>::new("note");
        schema.add_data_type(&mz).unwrap();
        schema.add_data_type(&note).unwrap();
        schema.set(1, &mz, 1.5).unwrap();
        schema.set(1, &note, "kept".to_string()).unwrap();

        assert!(schema.resize_columns_to(3).unwrap());
        assert!(schema.resize_columns_to(9).unwrap());
        assert_eq!(schema.reclaim_retired(), 4);
        assert_eq!(schema.reclaim_retired(), 0);
        assert_eq!(schema.get(1, &mz).unwrap(), Some(1.5));
        assert_eq!(schema.get(1, &note).unwrap().as_deref(), Some("kept"));
    }

    #[test]
    fn reclaim_skips_columns_with_live_handles() {
        let mut schema = small(2, 2);
        let mz = Float64Type::new("mz");
        let rt = Float64Type::new("rt");
        schema.add_data_type(&mz).unwrap();
        schema.add_data_type(&rt).unwrap();
        let handle = schema.column(&mz).unwrap();
        schema.resize_columns_to(5).unwrap();

        assert_eq!(schema.reclaim_retired(), 1);
        drop(handle);
        assert_eq!(schema.reclaim_retired(), 1);
    }
}
