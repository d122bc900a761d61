//! Attribute keys.
//!
//! A [`DataType`] names one attribute and the Rust type of its values, and
//! knows how to build the column that stores it. The schema keys its
//! registry by [`DataTypeKey`], which is derived from the implementing type
//! plus an optional variant, so two values of the same unit struct are the
//! same attribute while parameterized types can still tell instances apart.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;

use crate::columnar::buffer::ObjectBuffer;
use crate::columnar::column::{Column, ColumnEntry, ConcurrentColumn};
use crate::columnar::storage::StorageBackend;
use crate::error::Result;

/// A cell value with its type erased.
pub type AnyValue = Box<dyn Any + Send + Sync>;

/// Shared, type-erased data type.
pub type DataTypeRef = Arc<dyn AnyDataType>;

/// Identity and column factory of one attribute.
///
/// The default factory keeps values in per-cell locked heap slots. Numeric
/// attributes usually override [`create_column`](Self::create_column) to use
/// one of the primitive buffers instead.
///
/// ```
/// use rowbase::columnar::DataType;
///
/// #[derive(Debug, Clone)]
/// struct Charge;
///
/// impl DataType for Charge {
///     type Value = i64;
///
///     fn unique_id(&self) -> &str {
///         "charge"
///     }
/// }
/// ```
pub trait DataType: Clone + Send + Sync + fmt::Debug + 'static {
    /// Rust type of the attribute's values.
    type Value: Clone + Send + Sync + 'static;

    /// Stable, human readable identifier.
    fn unique_id(&self) -> &str;

    /// Distinguishes instances of one implementing type. Unit structs keep
    /// the default.
    ///
    /// Instances with equal variants but different [`unique_id`](Self::unique_id)s
    /// cannot both be registered in one schema.
    fn variant(&self) -> u64 {
        0
    }

    /// Build the column for this attribute with room for `capacity` rows.
    fn create_column(
        &self,
        capacity: usize,
        storage: &Arc<dyn StorageBackend>,
    ) -> Result<Box<dyn Column<Self::Value>>> {
        let _ = storage;
        Ok(Box::new(ConcurrentColumn::new(ObjectBuffer::new(capacity))))
    }
}

/// Registry key of a data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataTypeKey {
    type_id: TypeId,
    variant: u64,
}

impl DataTypeKey {
    /// Key of `data_type`.
    #[inline]
    pub fn of<D: DataType>(data_type: &D) -> Self {
        DataTypeKey {
            type_id: TypeId::of::<D>(),
            variant: data_type.variant(),
        }
    }
}

/// Object-safe view of a [`DataType`]. Implemented for every data type.
pub trait AnyDataType: Send + Sync + 'static {
    /// Registry key.
    fn key(&self) -> DataTypeKey;

    /// The data type's unique id.
    fn name(&self) -> &str;

    /// Name of the value type, for diagnostics.
    fn value_type_name(&self) -> &'static str;

    /// Build the registry entry holding this data type's column.
    fn create_entry(&self, capacity: usize, storage: &Arc<dyn StorageBackend>) -> Result<ColumnEntry>;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
}

impl<D: DataType> AnyDataType for D {
    fn key(&self) -> DataTypeKey {
        DataTypeKey::of(self)
    }

    fn name(&self) -> &str {
        self.unique_id()
    }

    fn value_type_name(&self) -> &'static str {
        std::any::type_name::<D::Value>()
    }

    fn create_entry(&self, capacity: usize, storage: &Arc<dyn StorageBackend>) -> Result<ColumnEntry> {
        let column = self.create_column(capacity, storage)?;
        Ok(ColumnEntry::new(Arc::new(self.clone()), column))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn AnyDataType {
    /// Whether this is the data type `other`.
    pub fn is<D: DataType>(&self, other: &D) -> bool {
        self.key() == DataTypeKey::of(other)
    }

    /// Downcast to a concrete data type.
    pub fn downcast_ref<D: DataType>(&self) -> Option<&D> {
        self.as_any().downcast_ref::<D>()
    }
}

impl fmt::Debug for dyn AnyDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.value_type_name())
    }
}

/// Wrap a data type for the type-erased schema APIs.
pub fn data_type_ref<D: DataType>(data_type: &D) -> DataTypeRef {
    Arc::new(data_type.clone())
}

/// Stable variant number for a data type parameterized by a name.
pub fn variant_of(name: &str) -> u64 {
    let mut hasher = FxHasher::default();
    name.hash(&mut hasher);
    hasher.finish()
}
