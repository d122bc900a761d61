//! Row handles.

use std::fmt;
use std::sync::Arc;

use crate::columnar::data_type::{data_type_ref, AnyValue, DataType, DataTypeKey, DataTypeRef};
use crate::columnar::schema::{Schema, SchemaExtension};
use crate::error::{Error, Result};

/// A record: a schema plus one row index.
///
/// Creating a row allocates its index, which is never reused. Dropping a
/// row does not free anything; the cells stay in the schema.
pub struct Row<X: SchemaExtension = ()> {
    schema: Arc<Schema<X>>,
    index: usize,
}

impl<X: SchemaExtension> Row<X> {
    /// Allocate a new row in `schema`.
    pub fn new(schema: &Arc<Schema<X>>) -> Result<Self> {
        let index = schema.add_row_get_index()?;
        Ok(Row {
            schema: Arc::clone(schema),
            index,
        })
    }

    /// Handle on a row that was already allocated.
    pub fn from_index(schema: &Arc<Schema<X>>, index: usize) -> Result<Self> {
        if index >= schema.row_count() {
            return Err(Error::InvalidArgument(format!(
                "Row {} has not been allocated, {} rows exist",
                index,
                schema.row_count()
            )));
        }
        Ok(Row {
            schema: Arc::clone(schema),
            index,
        })
    }

    /// The row index.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The schema this row belongs to.
    #[inline]
    pub fn schema(&self) -> &Arc<Schema<X>> {
        &self.schema
    }

    /// Read a cell.
    #[inline]
    pub fn get<D: DataType>(&self, data_type: &D) -> Result<Option<D::Value>> {
        self.schema.get(self.index, data_type)
    }

    /// Overwrite a cell, returning its previous value.
    #[inline]
    pub fn set<D: DataType>(&self, data_type: &D, value: impl Into<Option<D::Value>>) -> Result<Option<D::Value>> {
        self.schema.set(self.index, data_type, value)
    }

    /// Read a cell, or `default` if it is unset or the attribute is unknown.
    pub fn get_or_default<D: DataType>(&self, data_type: &D, default: D::Value) -> Result<D::Value> {
        self.schema.get_or_default(self.index, data_type, default)
    }

    /// Read a cell, computing a fallback if it is unset.
    pub fn get_non_null_else<D, F>(&self, data_type: &D, fallback: F) -> Result<D::Value>
    where
        D: DataType,
        F: FnOnce() -> D::Value,
    {
        self.schema.get_non_null_else(self.index, data_type, fallback)
    }

    /// Clear a cell, returning its previous value. The attribute stays
    /// registered.
    pub fn remove<D: DataType>(&self, data_type: &D) -> Result<Option<D::Value>> {
        self.schema.set(self.index, data_type, None)
    }

    /// Whether the cell of `data_type` holds a value.
    pub fn contains<D: DataType>(&self, data_type: &D) -> bool {
        matches!(self.schema.get(self.index, data_type), Ok(Some(_)))
    }

    /// This row's non-empty cells in registration order.
    ///
    /// Every call starts over from the current schema.
    pub fn stream(&self) -> impl Iterator<Item = (DataTypeRef, AnyValue)> {
        self.schema.stream_row(self.index)
    }

    /// Write several cells, registering unknown attributes first.
    pub fn put_all(&self, values: RowValues) -> Result<()> {
        self.schema
            .add_data_types(values.values.iter().map(|(data_type, _)| Arc::clone(data_type)))?;
        for (data_type, value) in values.values {
            self.schema.set_any(self.index, &data_type, value)?;
        }
        Ok(())
    }
}

impl<X: SchemaExtension> Clone for Row<X> {
    fn clone(&self) -> Self {
        Row {
            schema: Arc::clone(&self.schema),
            index: self.index,
        }
    }
}

impl<X: SchemaExtension> PartialEq for Row<X> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.schema, &other.schema) && self.index == other.index
    }
}

impl<X: SchemaExtension> Eq for Row<X> {}

impl<X: SchemaExtension> fmt::Debug for Row<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Row").field("index", &self.index).finish()
    }
}

/// Cell values for [`Row::put_all`], keyed by attribute.
///
/// Adding the same attribute twice keeps the last value.
#[derive(Default)]
pub struct RowValues {
    values: Vec<(DataTypeRef, Option<AnyValue>)>,
}

impl RowValues {
    /// Create an empty set of values.
    pub fn new() -> Self {
        RowValues::default()
    }

    /// Add a value, builder style.
    pub fn with<D: DataType>(mut self, data_type: &D, value: impl Into<Option<D::Value>>) -> Self {
        self.insert(data_type, value);
        self
    }

    /// Add a value. `None` clears the cell when written.
    pub fn insert<D: DataType>(&mut self, data_type: &D, value: impl Into<Option<D::Value>>) {
        let value = value.into().map(|v| Box::new(v) as AnyValue);
        let key = DataTypeKey::of(data_type);
        match self.values.iter_mut().find(|(existing, _)| existing.key() == key) {
            Some(slot) => slot.1 = value,
            None => self.values.push((data_type_ref(data_type), value)),
        }
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no value was added.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Attributes in insertion order.
    pub fn data_types(&self) -> impl Iterator<Item = &DataTypeRef> {
        self.values.iter().map(|(data_type, _)| data_type)
    }
}

impl fmt::Debug for RowValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.data_types()).finish()
    }
}
