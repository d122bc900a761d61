//! Ready-made attribute kinds identified by name.
//!
//! Applications with a fixed attribute catalog usually declare one unit
//! struct per attribute and implement [`DataType`] for it. The types here
//! cover the other case, attributes that are only known at runtime, such as
//! user-defined annotations.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::columnar::buffer::{BoolBuffer, Float32Buffer, Float64Buffer, Int32Buffer, ObjectBuffer};
use crate::columnar::column::{Column, ConcurrentColumn};
use crate::columnar::data_type::{variant_of, DataType};
use crate::columnar::storage::StorageBackend;
use crate::error::Result;

macro_rules! primitive_type {
    ($(#[$meta:meta])* $name:ident, $value:ty, $buffer:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name {
            name: Arc<str>,
        }

        impl $name {
            /// Attribute called `name`.
            pub fn new(name: impl Into<Arc<str>>) -> Self {
                $name { name: name.into() }
            }
        }

        impl DataType for $name {
            type Value = $value;

            fn unique_id(&self) -> &str {
                &self.name
            }

            fn variant(&self) -> u64 {
                variant_of(&self.name)
            }

            fn create_column(
                &self,
                capacity: usize,
                storage: &Arc<dyn StorageBackend>,
            ) -> Result<Box<dyn Column<$value>>> {
                let buffer = <$buffer>::allocate(capacity, storage)?;
                Ok(Box::new(ConcurrentColumn::new(buffer)))
            }
        }
    };
}

primitive_type!(
    /// Nullable `f64` attribute. NaN reads back as unset.
    Float64Type,
    f64,
    Float64Buffer
);

primitive_type!(
    /// Nullable `f32` attribute. NaN reads back as unset.
    Float32Type,
    f32,
    Float32Buffer
);

primitive_type!(
    /// Nullable `i32` attribute.
    Int32Type,
    i32,
    Int32Buffer
);

primitive_type!(
    /// Nullable `bool` attribute.
    BoolType,
    bool,
    BoolBuffer
);

/// Attribute holding arbitrary values of type `T`.
pub struct ObjectType<T> {
    name: Arc<str>,
    _value: PhantomData<fn() -> T>,
}

impl<T> ObjectType<T> {
    /// Attribute called `name`.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        ObjectType {
            name: name.into(),
            _value: PhantomData,
        }
    }
}

impl<T> Clone for ObjectType<T> {
    fn clone(&self) -> Self {
        ObjectType {
            name: Arc::clone(&self.name),
            _value: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ObjectType<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectType").field(&self.name).finish()
    }
}

impl<T: Clone + Send + Sync + 'static> DataType for ObjectType<T> {
    type Value = T;

    fn unique_id(&self) -> &str {
        &self.name
    }

    fn variant(&self) -> u64 {
        variant_of(&self.name)
    }

    fn create_column(&self, capacity: usize, _storage: &Arc<dyn StorageBackend>) -> Result<Box<dyn Column<T>>> {
        Ok(Box::new(ConcurrentColumn::new(ObjectBuffer::new(capacity))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columnar::data_type::DataTypeKey;
    use crate::columnar::storage::Storage;

    fn heap() -> Arc<dyn StorageBackend> {
        Arc::new(Storage::heap())
    }

    #[test]
    fn names_tell_attributes_apart() {
        assert_eq!(
            DataTypeKey::of(&Float64Type::new("mz")),
            DataTypeKey::of(&Float64Type::new("mz"))
        );
        assert_ne!(
            DataTypeKey::of(&Float64Type::new("mz")),
            DataTypeKey::of(&Float64Type::new("rt"))
        );
        assert_ne!(
            DataTypeKey::of(&Float64Type::new("mz")),
            DataTypeKey::of(&Float32Type::new("mz"))
        );
    }

    #[test]
    fn primitive_columns_start_unset() {
        let column = Int32Type::new("charge").create_column(8, &heap()).unwrap();
        assert_eq!(column.capacity(), 8);
        assert_eq!(column.get(7), None);
        column.set(7, Some(2));
        assert_eq!(column.get(7), Some(2));

        let flags = BoolType::new("isotope").create_column(2, &heap()).unwrap();
        assert_eq!(flags.get(0), None);
    }

    #[test]
    fn object_columns_hold_any_clonable_value() {
        let comment = ObjectType::<Arc<str>>::new("comment");
        let column = comment.create_column(4, &heap()).unwrap();
        column.set(1, Some(Arc::from("adduct")));
        assert_eq!(column.get(1).as_deref(), Some("adduct"));
        assert_eq!(format!("{:?}", comment), "ObjectType(\"comment\")");
    }
}
