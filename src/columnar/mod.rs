//! Columnar record store.
//!
//! Records are rows of a [`Schema`]. Each attribute is a [`DataType`] whose
//! values live in one column, and attributes can be registered at any time
//! while worker threads read and write cells.

pub mod buffer;
pub mod column;
pub mod data_type;
pub mod multi_file;
pub mod row;
pub mod schema;
pub mod storage;
pub mod types;

pub use buffer::{BoolBuffer, ColumnBuffer, Float32Buffer, Float64Buffer, Int32Buffer, ObjectBuffer, PrimitiveBuffer};
pub use column::{Column, ColumnEntry, ColumnHandle, ConcurrentColumn};
pub use data_type::{data_type_ref, variant_of, AnyDataType, AnyValue, DataType, DataTypeKey, DataTypeRef};
pub use multi_file::{FeatureSlots, MultiFileRow, MultiFileSchema};
pub use row::{Row, RowValues};
pub use schema::{Schema, SchemaExtension, SchemaListener, SchemaOptions, SchemaReadGuard, SchemaStats};
pub use storage::{RawBuffer, Storage, StorageBackend, StorageOptions};
pub use types::{BoolType, Float32Type, Float64Type, Int32Type, ObjectType};
