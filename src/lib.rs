//! # Rowbase
//!
//! `rowbase` is a concurrent columnar record store. Rows are allocated from a
//! shared [`Schema`](columnar::Schema), attributes can be registered while
//! worker threads are reading and writing cells, and the hot per-cell path
//! never blocks unless a column is growing at that very moment.
//!
//! ## Features
//!
//! - Open schema: typed attributes are added at runtime
//! - Optimistic, validated cell access on top of a stamped lock
//! - Amortized row allocation with parallel column growth
//! - NaN as the unset marker for float columns, no validity bitmaps
//! - Optional memory-mapped storage for large numeric columns
//! - Per-source object slots for multi-file feature tables
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use rowbase::columnar::{Float64Type, Row, Schema, SchemaOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = Arc::new(Schema::with_options(SchemaOptions::new().initial_capacity(5000))?);
//! let mz = Float64Type::new("mz");
//! schema.add_data_type(&mz)?;
//!
//! let row = Row::new(&schema)?;
//! row.set(&mz, 524.26)?;
//! assert_eq!(row.get(&mz)?, Some(524.26));
//! # Ok(())
//! # }
//! ```

pub mod columnar;
pub mod error;
pub mod mmap;
pub mod platform;
pub mod utils;

pub use columnar::{DataType, Row, Schema, SchemaOptions, StorageOptions};
pub use error::{Error, Result};
pub use mmap::{MmapMut, MmapOptions, MmapRaw};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
