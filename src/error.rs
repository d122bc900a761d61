//! Error handling for the record store.

use std::io;
use std::result;

use thiserror::Error;

/// A specialized `Result` type for record store operations.
pub type Result<T> = result::Result<T, Error>;

/// Errors that can occur while growing or accessing a record store.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The memory map size is zero.
    #[error("Memory map size cannot be zero")]
    ZeroSizedMapping,

    /// The requested buffer size exceeds system limits.
    #[error("Requested buffer size exceeds system limits")]
    SizeExceedsSystemLimit,

    /// Invalid argument provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Platform-specific error with error code.
    #[error("Platform-specific error code: {0}")]
    PlatformError(i32),

    /// A cell was accessed for an attribute that was never registered.
    #[error("Data type {0} is not registered in this schema")]
    UnknownDataType(String),

    /// The column registered for an attribute holds a different value type.
    #[error("Column for data type {data_type} does not hold values of type {expected}")]
    TypeMismatch {
        /// Unique id of the offending data type.
        data_type: String,
        /// Name of the value type the caller asked for.
        expected: &'static str,
    },
}

impl Error {
    pub(crate) fn type_mismatch<T>(data_type: &str) -> Self {
        Error::TypeMismatch {
            data_type: data_type.to_string(),
            expected: std::any::type_name::<T>(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert() {
        let err: Error = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn type_mismatch_names_expected_type() {
        let err = Error::type_mismatch::<f64>("height");
        assert_eq!(
            err.to_string(),
            "Column for data type height does not hold values of type f64"
        );
    }
}
