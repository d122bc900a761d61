//! Shared building blocks: alignment helpers, the stamped lock and
//! process-wide store counters.

pub mod alignment;
pub mod concurrency;
pub mod metrics;

pub use alignment::{align_up, page_size};
pub use concurrency::{Stamp, StampedLock, StampedReadGuard, StampedWriteGuard};
pub use metrics::{get_stats, record_operation, Operation, StoreStats};
