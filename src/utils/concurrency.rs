//! Stamped reader/writer lock.
//!
//! A version counter in front of a `parking_lot::RwLock`. The counter is
//! odd while a writer holds the lock, and every write acquisition bumps it
//! twice, so a reader that samples an even version before an unsynchronized
//! access and sees the same version afterwards knows no writer overlapped
//! with it. Readers only touch the `RwLock` when that validation fails.

use std::fmt;
use std::sync::atomic::{fence, AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Version observed by an optimistic reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp(u64);

/// A reader/writer lock with an optimistic, non-blocking read mode.
pub struct StampedLock {
    version: AtomicU64,
    lock: RwLock<()>,
}

impl StampedLock {
    /// Create an unlocked stamped lock.
    pub fn new() -> Self {
        StampedLock {
            version: AtomicU64::new(0),
            lock: RwLock::new(()),
        }
    }

    /// Start an optimistic read.
    ///
    /// Returns `None` while a writer holds the lock; the caller should go
    /// straight to [`read`](Self::read) in that case.
    #[inline]
    pub fn try_optimistic_read(&self) -> Option<Stamp> {
        let version = self.version.load(Ordering::Acquire);
        if version & 1 == 0 {
            Some(Stamp(version))
        } else {
            None
        }
    }

    /// Check that no writer acquired the lock since `stamp` was issued.
    ///
    /// The full fence orders every access made under the stamp, loads and
    /// stores alike, before the version check.
    #[inline]
    pub fn validate(&self, stamp: Stamp) -> bool {
        fence(Ordering::SeqCst);
        self.version.load(Ordering::Relaxed) == stamp.0
    }

    /// Acquire the lock in shared mode.
    ///
    /// Shared acquisitions may nest on one thread, even with a writer
    /// queued.
    #[inline]
    pub fn read(&self) -> StampedReadGuard<'_> {
        StampedReadGuard {
            _guard: self.lock.read_recursive(),
        }
    }

    /// Acquire the lock in exclusive mode.
    ///
    /// Every optimistic stamp issued before this call fails validation.
    pub fn write(&self) -> StampedWriteGuard<'_> {
        let guard = self.lock.write();
        self.version.fetch_add(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        StampedWriteGuard {
            version: &self.version,
            _guard: guard,
        }
    }

    /// Whether a writer currently holds the lock.
    #[inline]
    pub fn is_write_locked(&self) -> bool {
        self.version.load(Ordering::Acquire) & 1 == 1
    }

    /// Current version. Each completed write advances it by two.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

impl Default for StampedLock {
    fn default() -> Self {
        StampedLock::new()
    }
}

impl fmt::Debug for StampedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StampedLock")
            .field("version", &self.version())
            .finish()
    }
}

/// Shared guard returned by [`StampedLock::read`].
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct StampedReadGuard<'a> {
    _guard: RwLockReadGuard<'a, ()>,
}

/// Exclusive guard returned by [`StampedLock::write`].
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct StampedWriteGuard<'a> {
    version: &'a AtomicU64,
    _guard: RwLockWriteGuard<'a, ()>,
}

impl Drop for StampedWriteGuard<'_> {
    fn drop(&mut self) {
        // Publish the even version before the RwLock itself is released.
        self.version.fetch_add(1, Ordering::Release);
    }
}
