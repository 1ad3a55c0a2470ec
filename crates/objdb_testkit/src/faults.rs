//! Storage that fails on demand.
//!
//! [`FailingBackend`] wraps an in-memory buffer and rejects appends or
//! syncs while a switch is on. Clones share both the buffer and the
//! switches, so a test can hand one clone to the store and keep another
//! to flip failures on and off, then reopen from the surviving bytes.
//!
//! ## Usage
//!
//! ```rust
//! use objdb_testkit::prelude::*;
//!
//! let backend = FailingBackend::new();
//! let test_db = TestDatabase::on_backend(&backend);
//! backend.set_fail_appends(true);
//! let result = test_db.transaction(|tx| tx.store(&Person::named("lost", 1)));
//! assert!(result.is_err());
//! ```

use objdb_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Switches {
    fail_appends: AtomicBool,
    fail_sync: AtomicBool,
    failures: AtomicUsize,
}

/// An in-memory backend whose writes can be made to fail.
#[derive(Debug, Default, Clone)]
pub struct FailingBackend {
    inner: InMemoryBackend,
    switches: Arc<Switches>,
}

impl FailingBackend {
    /// Creates an empty backend with every failure switched off.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following append fail until switched off.
    pub fn set_fail_appends(&self, fail: bool) {
        self.switches.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Makes every following flush and sync fail until switched off.
    pub fn set_fail_sync(&self, fail: bool) {
        self.switches.fail_sync.store(fail, Ordering::SeqCst);
    }

    /// Number of operations rejected so far.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.switches.failures.load(Ordering::SeqCst)
    }

    /// The buffer underneath, sharing the bytes written so far.
    #[must_use]
    pub fn memory(&self) -> InMemoryBackend {
        self.inner.clone()
    }

    fn reject(&self, what: &str) -> StorageError {
        self.switches.failures.fetch_add(1, Ordering::SeqCst);
        StorageError::Io(std::io::Error::other(format!("simulated {what} failure")))
    }
}

impl StorageBackend for FailingBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.switches.fail_appends.load(Ordering::SeqCst) {
            return Err(self.reject("append"));
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.switches.fail_sync.load(Ordering::SeqCst) {
            return Err(self.reject("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.switches.fail_sync.load(Ordering::SeqCst) {
            return Err(self.reject("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}
