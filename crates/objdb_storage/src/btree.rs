//! Ordered key-value store backed by a copy-on-write `BTreeMap`.

use crate::backend::StorageBackend;
use crate::commit_log::{CommitLog, LogOp};
use crate::config::StoreConfig;
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::kv::{KeyValue, KeyValueDb, KeyValueTransaction};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Committed state shared by read transactions.
#[derive(Debug, Clone, Default)]
struct Snapshot {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    commit_ulong: u64,
    transaction_number: u64,
}

impl Snapshot {
    fn prefix_iter<'a>(
        &'a self,
        prefix: &'a [u8],
    ) -> impl Iterator<Item = (&'a Vec<u8>, &'a Vec<u8>)> + 'a {
        self.entries
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(key, _)| key.starts_with(prefix))
    }

    fn count_prefix(&self, prefix: &[u8]) -> usize {
        self.prefix_iter(prefix).count()
    }

    fn entry_at(&self, prefix: &[u8], index: usize) -> Option<KeyValue> {
        self.prefix_iter(prefix)
            .nth(index)
            .map(|(k, v)| (k.clone(), v.clone()))
    }

    fn next_entry(&self, prefix: &[u8], after: Option<&[u8]>) -> Option<KeyValue> {
        let lower = match after {
            Some(after) if after >= prefix => Bound::Excluded(after),
            _ => Bound::Included(prefix),
        };
        self.entries
            .range::<[u8], _>((lower, Bound::Unbounded))
            .next()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
    }
}

struct Shared {
    committed: RwLock<Arc<Snapshot>>,
    writer_active: Mutex<bool>,
    writer_released: Condvar,
    log: Mutex<Option<CommitLog>>,
}

impl Shared {
    fn release_writer(&self) {
        let mut active = self.writer_active.lock();
        *active = false;
        self.writer_released.notify_one();
    }

    fn publish(&self, mut snapshot: Snapshot, ops: Vec<LogOp>) -> StorageResult<()> {
        if !ops.is_empty() {
            if let Some(log) = self.log.lock().as_mut() {
                log.append(&ops)?;
            }
        }
        let mut committed = self.committed.write();
        snapshot.transaction_number = committed.transaction_number + 1;
        trace!(
            transaction = snapshot.transaction_number,
            ops = ops.len(),
            "write transaction committed"
        );
        *committed = Arc::new(snapshot);
        Ok(())
    }
}

/// In-process ordered key-value database.
///
/// Reads run against immutable snapshots. The single writer works on a
/// private copy of the committed map and swaps it in on commit. When opened
/// over a [`StorageBackend`], every commit is appended to a commit log first
/// and the log is replayed on the next open.
///
/// Cloning the handle shares the same database.
///
/// # Example
///
/// ```rust
/// use objdb_storage::{BTreeKeyValueDb, KeyValueDb};
///
/// let db = BTreeKeyValueDb::in_memory();
/// let mut tx = db.begin_write().unwrap();
/// tx.create_or_update(b"key", b"value").unwrap();
/// tx.commit().unwrap();
///
/// let tx = db.begin_read().unwrap();
/// assert_eq!(tx.get(b"key").unwrap(), Some(b"value".to_vec()));
/// ```
#[derive(Clone)]
pub struct BTreeKeyValueDb {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for BTreeKeyValueDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let committed = self.shared.committed.read();
        f.debug_struct("BTreeKeyValueDb")
            .field("keys", &committed.entries.len())
            .field("transaction_number", &committed.transaction_number)
            .finish()
    }
}

impl BTreeKeyValueDb {
    /// Creates an empty database that keeps nothing beyond process lifetime.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_parts(Snapshot::default(), None)
    }

    /// Opens a database persisted through `backend`, replaying its commit log.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or a complete frame
    /// holds operations that cannot be decoded.
    pub fn open(backend: Box<dyn StorageBackend>, config: &StoreConfig) -> StorageResult<Self> {
        let (log, replayed) = CommitLog::open(backend, config.sync_on_commit)?;
        let snapshot = Snapshot {
            entries: replayed.entries,
            commit_ulong: replayed.commit_ulong,
            transaction_number: replayed.frames,
        };
        Ok(Self::from_parts(snapshot, Some(log)))
    }

    /// Opens a database stored in the file at `path`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or replayed.
    pub fn open_file(path: &Path, config: &StoreConfig) -> StorageResult<Self> {
        let backend = FileBackend::open(path)?;
        Self::open(Box::new(backend), config)
    }

    fn from_parts(snapshot: Snapshot, log: Option<CommitLog>) -> Self {
        Self {
            shared: Arc::new(Shared {
                committed: RwLock::new(Arc::new(snapshot)),
                writer_active: Mutex::new(false),
                writer_released: Condvar::new(),
                log: Mutex::new(log),
            }),
        }
    }

    /// Number of committed keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.committed.read().entries.len()
    }

    /// Returns true if no keys are committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueDb for BTreeKeyValueDb {
    fn begin_read(&self) -> StorageResult<Box<dyn KeyValueTransaction>> {
        let snapshot = Arc::clone(&self.shared.committed.read());
        Ok(Box::new(ReadTransaction { snapshot }))
    }

    fn begin_write(&self) -> StorageResult<Box<dyn KeyValueTransaction>> {
        {
            let mut active = self.shared.writer_active.lock();
            while *active {
                self.shared.writer_released.wait(&mut active);
            }
            *active = true;
        }
        let snapshot = Snapshot::clone(&self.shared.committed.read());
        Ok(Box::new(WriteTransaction {
            shared: Arc::clone(&self.shared),
            snapshot,
            ops: Vec::new(),
            protection: 0,
            rollback_advised: false,
        }))
    }
}

struct ReadTransaction {
    snapshot: Arc<Snapshot>,
}

impl KeyValueTransaction for ReadTransaction {
    fn is_read_only(&self) -> bool {
        true
    }

    fn transaction_number(&self) -> u64 {
        self.snapshot.transaction_number
    }

    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.snapshot.entries.get(key).cloned())
    }

    fn create_or_update(&mut self, _key: &[u8], _value: &[u8]) -> StorageResult<bool> {
        Err(StorageError::ReadOnly)
    }

    fn erase(&mut self, _key: &[u8]) -> StorageResult<bool> {
        Err(StorageError::ReadOnly)
    }

    fn erase_prefix(&mut self, _prefix: &[u8]) -> StorageResult<usize> {
        Err(StorageError::ReadOnly)
    }

    fn count_prefix(&self, prefix: &[u8]) -> StorageResult<usize> {
        Ok(self.snapshot.count_prefix(prefix))
    }

    fn entry_at(&self, prefix: &[u8], index: usize) -> StorageResult<Option<KeyValue>> {
        Ok(self.snapshot.entry_at(prefix, index))
    }

    fn next_entry(&self, prefix: &[u8], after: Option<&[u8]>) -> StorageResult<Option<KeyValue>> {
        Ok(self.snapshot.next_entry(prefix, after))
    }

    fn protection_counter(&self) -> u64 {
        0
    }

    fn commit_ulong(&self) -> u64 {
        self.snapshot.commit_ulong
    }

    fn set_commit_ulong(&mut self, _value: u64) -> StorageResult<()> {
        Err(StorageError::ReadOnly)
    }

    fn rollback_advised(&self) -> bool {
        false
    }

    fn set_rollback_advised(&mut self, _advised: bool) {}

    fn commit(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}

struct WriteTransaction {
    shared: Arc<Shared>,
    snapshot: Snapshot,
    ops: Vec<LogOp>,
    protection: u64,
    rollback_advised: bool,
}

impl WriteTransaction {
    fn record(&mut self, op: LogOp) {
        self.protection += 1;
        self.ops.push(op);
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        self.shared.release_writer();
    }
}

impl KeyValueTransaction for WriteTransaction {
    fn is_read_only(&self) -> bool {
        false
    }

    fn transaction_number(&self) -> u64 {
        self.snapshot.transaction_number
    }

    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.snapshot.entries.get(key).cloned())
    }

    fn create_or_update(&mut self, key: &[u8], value: &[u8]) -> StorageResult<bool> {
        let created = self
            .snapshot
            .entries
            .insert(key.to_vec(), value.to_vec())
            .is_none();
        self.record(LogOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        });
        Ok(created)
    }

    fn erase(&mut self, key: &[u8]) -> StorageResult<bool> {
        if self.snapshot.entries.remove(key).is_none() {
            return Ok(false);
        }
        self.record(LogOp::Erase { key: key.to_vec() });
        Ok(true)
    }

    fn erase_prefix(&mut self, prefix: &[u8]) -> StorageResult<usize> {
        let keys: Vec<Vec<u8>> = self
            .snapshot
            .prefix_iter(prefix)
            .map(|(key, _)| key.clone())
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }
        for key in &keys {
            self.snapshot.entries.remove(key);
        }
        self.record(LogOp::ErasePrefix {
            prefix: prefix.to_vec(),
        });
        Ok(keys.len())
    }

    fn count_prefix(&self, prefix: &[u8]) -> StorageResult<usize> {
        Ok(self.snapshot.count_prefix(prefix))
    }

    fn entry_at(&self, prefix: &[u8], index: usize) -> StorageResult<Option<KeyValue>> {
        Ok(self.snapshot.entry_at(prefix, index))
    }

    fn next_entry(&self, prefix: &[u8], after: Option<&[u8]>) -> StorageResult<Option<KeyValue>> {
        Ok(self.snapshot.next_entry(prefix, after))
    }

    fn protection_counter(&self) -> u64 {
        self.protection
    }

    fn commit_ulong(&self) -> u64 {
        self.snapshot.commit_ulong
    }

    fn set_commit_ulong(&mut self, value: u64) -> StorageResult<()> {
        self.snapshot.commit_ulong = value;
        self.record(LogOp::CommitUlong(value));
        Ok(())
    }

    fn rollback_advised(&self) -> bool {
        self.rollback_advised
    }

    fn set_rollback_advised(&mut self, advised: bool) {
        self.rollback_advised = advised;
    }

    fn commit(mut self: Box<Self>) -> StorageResult<()> {
        let snapshot = std::mem::take(&mut self.snapshot);
        let ops = std::mem::take(&mut self.ops);
        self.shared.publish(snapshot, ops)
    }
}
