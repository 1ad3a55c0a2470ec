//! Ordered key-value transaction traits.

use crate::error::StorageResult;

/// A key and its value, as returned by positional and prefix lookups.
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// An ordered, transactional key-value database.
///
/// At most one write transaction is active at a time; `begin_write` blocks
/// until the previous writer finishes. Read transactions see the state as of
/// the last commit before they started.
pub trait KeyValueDb: Send + Sync {
    /// Starts a read-only snapshot transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot provide a snapshot.
    fn begin_read(&self) -> StorageResult<Box<dyn KeyValueTransaction>>;

    /// Starts the single write transaction, waiting for the current writer.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot start a transaction.
    fn begin_write(&self) -> StorageResult<Box<dyn KeyValueTransaction>>;
}

/// A transaction over an ordered key-value database.
///
/// Keys are compared bytewise. Dropping a transaction without calling
/// [`KeyValueTransaction::commit`] discards its changes.
pub trait KeyValueTransaction {
    /// Returns true if this transaction cannot mutate.
    fn is_read_only(&self) -> bool;

    /// Number of commits visible to this transaction.
    fn transaction_number(&self) -> u64;

    /// Looks up the value stored under exactly `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Returns true if `key` is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn contains_key(&self, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Inserts or replaces `key`. Returns true if the key was created.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadOnly`] on a read transaction.
    fn create_or_update(&mut self, key: &[u8], value: &[u8]) -> StorageResult<bool>;

    /// Removes `key`. Returns true if it was present.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadOnly`] on a read transaction.
    fn erase(&mut self, key: &[u8]) -> StorageResult<bool>;

    /// Removes every key starting with `prefix`, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadOnly`] on a read transaction.
    fn erase_prefix(&mut self, prefix: &[u8]) -> StorageResult<usize>;

    /// Counts keys starting with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails.
    fn count_prefix(&self, prefix: &[u8]) -> StorageResult<usize>;

    /// Returns the entry at position `index` among keys starting with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails.
    fn entry_at(&self, prefix: &[u8], index: usize) -> StorageResult<Option<KeyValue>>;

    /// Returns the first entry under `prefix` whose key is greater than
    /// `after`, or the first entry under `prefix` when `after` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails.
    fn next_entry(&self, prefix: &[u8], after: Option<&[u8]>) -> StorageResult<Option<KeyValue>>;

    /// Counter bumped by every mutation in this transaction.
    ///
    /// Positional readers compare it to detect that their cached position
    /// may be stale.
    fn protection_counter(&self) -> u64;

    /// Opaque value committed together with the data.
    fn commit_ulong(&self) -> u64;

    /// Sets the value returned by [`KeyValueTransaction::commit_ulong`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadOnly`] on a read transaction.
    fn set_commit_ulong(&mut self, value: u64) -> StorageResult<()>;

    /// Returns true if a caller asked for this transaction to be rolled back.
    fn rollback_advised(&self) -> bool;

    /// Marks this transaction as one that should not be committed.
    fn set_rollback_advised(&mut self, advised: bool);

    /// Publishes the changes made by this transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit log cannot be written; the changes are
    /// then discarded.
    fn commit(self: Box<Self>) -> StorageResult<()>;
}
