//! Nested dictionaries stored out of line.
//!
//! A [`crate::FieldKind::Dictionary`] field stores only a [`DictId`]. The
//! entries live under `0x04 vu(dict_id)`, one key per entry, and are
//! erased with the row that references them.

use crate::error::CoreResult;
use crate::layout::dictionary_prefix;
use crate::transaction::ObjectTransaction;
use crate::types::DictId;
use objdb_storage::KeyValue;

/// View over the entries of one nested dictionary.
#[derive(Debug)]
pub struct Dictionary<'tx> {
    tx: &'tx ObjectTransaction,
    id: DictId,
    prefix: Vec<u8>,
}

impl<'tx> Dictionary<'tx> {
    pub(crate) fn new(tx: &'tx ObjectTransaction, id: DictId) -> Self {
        Self {
            tx,
            id,
            prefix: dictionary_prefix(id),
        }
    }

    /// Id of this dictionary.
    #[must_use]
    pub fn id(&self) -> DictId {
        self.id
    }

    fn entry_key(&self, key: &[u8]) -> Vec<u8> {
        [self.prefix.as_slice(), key].concat()
    }

    /// Inserts or replaces an entry. Returns true if it was new.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is closed or read-only.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> CoreResult<bool> {
        let key = self.entry_key(key);
        self.tx
            .with_kv_mut(|kv| Ok(kv.create_or_update(&key, value)?))
    }

    /// Returns the value of an entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::TransactionClosed`] after commit or dispose.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let key = self.entry_key(key);
        self.tx.with_kv(|kv| Ok(kv.get(&key)?))
    }

    /// Removes an entry. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is closed or read-only.
    pub fn remove(&self, key: &[u8]) -> CoreResult<bool> {
        let key = self.entry_key(key);
        self.tx.with_kv_mut(|kv| Ok(kv.erase(&key)?))
    }

    /// Number of entries.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::TransactionClosed`] after commit or dispose.
    pub fn len(&self) -> CoreResult<usize> {
        self.tx.with_kv(|kv| Ok(kv.count_prefix(&self.prefix)?))
    }

    /// Returns true if the dictionary has no entries.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::TransactionClosed`] after commit or dispose.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// All entries in key order, with the dictionary prefix stripped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::TransactionClosed`] after commit or dispose.
    pub fn entries(&self) -> CoreResult<Vec<KeyValue>> {
        self.tx.with_kv(|kv| {
            let mut entries = Vec::new();
            let mut last: Option<Vec<u8>> = None;
            while let Some((key, value)) = kv.next_entry(&self.prefix, last.as_deref())? {
                entries.push((key[self.prefix.len()..].to_vec(), value));
                last = Some(key);
            }
            Ok(entries)
        })
    }

    /// Removes every entry and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is closed or read-only.
    pub fn clear(&self) -> CoreResult<usize> {
        self.tx.with_kv_mut(|kv| Ok(kv.erase_prefix(&self.prefix)?))
    }
}

#[cfg(test)]
mod tests {
    use crate::{CoreError, ObjectDb};

    #[test]
    fn entries_are_ordered_and_isolated() {
        let db = ObjectDb::open_in_memory().unwrap();
        let (first, second) = db
            .transaction(|tx| {
                let first = tx.allocate_dictionary_id()?;
                let second = tx.allocate_dictionary_id()?;
                let dict = tx.dictionary(first);
                assert!(dict.insert(b"b", b"2")?);
                assert!(dict.insert(b"a", b"1")?);
                assert!(!dict.insert(b"a", b"one")?);
                tx.dictionary(second).insert(b"a", b"other")?;
                Ok((first, second))
            })
            .unwrap();

        let tx = db.begin_read().unwrap();
        let dict = tx.dictionary(first);
        assert_eq!(dict.id(), first);
        assert_eq!(
            dict.entries().unwrap(),
            vec![(b"a".to_vec(), b"one".to_vec()), (b"b".to_vec(), b"2".to_vec())]
        );
        assert_eq!(dict.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(dict.get(b"c").unwrap(), None);
        assert_eq!(tx.dictionary(second).len().unwrap(), 1);
    }

    #[test]
    fn remove_and_clear() {
        let db = ObjectDb::open_in_memory().unwrap();
        let tx = db.begin_write().unwrap();
        let dict = tx.dictionary(tx.allocate_dictionary_id().unwrap());
        for key in [b"x", b"y", b"z"] {
            dict.insert(key, b"").unwrap();
        }
        assert!(dict.remove(b"y").unwrap());
        assert!(!dict.remove(b"y").unwrap());
        assert_eq!(dict.clear().unwrap(), 2);
        assert!(dict.is_empty().unwrap());
    }

    #[test]
    fn read_only_dictionary_rejects_writes() {
        let db = ObjectDb::open_in_memory().unwrap();
        let id = db.transaction(|tx| tx.allocate_dictionary_id()).unwrap();
        let tx = db.begin_read().unwrap();
        assert!(matches!(
            tx.dictionary(id).insert(b"k", b"v"),
            Err(CoreError::ReadOnlyTransaction)
        ));
    }
}
