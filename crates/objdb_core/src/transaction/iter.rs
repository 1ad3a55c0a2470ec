//! Lazy object enumeration.

use crate::error::{CoreError, CoreResult};
use crate::layout::{self, oid_from_key, table_id_from};
use crate::object::{AnyObject, Obj};
use crate::transaction::ObjectTransaction;
use crate::types::TableId;
use objdb_codec::read_vuint;
use std::marker::PhantomData;

/// Iterator over stored objects, optionally restricted to one table.
///
/// Rows are visited in oid order by seeking past the last visited key, so
/// the iterator stays valid while the transaction stores or deletes
/// objects. Once the stored rows are exhausted, objects queued by `store`
/// but not yet written are yielded in oid order.
pub struct AnyObjects<'tx> {
    tx: &'tx ObjectTransaction,
    table: Option<TableId>,
    last_key: Option<Vec<u8>>,
    tail: Option<std::vec::IntoIter<AnyObject>>,
    failed: bool,
}

impl<'tx> AnyObjects<'tx> {
    pub(crate) fn new(tx: &'tx ObjectTransaction, table: Option<TableId>) -> Self {
        Self {
            tx,
            table,
            last_key: None,
            tail: None,
            failed: false,
        }
    }

    fn next_stored(&mut self) -> CoreResult<Option<AnyObject>> {
        loop {
            let entry = self
                .tx
                .with_kv(|kv| Ok(kv.next_entry(&[layout::OBJECTS], self.last_key.as_deref())?))?;
            let Some((key, value)) = entry else {
                return Ok(None);
            };
            let oid = oid_from_key(&key)?;
            self.last_key = Some(key);
            if let Some(table) = self.table {
                let (raw, _) = read_vuint(&value)?;
                if table_id_from(raw)? != table {
                    continue;
                }
            }
            if let Some(obj) = self.tx.materialize(oid, &value)? {
                return Ok(Some(obj));
            }
        }
    }
}

impl Iterator for AnyObjects<'_> {
    type Item = CoreResult<AnyObject>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.tail.is_none() {
            match self.next_stored() {
                Ok(Some(obj)) => return Some(Ok(obj)),
                Ok(None) => match self.tx.unflushed(self.table) {
                    Ok(pending) => self.tail = Some(pending.into_iter()),
                    Err(err) => {
                        self.failed = true;
                        return Some(Err(err));
                    }
                },
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
        self.tail.as_mut().and_then(Iterator::next).map(Ok)
    }
}

/// Typed view over [`AnyObjects`].
pub struct Objects<'tx, T> {
    inner: AnyObjects<'tx>,
    _marker: PhantomData<fn() -> T>,
}

impl<'tx, T: 'static> Objects<'tx, T> {
    pub(crate) fn new(inner: AnyObjects<'tx>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }
}

impl<T: 'static> Iterator for Objects<'_, T> {
    type Item = CoreResult<Obj<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        Some(item.and_then(|any| {
            Obj::from_any(&any).ok_or_else(|| {
                CoreError::type_mismatch(std::any::type_name::<T>(), format!("{any:?}"))
            })
        }))
    }
}
