//! Relation enumeration with optimistic re-seek.

use crate::error::CoreResult;
use crate::relation::{Relation, RelationTable};
use tracing::trace;

/// Forward iterator over the rows of a relation, in primary key order.
///
/// The enumerator remembers its position as an index into the relation's
/// key range and samples the transaction's protection counter before each
/// step. While the counter is unchanged it simply advances past the last
/// key. After an interleaved mutation it re-seeks to the remembered index,
/// trusting it only while the entry just before that index is still the
/// last returned key, and seeks past that key otherwise. Rows inserted
/// ahead of the cursor are seen, rows behind it are not, and every yielded
/// row is decoded from a complete, current value.
pub struct RelationEnumerator<'tx, R> {
    table: RelationTable<'tx, R>,
    prefix: Vec<u8>,
    pos: usize,
    last_key: Option<Vec<u8>>,
    counter: u64,
    done: bool,
}

impl<'tx, R: Relation> RelationEnumerator<'tx, R> {
    pub(crate) fn new(table: RelationTable<'tx, R>, prefix: Vec<u8>) -> Self {
        Self {
            table,
            prefix,
            pos: 0,
            last_key: None,
            counter: 0,
            done: false,
        }
    }

    fn step(&mut self) -> CoreResult<Option<(Vec<u8>, Vec<u8>)>> {
        let tx = self.table.transaction();
        tx.ensure_open()?;
        tx.with_kv(|kv| {
            let counter = kv.protection_counter();
            let last = self.last_key.as_deref();
            let entry = match last {
                Some(last) if counter != self.counter => {
                    trace!(pos = self.pos, "relation enumerator re-seek");
                    let anchored = match self.pos.checked_sub(1) {
                        Some(prev) => kv
                            .entry_at(&self.prefix, prev)?
                            .is_some_and(|(key, _)| key.as_slice() == last),
                        None => false,
                    };
                    if anchored {
                        kv.entry_at(&self.prefix, self.pos)?
                    } else {
                        kv.next_entry(&self.prefix, Some(last))?
                    }
                }
                _ => kv.next_entry(&self.prefix, last)?,
            };
            self.counter = counter;
            Ok(entry)
        })
    }
}

impl<R: Relation> Iterator for RelationEnumerator<'_, R> {
    type Item = CoreResult<R>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let (key, value) = match self.step() {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(err) => {
                self.done = true;
                return Some(Err(err));
            }
        };
        let row = self.table.decode_row(&key, &value);
        self.last_key = Some(key);
        self.pos += 1;
        Some(row)
    }
}
