//! Object references inside encoded rows.
//!
//! A reference is one zig-zag integer:
//!
//! * `0` is null,
//! * a positive value is the oid of an independently stored object,
//! * a negative value `-n` is the local id `n` of an object written inline.
//!
//! The first occurrence of a local id is followed by the inline object
//! (`vu(table) vu(version) fields…`). Later occurrences are back-references.
//! Local ids start at 2 and are reserved before the object's fields are
//! written or read, so cyclic inline graphs terminate.

use crate::codec::{skip_fields, ObjectReader, ObjectWriter};
use crate::error::{CoreError, CoreResult};
use crate::layout::table_id_from;
use crate::object::AnyObject;
use crate::schema::TableFamily;
use crate::transaction::ObjectTransaction;
use crate::types::Oid;
use objdb_codec::{ByteReader, ByteWriter};
use std::collections::HashMap;
use tracing::warn;

const FIRST_LOCAL_ID: i64 = 1;

/// Encoder context for one row.
pub(crate) struct GraphWriter<'tx> {
    tx: &'tx ObjectTransaction,
    prefer_inline: bool,
    local_ids: HashMap<usize, (AnyObject, i64)>,
    last_id: i64,
}

impl<'tx> GraphWriter<'tx> {
    /// `prefer_inline` writes untracked objects inline instead of storing
    /// them as new entities.
    pub(crate) fn new(tx: &'tx ObjectTransaction, prefer_inline: bool) -> Self {
        Self {
            tx,
            prefer_inline,
            local_ids: HashMap::new(),
            last_id: FIRST_LOCAL_ID,
        }
    }
}

impl ObjectWriter for GraphWriter<'_> {
    fn write_object(&mut self, writer: &mut ByteWriter, obj: Option<&AnyObject>) -> CoreResult<()> {
        let Some(obj) = obj else {
            writer.write_vint(0);
            return Ok(());
        };
        if let Some(oid) = self.tx.reference_for(obj, self.prefer_inline)? {
            let id = i64::try_from(oid.as_u64())
                .map_err(|_| CoreError::invalid_operation(format!("{oid} out of range")))?;
            writer.write_vint(id);
            return Ok(());
        }
        if let Some((_, id)) = self.local_ids.get(&obj.identity()) {
            writer.write_vint(-id);
            return Ok(());
        }
        self.last_id += 1;
        let id = self.last_id;
        // The clone pins the address for the rest of the encode call.
        self.local_ids.insert(obj.identity(), (obj.clone(), id));
        writer.write_vint(-id);
        let tx = self.tx;
        tx.write_inline(writer, obj, self)
    }
}

/// Decoder context for one row.
pub(crate) struct GraphReader<'tx> {
    tx: &'tx ObjectTransaction,
    local: HashMap<u64, Option<AnyObject>>,
}

impl<'tx> GraphReader<'tx> {
    pub(crate) fn new(tx: &'tx ObjectTransaction) -> Self {
        Self {
            tx,
            local: HashMap::new(),
        }
    }

    fn skip_inline(&mut self, reader: &mut ByteReader<'_>, local: u64) -> CoreResult<()> {
        self.local.insert(local, None);
        let table = table_id_from(reader.read_vuint()?)?;
        let version = reader.read_vuint32()?;
        let tx = self.tx;
        let stored = tx.with_kv(|kv| {
            tx.registry()
                .stored_schema(TableFamily::Objects, table, version, kv)
        })?;
        skip_fields(reader, &stored, self)
    }
}

impl ObjectReader for GraphReader<'_> {
    fn read_object(&mut self, reader: &mut ByteReader<'_>) -> CoreResult<Option<AnyObject>> {
        let id = reader.read_vint()?;
        if id == 0 {
            return Ok(None);
        }
        if id > 0 {
            return self.tx.get_any(Oid::new(id.unsigned_abs()));
        }
        let local = id.unsigned_abs();
        if let Some(obj) = self.local.get(&local) {
            return Ok(obj.clone());
        }

        let start = reader.position();
        let table = table_id_from(reader.read_vuint()?)?;
        let version = reader.read_vuint32()?;
        let tx = self.tx;
        match tx.registry().binding(table) {
            Some(binding) => {
                let obj = (binding.create)();
                self.local.insert(local, Some(obj.clone()));
                let plan = tx.with_kv(|kv| {
                    tx.registry()
                        .load_plan(TableFamily::Objects, table, version, kv)
                })?;
                let mut record = crate::value::Record::new();
                plan.decode(reader, self, &mut record)?;
                (binding.load)(&obj, &mut record)?;
                Ok(Some(obj))
            }
            None if tx.skip_unknown_types() => {
                warn!(
                    db = tx.log_name(),
                    table_id = table.as_u32(),
                    offset = start,
                    "skipping inline object of unknown type"
                );
                let stored = tx.with_kv(|kv| {
                    tx.registry()
                        .stored_schema(TableFamily::Objects, table, version, kv)
                })?;
                self.local.insert(local, None);
                skip_fields(reader, &stored, self)?;
                Ok(None)
            }
            None => Err(CoreError::UnknownStorageTypeId {
                table_id: table.as_u32(),
            }),
        }
    }

    fn skip_object(&mut self, reader: &mut ByteReader<'_>) -> CoreResult<()> {
        let id = reader.read_vint()?;
        if id >= 0 {
            return Ok(());
        }
        let local = id.unsigned_abs();
        if self.local.contains_key(&local) {
            return Ok(());
        }
        self.skip_inline(reader, local)
    }
}
