//! Relation CRUD and secondary key maintenance.

use crate::codec::{decode_key, encode_fields, encode_key, find_dictionary_ids, Layout};
use crate::error::{CoreError, CoreResult};
use crate::layout::{dictionary_prefix, relation_rows_prefix, secondary_index_prefix, secondary_prefix};
use crate::relation::{Relation, RelationEnumerator};
use crate::schema::{ClientVersion, FieldDescriptor, SecondaryKeyDescriptor, TableFamily};
use crate::transaction::{GraphReader, GraphWriter, ObjectTransaction};
use crate::types::{DictId, TableId};
use crate::value::{Record, Value};
use objdb_codec::{ByteReader, ByteWriter};
use std::marker::PhantomData;
use tracing::debug;

/// Typed access to one relation within a transaction.
pub struct RelationTable<'tx, R> {
    tx: &'tx ObjectTransaction,
    client: ClientVersion,
    rows_prefix: Vec<u8>,
    _marker: PhantomData<fn() -> R>,
}

impl<R> Clone for RelationTable<'_, R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx,
            client: self.client.clone(),
            rows_prefix: self.rows_prefix.clone(),
            _marker: PhantomData,
        }
    }
}

impl<R> std::fmt::Debug for RelationTable<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationTable")
            .field("name", &self.client.name)
            .field("id", &self.client.id)
            .field("version", &self.client.version)
            .finish()
    }
}

impl<'tx, R: Relation> RelationTable<'tx, R> {
    pub(crate) fn open(tx: &'tx ObjectTransaction) -> CoreResult<Self> {
        tx.ensure_open()?;
        let registry = tx.registry();
        let id = registry.bind_relation::<R>(tx.options().auto_register_relations)?;
        let client = registry.ensure_client_version(TableFamily::Relations, id)?;
        let table = Self {
            tx,
            rows_prefix: relation_rows_prefix(id),
            client,
            _marker: PhantomData,
        };
        if tx.claim_relation_creation(id) {
            debug!(db = tx.log_name(), relation = R::NAME, "running relation creation hook");
            table.prepare_write()?;
            R::on_create(&table)?;
        }
        Ok(table)
    }

    /// Numeric id of the relation.
    #[must_use]
    pub fn id(&self) -> TableId {
        self.client.id
    }

    /// Version rows are written with.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.client.version
    }

    /// The transaction this view belongs to.
    #[must_use]
    pub fn transaction(&self) -> &'tx ObjectTransaction {
        self.tx
    }

    fn row_key(&self, key: &[Value]) -> CoreResult<Vec<u8>> {
        let mut writer = ByteWriter::with_prefix(&self.rows_prefix);
        encode_key(&mut writer, &self.client.schema.primary_key, key)?;
        Ok(writer.into_bytes())
    }

    fn encode_value(&self, row: &R) -> CoreResult<Vec<u8>> {
        let mut writer = ByteWriter::new();
        writer.write_vuint(u64::from(self.client.version));
        let mut graph = GraphWriter::new(self.tx, true);
        encode_fields(
            &mut writer,
            &self.client.schema.fields,
            &row.values(),
            Layout::Value,
            &mut graph,
        )?;
        Ok(writer.into_bytes())
    }

    /// Decodes the key and value fields of a stored row into one record.
    fn decode_record(&self, key: &[u8], value: &[u8]) -> CoreResult<Record> {
        let mut record = Record::new();
        let pk = key.get(self.rows_prefix.len()..).ok_or_else(|| {
            CoreError::invalid_format(format!("short key in relation {}", R::NAME))
        })?;
        decode_key(&mut ByteReader::new(pk), &self.client.schema.primary_key, &mut record)?;

        let mut reader = ByteReader::new(value);
        let version = reader.read_vuint32()?;
        let tx = self.tx;
        let plan = tx.with_kv(|kv| {
            tx.registry()
                .load_plan(TableFamily::Relations, self.client.id, version, kv)
        })?;
        let mut graph = GraphReader::new(tx);
        plan.decode(&mut reader, &mut graph, &mut record)?;
        Ok(record)
    }

    pub(crate) fn decode_row(&self, key: &[u8], value: &[u8]) -> CoreResult<R> {
        let mut record = self.decode_record(key, value)?;
        R::from_record(&mut record)
    }

    /// Nested dictionaries referenced by a stored value row.
    fn nested_dictionaries(&self, value: &[u8]) -> CoreResult<Vec<DictId>> {
        let mut reader = ByteReader::new(value);
        let version = reader.read_vuint32()?;
        let tx = self.tx;
        let stored = tx.with_kv(|kv| {
            tx.registry()
                .stored_schema(TableFamily::Relations, self.client.id, version, kv)
        })?;
        if !stored.needs_free_content() {
            return Ok(Vec::new());
        }
        let mut graph = GraphReader::new(tx);
        find_dictionary_ids(&mut reader, &stored, &mut graph)
    }

    fn free_content(&self, dictionaries: &[DictId]) -> CoreResult<()> {
        if dictionaries.is_empty() {
            return Ok(());
        }
        self.tx.with_kv_mut(|kv| {
            for id in dictionaries {
                kv.erase_prefix(&dictionary_prefix(*id))?;
            }
            Ok(())
        })
    }

    fn secondary_key(
        &self,
        sk: &SecondaryKeyDescriptor,
        record: &Record,
        pk: &[u8],
    ) -> CoreResult<Vec<u8>> {
        let schema = &self.client.schema;
        let mut fields: Vec<FieldDescriptor> = Vec::with_capacity(sk.fields.len());
        let mut values = Vec::with_capacity(sk.fields.len());
        for name in &sk.fields {
            let field = schema.any_field(name).ok_or_else(|| {
                CoreError::schema_mismatch(R::NAME, format!("unknown secondary key field {name}"))
            })?;
            let value = record.get(name).cloned().ok_or_else(|| {
                CoreError::invalid_format(format!("row lacks secondary key field {name}"))
            })?;
            fields.push(field.clone());
            values.push(value);
        }
        let mut writer = ByteWriter::with_prefix(&secondary_index_prefix(self.client.id, sk.index));
        encode_key(&mut writer, &fields, &values)?;
        writer.write_raw(pk);
        Ok(writer.into_bytes())
    }

    fn secondary_keys_for(&self, record: &Record, row_key: &[u8]) -> CoreResult<Vec<Vec<u8>>> {
        let pk = &row_key[self.rows_prefix.len()..];
        self.client
            .schema
            .secondary_keys
            .iter()
            .map(|sk| self.secondary_key(sk, record, pk))
            .collect()
    }

    fn record_of(&self, row: &R) -> Record {
        let mut record = Record::new();
        let schema = &self.client.schema;
        for (field, value) in schema.primary_key.iter().zip(row.key()) {
            record.set(field.name.clone(), value);
        }
        for (field, value) in schema.fields.iter().zip(row.values()) {
            record.set(field.name.clone(), value);
        }
        record
    }

    fn prepare_write(&self) -> CoreResult<()> {
        self.tx.ensure_writable()?;
        if self.tx.touch_relation(self.client.id) {
            self.rebuild_secondary_indexes()?;
        }
        Ok(())
    }

    /// Rewrites every secondary index entry from the stored rows.
    fn rebuild_secondary_indexes(&self) -> CoreResult<()> {
        let prefix = secondary_prefix(self.client.id);
        let erased = self.tx.with_kv_mut(|kv| Ok(kv.erase_prefix(&prefix)?))?;
        if self.client.schema.secondary_keys.is_empty() {
            return Ok(());
        }
        let mut entries = Vec::new();
        let mut last: Option<Vec<u8>> = None;
        loop {
            let entry = self
                .tx
                .with_kv(|kv| Ok(kv.next_entry(&self.rows_prefix, last.as_deref())?))?;
            let Some((key, value)) = entry else { break };
            let record = self.decode_record(&key, &value)?;
            entries.extend(self.secondary_keys_for(&record, &key)?);
            last = Some(key);
        }
        debug!(
            db = self.tx.log_name(),
            relation = R::NAME,
            erased,
            written = entries.len(),
            "secondary indexes rebuilt"
        );
        self.tx.with_kv_mut(|kv| {
            for key in &entries {
                kv.create_or_update(key, &[])?;
            }
            Ok(())
        })
    }

    /// Writes the row, replacing `old` (the stored value) if present.
    fn write_row(&self, row: &R, row_key: &[u8], old: Option<&[u8]>) -> CoreResult<()> {
        let value = self.encode_value(row)?;
        let record = self.record_of(row);
        let new_secondary = self.secondary_keys_for(&record, row_key)?;

        let mut old_secondary = Vec::new();
        let mut freed = Vec::new();
        if let Some(old) = old {
            if !self.client.schema.secondary_keys.is_empty() {
                let old_record = self.decode_record(row_key, old)?;
                old_secondary = self.secondary_keys_for(&old_record, row_key)?;
            }
            let kept = self.nested_dictionaries(&value)?;
            freed = self
                .nested_dictionaries(old)?
                .into_iter()
                .filter(|id| !kept.contains(id))
                .collect();
        }

        self.free_content(&freed)?;
        self.tx.with_kv_mut(|kv| {
            for key in old_secondary.iter().filter(|k| !new_secondary.contains(k)) {
                kv.erase(key)?;
            }
            kv.create_or_update(row_key, &value)?;
            for key in &new_secondary {
                kv.create_or_update(key, &[])?;
            }
            Ok(())
        })
    }

    fn stored(&self, row_key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.tx.with_kv(|kv| Ok(kv.get(row_key)?))
    }

    /// Inserts a new row.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`] if the primary key exists.
    pub fn insert(&self, row: &R) -> CoreResult<()> {
        self.prepare_write()?;
        let row_key = self.row_key(&row.key())?;
        if self.stored(&row_key)?.is_some() {
            return Err(CoreError::duplicate_key(R::NAME));
        }
        self.write_row(row, &row_key, None)
    }

    /// Inserts or replaces a row. Returns true if a row was replaced.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is closed or read-only.
    pub fn upsert(&self, row: &R) -> CoreResult<bool> {
        self.prepare_write()?;
        let row_key = self.row_key(&row.key())?;
        let old = self.stored(&row_key)?;
        self.write_row(row, &row_key, old.as_deref())?;
        Ok(old.is_some())
    }

    /// Replaces an existing row.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the primary key is absent.
    pub fn update(&self, row: &R) -> CoreResult<()> {
        self.prepare_write()?;
        let row_key = self.row_key(&row.key())?;
        let old = self
            .stored(&row_key)?
            .ok_or_else(|| CoreError::not_found(format!("row in relation {}", R::NAME)))?;
        self.write_row(row, &row_key, Some(&old))
    }

    /// Removes the row with the given primary key.
    ///
    /// Nested dictionaries referenced by the row are erased before the row
    /// itself. Returns false if no row existed and `throw_if_missing` is off.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the row is absent and
    /// `throw_if_missing` is set.
    pub fn remove_by_key(&self, key: &[Value], throw_if_missing: bool) -> CoreResult<bool> {
        self.prepare_write()?;
        let row_key = self.row_key(key)?;
        let Some(old) = self.stored(&row_key)? else {
            if throw_if_missing {
                return Err(CoreError::not_found(format!("row in relation {}", R::NAME)));
            }
            return Ok(false);
        };

        let dictionaries = self.nested_dictionaries(&old)?;
        self.free_content(&dictionaries)?;

        let old_secondary = if self.client.schema.secondary_keys.is_empty() {
            Vec::new()
        } else {
            let record = self.decode_record(&row_key, &old)?;
            self.secondary_keys_for(&record, &row_key)?
        };
        self.tx.with_kv_mut(|kv| {
            for key in &old_secondary {
                kv.erase(key)?;
            }
            kv.erase(&row_key)?;
            Ok(true)
        })
    }

    /// Reads the row with the given primary key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the row is absent and
    /// `throw_if_missing` is set.
    pub fn find_by_key(&self, key: &[Value], throw_if_missing: bool) -> CoreResult<Option<R>> {
        self.tx.ensure_open()?;
        let row_key = self.row_key(key)?;
        match self.stored(&row_key)? {
            Some(value) => self.decode_row(&row_key, &value).map(Some),
            None if throw_if_missing => Err(CoreError::not_found(format!(
                "row in relation {}",
                R::NAME
            ))),
            None => Ok(None),
        }
    }

    /// Returns true if a row with the given primary key exists.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionClosed`] after commit or dispose.
    pub fn contains_key(&self, key: &[Value]) -> CoreResult<bool> {
        self.tx.ensure_open()?;
        let row_key = self.row_key(key)?;
        Ok(self.stored(&row_key)?.is_some())
    }

    /// Number of rows.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionClosed`] after commit or dispose.
    pub fn count(&self) -> CoreResult<usize> {
        self.tx.ensure_open()?;
        self.tx
            .with_kv(|kv| Ok(kv.count_prefix(&self.rows_prefix)?))
    }

    /// Enumerates rows in primary key order.
    #[must_use]
    pub fn iter(&self) -> RelationEnumerator<'tx, R> {
        RelationEnumerator::new(self.clone(), self.rows_prefix.clone())
    }

    fn secondary_prefix_for(&self, name: &str, values: &[Value]) -> CoreResult<Vec<u8>> {
        let schema = &self.client.schema;
        let sk = schema.secondary_key(name).ok_or_else(|| {
            CoreError::not_found(format!("secondary key {name} in relation {}", R::NAME))
        })?;
        if values.len() > sk.fields.len() {
            return Err(CoreError::invalid_operation(format!(
                "secondary key {name} has {} fields, got {}",
                sk.fields.len(),
                values.len()
            )));
        }
        let fields = sk.fields[..values.len()]
            .iter()
            .map(|f| {
                schema
                    .any_field(f)
                    .cloned()
                    .ok_or_else(|| CoreError::schema_mismatch(R::NAME, format!("unknown field {f}")))
            })
            .collect::<CoreResult<Vec<_>>>()?;
        let mut writer = ByteWriter::with_prefix(&secondary_index_prefix(self.client.id, sk.index));
        encode_key(&mut writer, &fields, values)?;
        Ok(writer.into_bytes())
    }

    /// Rows whose secondary key `name` starts with `values`, in index order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] for an unknown secondary key.
    pub fn find_by_secondary_key(&self, name: &str, values: &[Value]) -> CoreResult<Vec<R>> {
        self.tx.ensure_open()?;
        let prefix = self.secondary_prefix_for(name, values)?;
        let sk = self
            .client
            .schema
            .secondary_key(name)
            .ok_or_else(|| CoreError::not_found(format!("secondary key {name}")))?;
        let sk_fields: Vec<FieldDescriptor> = sk
            .fields
            .iter()
            .filter_map(|f| self.client.schema.any_field(f).cloned())
            .collect();
        let index_prefix_len = secondary_index_prefix(self.client.id, sk.index).len();

        let mut rows = Vec::new();
        let mut last: Option<Vec<u8>> = None;
        loop {
            let entry = self
                .tx
                .with_kv(|kv| Ok(kv.next_entry(&prefix, last.as_deref())?))?;
            let Some((key, _)) = entry else { break };
            let mut reader = ByteReader::new(&key[index_prefix_len..]);
            decode_key(&mut reader, &sk_fields, &mut Record::new())?;
            let row_key = [self.rows_prefix.as_slice(), reader.remaining()].concat();
            let value = self.stored(&row_key)?.ok_or_else(|| {
                CoreError::invalid_format(format!(
                    "secondary index of {} points to a missing row",
                    R::NAME
                ))
            })?;
            rows.push(self.decode_row(&row_key, &value)?);
            last = Some(key);
        }
        Ok(rows)
    }

    /// Number of rows whose secondary key `name` starts with `values`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] for an unknown secondary key.
    pub fn count_by_secondary_key(&self, name: &str, values: &[Value]) -> CoreResult<usize> {
        self.tx.ensure_open()?;
        let prefix = self.secondary_prefix_for(name, values)?;
        self.tx.with_kv(|kv| Ok(kv.count_prefix(&prefix)?))
    }
}
