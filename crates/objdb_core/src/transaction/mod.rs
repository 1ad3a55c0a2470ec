//! Object transactions.
//!
//! An [`ObjectTransaction`] wraps one key-value transaction and owns the
//! state that makes objects behave like objects: the identity cache, the
//! dirty set, and the set of tables whose metadata must be persisted on
//! commit. None of this state is shared with other transactions.
//!
//! Stored objects are written at commit, deletions take effect at once:
//!
//! ```text
//! store(obj)  -> oid allocated, obj queued in the dirty set
//! delete(obj) -> row erased immediately, instance tombstoned
//! commit()    -> dirty set drained until empty, counters and table
//!                metadata written, key-value transaction committed
//! ```

mod graph;
mod iter;
mod state;

pub(crate) use graph::{GraphReader, GraphWriter};
pub use iter::{AnyObjects, Objects};
pub use state::TransactionState;

use crate::codec::{encode_fields, find_dictionary_ids, Layout};
use crate::config::DbOptions;
use crate::database::DbShared;
use crate::dictionary::Dictionary;
use crate::error::{CoreError, CoreResult};
use crate::layout::{self, counter_key, object_key, table_id_from};
use crate::object::{AnyObject, Obj, ObjectCache, ObjectMetadata, ObjectState, Persist};
use crate::relation::{Relation, RelationTable};
use crate::schema::{SchemaRegistry, TableFamily, TypeBinding};
use crate::types::{DictId, Oid, TableId};
use crate::value::Record;
use objdb_codec::{ByteReader, ByteWriter};
use objdb_storage::KeyValueTransaction;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// A unit of work over the object database.
///
/// Obtained from [`crate::ObjectDb::begin_read`] or
/// [`crate::ObjectDb::begin_write`]. Dropping an uncommitted transaction
/// disposes it: nothing it stored becomes visible, except rows erased by
/// [`delete`](Self::delete), which are erased in the underlying key-value
/// transaction right away and are therefore lost only if that transaction
/// commits.
pub struct ObjectTransaction {
    shared: Arc<DbShared>,
    kv: RefCell<Option<Box<dyn KeyValueTransaction>>>,
    state: Cell<TransactionState>,
    read_only: bool,
    cache: RefCell<ObjectCache>,
    dirty: RefCell<BTreeMap<Oid, AnyObject>>,
    updated_tables: RefCell<BTreeSet<TableId>>,
    updated_relations: RefCell<BTreeSet<TableId>>,
    created_relations: RefCell<HashSet<TableId>>,
    rebuilt_relations: RefCell<HashSet<TableId>>,
    skip_unknown_types: Cell<bool>,
}

impl ObjectTransaction {
    pub(crate) fn new(
        shared: Arc<DbShared>,
        kv: Box<dyn KeyValueTransaction>,
        read_only: bool,
    ) -> Self {
        let cache = ObjectCache::new(shared.options.cache_upgrade_threshold);
        let skip_unknown_types = shared.options.skip_unknown_types;
        Self {
            shared,
            kv: RefCell::new(Some(kv)),
            state: Cell::new(TransactionState::Active),
            read_only,
            cache: RefCell::new(cache),
            dirty: RefCell::new(BTreeMap::new()),
            updated_tables: RefCell::new(BTreeSet::new()),
            updated_relations: RefCell::new(BTreeSet::new()),
            created_relations: RefCell::new(HashSet::new()),
            rebuilt_relations: RefCell::new(HashSet::new()),
            skip_unknown_types: Cell::new(skip_unknown_types),
        }
    }

    /// Returns true if this transaction cannot write.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state.get()
    }

    /// Number of the key-value transaction this one wraps.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionClosed`] after commit or dispose.
    pub fn transaction_number(&self) -> CoreResult<u64> {
        self.with_kv(|kv| Ok(kv.transaction_number()))
    }

    /// Whether objects of unknown types are skipped instead of failing reads.
    #[must_use]
    pub fn skip_unknown_types(&self) -> bool {
        self.skip_unknown_types.get()
    }

    /// Overrides [`crate::DbOptions::skip_unknown_types`] for this transaction.
    pub fn set_skip_unknown_types(&self, skip: bool) {
        self.skip_unknown_types.set(skip);
    }

    pub(crate) fn registry(&self) -> &SchemaRegistry {
        &self.shared.registry
    }

    pub(crate) fn options(&self) -> &DbOptions {
        &self.shared.options
    }

    pub(crate) fn log_name(&self) -> &str {
        self.shared.options.log_name()
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.state.get().is_closed() {
            return Err(CoreError::TransactionClosed);
        }
        Ok(())
    }

    pub(crate) fn ensure_writable(&self) -> CoreResult<()> {
        self.ensure_open()?;
        if self.read_only {
            return Err(CoreError::ReadOnlyTransaction);
        }
        Ok(())
    }

    /// Runs `f` against the key-value transaction.
    ///
    /// Reads may nest. `f` must not call back into a mutating operation.
    pub(crate) fn with_kv<R>(
        &self,
        f: impl FnOnce(&dyn KeyValueTransaction) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let guard = self.kv.borrow();
        let kv = guard.as_deref().ok_or(CoreError::TransactionClosed)?;
        f(kv)
    }

    /// Runs `f` against the key-value transaction with write access.
    ///
    /// `f` must not call back into this transaction.
    pub(crate) fn with_kv_mut<R>(
        &self,
        f: impl FnOnce(&mut dyn KeyValueTransaction) -> CoreResult<R>,
    ) -> CoreResult<R> {
        self.ensure_writable()?;
        let mut guard = self.kv.borrow_mut();
        let kv = guard.as_deref_mut().ok_or(CoreError::TransactionClosed)?;
        f(kv)
    }

    fn allocate_oid(&self) -> Oid {
        Oid::new(self.shared.last_oid.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Reserves a fresh id for a nested dictionary.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is closed or read-only.
    pub fn allocate_dictionary_id(&self) -> CoreResult<DictId> {
        self.ensure_writable()?;
        Ok(DictId::new(
            self.shared.last_dict_id.fetch_add(1, Ordering::SeqCst) + 1,
        ))
    }

    /// Opens a view over the entries of a nested dictionary.
    #[must_use]
    pub fn dictionary(&self, id: DictId) -> Dictionary<'_> {
        Dictionary::new(self, id)
    }

    fn bind<T: Persist>(&self) -> CoreResult<TableId> {
        self.registry()
            .bind_object::<T>(self.shared.options.auto_register_types)
    }

    fn table_for(&self, obj: &AnyObject) -> CoreResult<TableId> {
        self.registry()
            .table_of(obj.cell_type_id())
            .ok_or_else(|| CoreError::unsupported_type(format!("{obj:?} of an unregistered type")))
    }

    /// Creates a fresh instance tracked by this transaction.
    ///
    /// The instance has no oid until it is stored, either explicitly or by
    /// being referenced from a stored object.
    ///
    /// # Errors
    ///
    /// Fails if the type is not registered and auto-registration is off.
    pub fn new_object<T: Persist>(&self) -> CoreResult<Obj<T>> {
        self.ensure_open()?;
        let table = self.bind::<T>()?;
        self.registry()
            .ensure_client_version(TableFamily::Objects, table)?;
        let obj = Obj::new(T::create());
        self.cache.borrow_mut().insert(
            &obj.to_any(),
            ObjectMetadata::new(Oid::NONE, ObjectState::Dirty),
        );
        Ok(obj)
    }

    /// Queues an object for writing at commit and returns its oid.
    ///
    /// Calling `store` again after mutating an already stored instance
    /// queues it again. Objects it references are stored transitively at
    /// commit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ObjectDeleted`] for an instance deleted in this
    /// transaction, and [`CoreError::ReadOnlyTransaction`] in a read-only one.
    pub fn store<T: Persist>(&self, obj: &Obj<T>) -> CoreResult<Oid> {
        self.ensure_writable()?;
        self.bind::<T>()?;
        self.store_any(&obj.to_any())
    }

    /// Type-erased [`store`](Self::store).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedType`] if the instance's type is not
    /// registered as a persisted type.
    pub fn store_any(&self, obj: &AnyObject) -> CoreResult<Oid> {
        self.ensure_writable()?;
        let table = self.table_for(obj)?;
        self.registry()
            .ensure_client_version(TableFamily::Objects, table)?;
        let metadata = self.cache.borrow().metadata(obj);
        match metadata {
            Some(m) if m.state == ObjectState::Deleted => Err(CoreError::ObjectDeleted {
                oid: m.id.as_u64(),
            }),
            Some(m) => {
                let oid = if m.id.is_none() {
                    let oid = self.allocate_oid();
                    self.cache.borrow_mut().assign_oid(obj, oid);
                    oid
                } else {
                    m.id
                };
                if m.state != ObjectState::Dirty {
                    if let Some(meta) = self.cache.borrow_mut().metadata_mut(obj) {
                        meta.state = ObjectState::Dirty;
                    }
                }
                self.dirty.borrow_mut().insert(oid, obj.clone());
                Ok(oid)
            }
            None => {
                let oid = self.allocate_oid();
                self.cache
                    .borrow_mut()
                    .insert(obj, ObjectMetadata::new(oid, ObjectState::Dirty));
                self.dirty.borrow_mut().insert(oid, obj.clone());
                Ok(oid)
            }
        }
    }

    /// Writes an object immediately instead of at commit.
    ///
    /// # Errors
    ///
    /// Same as [`store`](Self::store), plus encoding and storage errors.
    pub fn store_and_flush<T: Persist>(&self, obj: &Obj<T>) -> CoreResult<Oid> {
        self.ensure_writable()?;
        self.bind::<T>()?;
        let obj = obj.to_any();
        let metadata = self.cache.borrow().metadata(&obj);
        let oid = match metadata {
            Some(m) if m.state == ObjectState::Deleted => {
                return Err(CoreError::ObjectDeleted {
                    oid: m.id.as_u64(),
                })
            }
            Some(m) if m.id.is_none() => {
                let oid = self.allocate_oid();
                self.cache.borrow_mut().assign_oid(&obj, oid);
                oid
            }
            Some(m) => m.id,
            None => {
                let oid = self.allocate_oid();
                self.cache
                    .borrow_mut()
                    .insert(&obj, ObjectMetadata::new(oid, ObjectState::Read));
                oid
            }
        };
        self.write_object_row(&obj, oid)?;
        if let Some(meta) = self.cache.borrow_mut().metadata_mut(&obj) {
            meta.state = ObjectState::Read;
        }
        self.dirty.borrow_mut().remove(&oid);
        Ok(oid)
    }

    fn write_object_row(&self, obj: &AnyObject, oid: Oid) -> CoreResult<()> {
        let table = self.table_for(obj)?;
        let client = self
            .registry()
            .ensure_client_version(TableFamily::Objects, table)?;
        let binding = self
            .registry()
            .binding(table)
            .ok_or_else(|| CoreError::unsupported_type(client.name.clone()))?;
        let values = (binding.save)(obj)?;

        let mut writer = ByteWriter::new();
        writer.write_vuint(u64::from(table.as_u32()));
        writer.write_vuint(u64::from(client.version));
        let mut graph = GraphWriter::new(self, false);
        encode_fields(
            &mut writer,
            &client.schema.fields,
            &values,
            Layout::Value,
            &mut graph,
        )?;
        self.updated_tables.borrow_mut().insert(table);
        self.with_kv_mut(|kv| {
            kv.create_or_update(&object_key(oid), writer.as_bytes())?;
            Ok(())
        })
    }

    /// Encodes an inline object: table, version, then its fields.
    pub(crate) fn write_inline(
        &self,
        writer: &mut ByteWriter,
        obj: &AnyObject,
        graph: &mut GraphWriter<'_>,
    ) -> CoreResult<()> {
        let table = self.table_for(obj)?;
        let client = self
            .registry()
            .ensure_client_version(TableFamily::Objects, table)?;
        let binding = self
            .registry()
            .binding(table)
            .ok_or_else(|| CoreError::unsupported_type(client.name.clone()))?;
        let values = (binding.save)(obj)?;
        writer.write_vuint(u64::from(table.as_u32()));
        writer.write_vuint(u64::from(client.version));
        encode_fields(writer, &client.schema.fields, &values, Layout::Value, graph)?;
        self.updated_tables.borrow_mut().insert(table);
        Ok(())
    }

    /// How a referenced object is written: `Some(0)` null, `Some(oid)`, or
    /// `None` for inline.
    pub(crate) fn reference_for(
        &self,
        obj: &AnyObject,
        prefer_inline: bool,
    ) -> CoreResult<Option<Oid>> {
        let metadata = self.cache.borrow().metadata(obj);
        match metadata {
            Some(m) if m.id.is_none() || m.state == ObjectState::Deleted => Ok(Some(Oid::NONE)),
            Some(m) => Ok(Some(m.id)),
            None if prefer_inline => Ok(None),
            None => self.store_any(obj).map(Some),
        }
    }

    /// Loads an object by oid.
    ///
    /// Within one transaction the same live instance is returned for the
    /// same oid for as long as the application holds it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownStorageTypeId`] if the row belongs to a
    /// type not registered in this process, unless unknown types are
    /// skipped, and decoding errors unless self-healing is enabled.
    pub fn get_any(&self, oid: Oid) -> CoreResult<Option<AnyObject>> {
        self.ensure_open()?;
        if let Some(obj) = self.cache.borrow().lookup_by_oid(oid) {
            return Ok(Some(obj));
        }
        let Some(bytes) = self.with_kv(|kv| Ok(kv.get(&object_key(oid))?))? else {
            return Ok(None);
        };
        self.materialize(oid, &bytes)
    }

    /// Loads an object of type `T` by oid.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeMismatch`] if the oid holds another type.
    pub fn get<T: Persist>(&self, oid: Oid) -> CoreResult<Option<Obj<T>>> {
        self.bind::<T>()?;
        match self.get_any(oid)? {
            None => Ok(None),
            Some(any) => Obj::from_any(&any).map(Some).ok_or_else(|| {
                CoreError::type_mismatch(T::TYPE_NAME, format!("{any:?} at {oid}"))
            }),
        }
    }

    /// Returns the cached instance for `oid` or decodes `bytes` into a new one.
    pub(crate) fn materialize(&self, oid: Oid, bytes: &[u8]) -> CoreResult<Option<AnyObject>> {
        if let Some(obj) = self.cache.borrow().lookup_by_oid(oid) {
            return Ok(Some(obj));
        }
        match self.load_row(oid, bytes) {
            Ok(obj) => Ok(obj),
            Err(err) if self.shared.options.self_healing && err.is_decode_failure() => {
                warn!(db = self.log_name(), %oid, error = %err, "skipping unreadable object");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn load_row(&self, oid: Oid, bytes: &[u8]) -> CoreResult<Option<AnyObject>> {
        let mut reader = ByteReader::new(bytes);
        let table = table_id_from(reader.read_vuint()?)?;
        let version = reader.read_vuint32()?;
        let Some(binding) = self.registry().binding(table) else {
            if self.skip_unknown_types.get() {
                warn!(
                    db = self.log_name(),
                    %oid,
                    table_id = table.as_u32(),
                    "skipping object of unknown type"
                );
                return Ok(None);
            }
            return Err(CoreError::UnknownStorageTypeId {
                table_id: table.as_u32(),
            });
        };

        let obj = (binding.create)();
        self.cache
            .borrow_mut()
            .insert(&obj, ObjectMetadata::new(oid, ObjectState::Read));
        let loaded = self.decode_into(&obj, &binding, table, version, &mut reader);
        if let Err(err) = loaded {
            self.cache.borrow_mut().forget(&obj);
            return Err(err);
        }
        Ok(Some(obj))
    }

    fn decode_into(
        &self,
        obj: &AnyObject,
        binding: &TypeBinding,
        table: TableId,
        version: u32,
        reader: &mut ByteReader<'_>,
    ) -> CoreResult<()> {
        let plan = self.with_kv(|kv| {
            self.registry()
                .load_plan(TableFamily::Objects, table, version, kv)
        })?;
        let mut record = Record::new();
        let mut graph = GraphReader::new(self);
        plan.decode(reader, &mut graph, &mut record)?;
        (binding.load)(obj, &mut record)
    }

    /// Returns the oid of a tracked instance, or [`Oid::NONE`].
    #[must_use]
    pub fn get_oid<T: 'static>(&self, obj: &Obj<T>) -> Oid {
        self.get_oid_any(&obj.to_any())
    }

    /// Type-erased [`get_oid`](Self::get_oid).
    #[must_use]
    pub fn get_oid_any(&self, obj: &AnyObject) -> Oid {
        self.cache
            .borrow()
            .metadata(obj)
            .map_or(Oid::NONE, |m| m.id)
    }

    /// Key and value sizes of a stored object row.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionClosed`] after commit or dispose.
    pub fn get_storage_size(&self, oid: Oid) -> CoreResult<Option<(usize, usize)>> {
        self.ensure_open()?;
        let key = object_key(oid);
        self.with_kv(|kv| Ok(kv.get(&key)?.map(|value| (key.len(), value.len()))))
    }

    /// Deletes an object and erases its row immediately.
    ///
    /// Nested dictionaries referenced by the row are erased first. Deleting
    /// an untracked instance only tombstones it, so it can never be stored.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is closed or read-only.
    pub fn delete<T: 'static>(&self, obj: &Obj<T>) -> CoreResult<()> {
        self.delete_any(&obj.to_any())
    }

    /// Type-erased [`delete`](Self::delete).
    ///
    /// # Errors
    ///
    /// Fails if the transaction is closed or read-only.
    pub fn delete_any(&self, obj: &AnyObject) -> CoreResult<()> {
        self.ensure_writable()?;
        let metadata = self.cache.borrow().metadata(obj);
        match metadata {
            None => {
                self.cache
                    .borrow_mut()
                    .insert(obj, ObjectMetadata::new(Oid::NONE, ObjectState::Deleted));
                Ok(())
            }
            Some(m) if m.state == ObjectState::Deleted => Ok(()),
            Some(m) => {
                if let Some(meta) = self.cache.borrow_mut().metadata_mut(obj) {
                    meta.state = ObjectState::Deleted;
                }
                if m.id.is_none() {
                    return Ok(());
                }
                self.erase_object(m.id)
            }
        }
    }

    /// Deletes the object stored under `oid`.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is closed or read-only.
    pub fn delete_by_oid(&self, oid: Oid) -> CoreResult<()> {
        self.ensure_writable()?;
        let cached = self.cache.borrow().lookup_by_oid(oid);
        match cached {
            Some(obj) => self.delete_any(&obj),
            None => self.erase_object(oid),
        }
    }

    fn erase_object(&self, oid: Oid) -> CoreResult<()> {
        self.cache.borrow_mut().remove_oid(oid);
        self.dirty.borrow_mut().remove(&oid);
        let key = object_key(oid);
        let Some(bytes) = self.with_kv(|kv| Ok(kv.get(&key)?))? else {
            return Ok(());
        };
        let dictionaries = self.nested_dictionaries(&bytes)?;
        self.with_kv_mut(|kv| {
            for id in &dictionaries {
                kv.erase_prefix(&layout::dictionary_prefix(*id))?;
            }
            kv.erase(&key)?;
            Ok(())
        })
    }

    fn nested_dictionaries(&self, row: &[u8]) -> CoreResult<Vec<DictId>> {
        let mut reader = ByteReader::new(row);
        let table = table_id_from(reader.read_vuint()?)?;
        let version = reader.read_vuint32()?;
        let stored = self.with_kv(|kv| {
            self.registry()
                .stored_schema(TableFamily::Objects, table, version, kv)
        })?;
        if !stored.needs_free_content() {
            return Ok(Vec::new());
        }
        let mut graph = GraphReader::new(self);
        find_dictionary_ids(&mut reader, &stored, &mut graph)
    }

    /// Lazily enumerates stored objects of type `T` in oid order, followed
    /// by stored-but-not-yet-flushed ones.
    ///
    /// # Errors
    ///
    /// Fails if the type is not registered and auto-registration is off.
    pub fn enumerate<T: Persist>(&self) -> CoreResult<Objects<'_, T>> {
        self.ensure_open()?;
        let table = self.bind::<T>()?;
        Ok(Objects::new(AnyObjects::new(self, Some(table))))
    }

    /// Lazily enumerates every stored object of every registered type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionClosed`] after commit or dispose.
    pub fn enumerate_any(&self) -> CoreResult<AnyObjects<'_>> {
        self.ensure_open()?;
        Ok(AnyObjects::new(self, None))
    }

    /// Dirty objects without a stored row yet, in oid order.
    pub(crate) fn unflushed(&self, table: Option<TableId>) -> CoreResult<Vec<AnyObject>> {
        let dirty: Vec<(Oid, AnyObject)> = self
            .dirty
            .borrow()
            .iter()
            .map(|(oid, obj)| (*oid, obj.clone()))
            .collect();
        let mut pending = Vec::new();
        for (oid, obj) in dirty {
            if let Some(table) = table {
                if self.registry().table_of(obj.cell_type_id()) != Some(table) {
                    continue;
                }
            }
            if !self.with_kv(|kv| Ok(kv.contains_key(&object_key(oid))?))? {
                pending.push(obj);
            }
        }
        Ok(pending)
    }

    /// Deletes every stored instance of `T` and returns how many were deleted.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is closed or read-only.
    pub fn delete_all<T: Persist>(&self) -> CoreResult<usize> {
        self.ensure_writable()?;
        let objects = self.enumerate::<T>()?.collect::<CoreResult<Vec<_>>>()?;
        for obj in &objects {
            self.delete(obj)?;
        }
        Ok(objects.len())
    }

    /// Returns the single instance of `T`, creating and storing it on first use.
    ///
    /// In a read-only transaction a missing singleton is returned as a fresh,
    /// untracked instance.
    ///
    /// # Errors
    ///
    /// Fails if the type is not registered and auto-registration is off.
    pub fn singleton<T: Persist>(&self) -> CoreResult<Obj<T>> {
        self.ensure_open()?;
        let table = self.bind::<T>()?;
        self.registry()
            .ensure_client_version(TableFamily::Objects, table)?;
        if let Some(oid) = self.registry().singleton(table) {
            if let Some(obj) = self.get::<T>(oid)? {
                return Ok(obj);
            }
        }
        let obj = Obj::new(T::create());
        if self.read_only {
            return Ok(obj);
        }
        let oid = self.store(&obj)?;
        self.registry().set_singleton(table, oid)?;
        self.updated_tables.borrow_mut().insert(table);
        Ok(obj)
    }

    /// Names of object types that have a singleton.
    #[must_use]
    pub fn enumerate_singleton_types(&self) -> Vec<String> {
        self.registry().singleton_names()
    }

    /// Names of all known relations.
    #[must_use]
    pub fn enumerate_relation_names(&self) -> Vec<String> {
        self.registry().names(TableFamily::Relations)
    }

    /// Opens the relation `R`, registering it on first use if allowed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnregisteredType`] if the relation is unknown and
    /// auto-registration is off, and [`CoreError::SchemaMismatch`] if its
    /// primary key differs from a stored version.
    pub fn relation<R: Relation>(&self) -> CoreResult<RelationTable<'_, R>> {
        RelationTable::open(self)
    }

    /// Records that relation `id` is written by this transaction.
    ///
    /// Returns true the first time the relation's secondary indexes must be
    /// rebuilt in this transaction.
    pub(crate) fn touch_relation(&self, id: TableId) -> bool {
        self.updated_relations.borrow_mut().insert(id);
        self.registry().needs_secondary_rebuild(id)
            && self.rebuilt_relations.borrow_mut().insert(id)
    }

    /// Returns true the first time the creation hook of `id` may run here.
    pub(crate) fn claim_relation_creation(&self, id: TableId) -> bool {
        !self.read_only
            && self.registry().on_create_pending(id)
            && self.created_relations.borrow_mut().insert(id)
    }

    /// Erases every object, dictionary and relation row.
    ///
    /// Table and relation metadata are kept.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is closed or read-only.
    pub fn delete_all_data(&self) -> CoreResult<()> {
        self.ensure_writable()?;
        self.dirty.borrow_mut().clear();
        *self.cache.borrow_mut() = ObjectCache::new(self.shared.options.cache_upgrade_threshold);
        let erased = self.with_kv_mut(|kv| {
            let mut erased = 0;
            for prefix in [
                layout::OBJECTS,
                layout::DICTIONARIES,
                layout::RELATION_ROWS,
                layout::RELATION_SECONDARY,
            ] {
                erased += kv.erase_prefix(&[prefix])?;
            }
            Ok(erased)
        })?;
        debug!(db = self.log_name(), erased, "all data erased");
        Ok(())
    }

    /// Reads the commit auxiliary value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionClosed`] after commit or dispose.
    pub fn commit_ulong(&self) -> CoreResult<u64> {
        self.with_kv(|kv| Ok(kv.commit_ulong()))
    }

    /// Sets the commit auxiliary value.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is closed or read-only.
    pub fn set_commit_ulong(&self, value: u64) -> CoreResult<()> {
        self.with_kv_mut(|kv| Ok(kv.set_commit_ulong(value)?))
    }

    /// Whether the store advises rolling this transaction back.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionClosed`] after commit or dispose.
    pub fn rollback_advised(&self) -> CoreResult<bool> {
        self.with_kv(|kv| Ok(kv.rollback_advised()))
    }

    /// Sets the rollback advice flag.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionClosed`] after commit or dispose.
    pub fn set_rollback_advised(&self, advised: bool) -> CoreResult<()> {
        self.ensure_open()?;
        let mut guard = self.kv.borrow_mut();
        let kv = guard.as_deref_mut().ok_or(CoreError::TransactionClosed)?;
        kv.set_rollback_advised(advised);
        Ok(())
    }

    /// Writes every dirty object and commits.
    ///
    /// Writing an object may store objects it references, so the dirty set
    /// is drained repeatedly until it stays empty. Table metadata becomes
    /// durable in the registry only once the key-value commit succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionClosed`] if already committed or
    /// disposed. Errors before the key-value commit leave the transaction
    /// open so it can be disposed.
    pub fn commit(&self) -> CoreResult<()> {
        self.ensure_open()?;
        if self.read_only {
            let kv = self.kv.borrow_mut().take();
            self.state.set(TransactionState::Committed);
            if let Some(kv) = kv {
                kv.commit()?;
            }
            return Ok(());
        }

        let mut rounds = 0usize;
        let mut flushed = 0usize;
        loop {
            let batch = std::mem::take(&mut *self.dirty.borrow_mut());
            if batch.is_empty() {
                break;
            }
            rounds += 1;
            let mut pending = batch.into_iter();
            while let Some((oid, obj)) = pending.next() {
                let state = self.cache.borrow().metadata(&obj).map(|m| m.state);
                if state != Some(ObjectState::Dirty) {
                    continue;
                }
                if let Err(err) = self.write_object_row(&obj, oid) {
                    // Unwritten objects stay queued so a retried commit writes them.
                    let mut dirty = self.dirty.borrow_mut();
                    dirty.insert(oid, obj);
                    dirty.extend(pending);
                    return Err(err);
                }
                if let Some(meta) = self.cache.borrow_mut().metadata_mut(&obj) {
                    meta.state = ObjectState::Read;
                }
                flushed += 1;
            }
        }

        let persisted = self.persist_metadata()?;
        self.persist_counters()?;

        let kv = self
            .kv
            .borrow_mut()
            .take()
            .ok_or(CoreError::TransactionClosed)?;
        self.state.set(TransactionState::Committed);
        kv.commit()?;

        for (family, id, version, singleton) in persisted {
            self.registry()
                .mark_persisted(family, id, version, singleton);
        }
        debug!(db = self.log_name(), flushed, rounds, "transaction committed");
        Ok(())
    }

    fn persist_metadata(&self) -> CoreResult<Vec<(TableFamily, TableId, Option<u32>, Option<Oid>)>> {
        let mut persisted = Vec::new();
        for (family, tables) in [
            (TableFamily::Objects, &self.updated_tables),
            (TableFamily::Relations, &self.updated_relations),
        ] {
            let ids: Vec<TableId> = tables.borrow().iter().copied().collect();
            for id in ids {
                let work = self.registry().pending_persist(family, id)?;
                self.with_kv_mut(|kv| {
                    put_if_changed(kv, &work.name_key, &work.name)?;
                    if let Some((key, value, _)) = &work.version {
                        put_if_changed(kv, key, value)?;
                    }
                    if let Some((key, value, _)) = &work.singleton {
                        put_if_changed(kv, key, value)?;
                    }
                    Ok(())
                })?;
                persisted.push((
                    family,
                    id,
                    work.version.as_ref().map(|v| v.2),
                    work.singleton.as_ref().map(|s| s.2),
                ));
            }
        }
        Ok(persisted)
    }

    fn persist_counters(&self) -> CoreResult<()> {
        let last_oid = self.shared.last_oid.load(Ordering::SeqCst);
        let last_dict = self.shared.last_dict_id.load(Ordering::SeqCst);
        self.with_kv_mut(|kv| {
            for (tag, value) in [
                (layout::LAST_OID_COUNTER, last_oid),
                (layout::LAST_DICT_COUNTER, last_dict),
            ] {
                let mut writer = ByteWriter::new();
                writer.write_vuint(value);
                put_if_changed(kv, &counter_key(tag), writer.as_bytes())?;
            }
            Ok(())
        })
    }

    /// Discards the transaction without committing.
    ///
    /// Disposing a closed transaction is a no-op.
    pub fn dispose(&self) {
        if self.state.get().is_closed() {
            return;
        }
        self.kv.borrow_mut().take();
        self.dirty.borrow_mut().clear();
        self.state.set(TransactionState::Disposed);
    }
}

fn put_if_changed(kv: &mut dyn KeyValueTransaction, key: &[u8], value: &[u8]) -> CoreResult<()> {
    if kv.get(key)?.as_deref() != Some(value) {
        kv.create_or_update(key, value)?;
    }
    Ok(())
}

impl Drop for ObjectTransaction {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ObjectTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectTransaction")
            .field("db", &self.log_name())
            .field("state", &self.state.get())
            .field("read_only", &self.read_only)
            .field("dirty", &self.dirty.borrow().len())
            .finish_non_exhaustive()
    }
}
