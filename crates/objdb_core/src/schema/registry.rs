//! Table and relation registry.
//!
//! The registry maps persisted names to numeric ids, binds ids to live Rust
//! types, and tracks the version history of every table. It is owned by one
//! [`crate::ObjectDb`] and shared by all of its transactions.
//!
//! New ids and new versions are allocated in memory first. They reach the
//! store only when a writing transaction first stores data under them, and
//! they are marked durable only after that transaction commits.

use crate::codec::LoadPlan;
use crate::error::{CoreError, CoreResult};
use crate::layout::{self, name_key, parse_ids, table_id_from, version_key};
use crate::object::{cell_type_id_of, AnyObject, Persist};
use crate::relation::Relation;
use crate::schema::{FieldDef, SecondaryKeyDef, VersionSchema};
use crate::types::{Oid, TableId};
use crate::value::{Record, Value};
use objdb_codec::{ByteReader, ByteWriter};
use objdb_storage::KeyValueTransaction;
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Which id space a table lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableFamily {
    /// Free-form objects addressed by oid.
    Objects,
    /// Typed relations addressed by primary key.
    Relations,
}

impl TableFamily {
    pub(crate) const fn name_prefix(self) -> u8 {
        match self {
            Self::Objects => layout::TABLE_NAMES,
            Self::Relations => layout::RELATION_NAMES,
        }
    }

    pub(crate) const fn version_prefix(self) -> u8 {
        match self {
            Self::Objects => layout::TABLE_VERSIONS,
            Self::Relations => layout::RELATION_VERSIONS,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Objects => "table",
            Self::Relations => "relation",
        }
    }
}

/// Type-erased entry points of a [`Persist`] type.
#[derive(Clone, Copy)]
pub(crate) struct TypeBinding {
    pub type_name: &'static str,
    pub create: fn() -> AnyObject,
    pub save: fn(&AnyObject) -> CoreResult<Vec<Value>>,
    pub load: fn(&AnyObject, &mut Record) -> CoreResult<()>,
}

impl TypeBinding {
    pub(crate) fn of<T: Persist>() -> Self {
        Self {
            type_name: T::TYPE_NAME,
            create: create_erased::<T>,
            save: save_erased::<T>,
            load: load_erased::<T>,
        }
    }
}

impl std::fmt::Debug for TypeBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeBinding")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

fn create_erased<T: Persist>() -> AnyObject {
    AnyObject::new(T::create())
}

fn save_erased<T: Persist>(obj: &AnyObject) -> CoreResult<Vec<Value>> {
    let cell = obj
        .downcast_ref::<T>()
        .ok_or_else(|| CoreError::type_mismatch(T::TYPE_NAME, format!("{obj:?}")))?;
    let value = cell.try_borrow().map_err(|_| {
        CoreError::invalid_operation(format!("{} is mutably borrowed", T::TYPE_NAME))
    })?;
    Ok(value.save())
}

fn load_erased<T: Persist>(obj: &AnyObject, record: &mut Record) -> CoreResult<()> {
    let cell = obj
        .downcast_ref::<T>()
        .ok_or_else(|| CoreError::type_mismatch(T::TYPE_NAME, format!("{obj:?}")))?;
    let mut value = cell.try_borrow_mut().map_err(|_| {
        CoreError::invalid_operation(format!("{} is borrowed during load", T::TYPE_NAME))
    })?;
    value.load(record)
}

/// Field layout declared by the live type.
#[derive(Debug)]
pub(crate) struct ClientLayout {
    pub primary_key: Vec<FieldDef>,
    pub fields: Vec<FieldDef>,
    pub secondary_keys: Vec<SecondaryKeyDef>,
}

impl ClientLayout {
    fn schema(&self) -> VersionSchema {
        VersionSchema::for_relation(&self.primary_key, &self.fields, &self.secondary_keys)
    }
}

/// The current version of a table as seen by the live type.
#[derive(Debug, Clone)]
pub(crate) struct ClientVersion {
    pub id: TableId,
    pub name: String,
    pub version: u32,
    pub schema: Arc<VersionSchema>,
}

/// Metadata records a writing transaction must put before committing.
#[derive(Debug)]
pub(crate) struct PersistWork {
    pub name_key: Vec<u8>,
    pub name: Vec<u8>,
    pub version: Option<(Vec<u8>, Vec<u8>, u32)>,
    pub singleton: Option<(Vec<u8>, Vec<u8>, Oid)>,
}

#[derive(Debug)]
struct TableInfo {
    id: TableId,
    name: String,
    name_persisted: bool,
    versions: BTreeMap<u32, Arc<VersionSchema>>,
    last_persisted_version: u32,
    client_version: Option<u32>,
    client: Option<Arc<ClientLayout>>,
    loaders: HashMap<u32, Arc<LoadPlan>>,
    singleton: Option<Oid>,
    singleton_persisted: Option<Oid>,
    on_create_pending: bool,
    rebuild_secondary: bool,
}

impl TableInfo {
    fn new(id: TableId, name: String, persisted: bool) -> Self {
        Self {
            id,
            name,
            name_persisted: persisted,
            versions: BTreeMap::new(),
            last_persisted_version: 0,
            client_version: None,
            client: None,
            loaders: HashMap::new(),
            singleton: None,
            singleton_persisted: None,
            on_create_pending: !persisted,
            rebuild_secondary: false,
        }
    }
}

#[derive(Debug, Default)]
struct TableSet {
    by_id: BTreeMap<TableId, TableInfo>,
    by_name: HashMap<String, TableId>,
    last_id: u32,
}

impl TableSet {
    fn insert(&mut self, info: TableInfo) {
        self.last_id = self.last_id.max(info.id.as_u32());
        self.by_name.insert(info.name.clone(), info.id);
        self.by_id.insert(info.id, info);
    }

    fn allocate(&mut self, name: &str, family: TableFamily) -> TableId {
        let id = TableId::new(self.last_id + 1);
        info!(table = name, id = id.as_u32(), kind = family.label(), "allocated table id");
        self.insert(TableInfo::new(id, name.to_owned(), false));
        id
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    objects: TableSet,
    relations: TableSet,
    object_bindings: HashMap<TypeId, TableId>,
    relation_bindings: HashMap<TypeId, TableId>,
    table_bindings: HashMap<TableId, TypeBinding>,
}

impl RegistryState {
    fn set(&self, family: TableFamily) -> &TableSet {
        match family {
            TableFamily::Objects => &self.objects,
            TableFamily::Relations => &self.relations,
        }
    }

    fn set_mut(&mut self, family: TableFamily) -> &mut TableSet {
        match family {
            TableFamily::Objects => &mut self.objects,
            TableFamily::Relations => &mut self.relations,
        }
    }

    fn table(&self, family: TableFamily, id: TableId) -> CoreResult<&TableInfo> {
        self.set(family)
            .by_id
            .get(&id)
            .ok_or(CoreError::UnknownStorageTypeId {
                table_id: id.as_u32(),
            })
    }

    fn table_mut(&mut self, family: TableFamily, id: TableId) -> CoreResult<&mut TableInfo> {
        self.set_mut(family)
            .by_id
            .get_mut(&id)
            .ok_or(CoreError::UnknownStorageTypeId {
                table_id: id.as_u32(),
            })
    }
}

/// Registry of persisted tables and relations.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    state: RwLock<RegistryState>,
    type_names: HashMap<TypeId, String>,
}

fn decode_name(value: &[u8]) -> CoreResult<String> {
    Ok(ByteReader::new(value).read_str()?.to_owned())
}

fn encode_name(name: &str) -> Vec<u8> {
    let mut writer = ByteWriter::new();
    writer.write_str(name);
    writer.into_bytes()
}

fn scan(
    kv: &dyn KeyValueTransaction,
    prefix: &[u8],
    mut visit: impl FnMut(&[u8], &[u8]) -> CoreResult<()>,
) -> CoreResult<()> {
    let mut last: Option<Vec<u8>> = None;
    while let Some((key, value)) = kv.next_entry(prefix, last.as_deref())? {
        visit(&key, &value)?;
        last = Some(key);
    }
    Ok(())
}

impl SchemaRegistry {
    /// Loads table names, versions and singletons from the store.
    pub(crate) fn load(kv: &dyn KeyValueTransaction) -> CoreResult<Self> {
        let mut state = RegistryState::default();
        for family in [TableFamily::Objects, TableFamily::Relations] {
            let set = state.set_mut(family);
            scan(kv, &[family.name_prefix()], |key, value| {
                let ids = parse_ids(key, family.name_prefix(), 1)?;
                let id = table_id_from(ids[0])?;
                set.insert(TableInfo::new(id, decode_name(value)?, true));
                Ok(())
            })?;
            scan(kv, &[family.version_prefix()], |key, value| {
                let ids = parse_ids(key, family.version_prefix(), 2)?;
                let id = table_id_from(ids[0])?;
                let version = u32::try_from(ids[1])
                    .map_err(|_| CoreError::invalid_format("version out of range"))?;
                let schema: VersionSchema = objdb_codec::from_record(value)?;
                if let Some(table) = set.by_id.get_mut(&id) {
                    table.versions.insert(version, Arc::new(schema));
                    table.last_persisted_version = table.last_persisted_version.max(version);
                }
                Ok(())
            })?;
        }
        scan(kv, &[layout::SINGLETONS], |key, value| {
            let ids = parse_ids(key, layout::SINGLETONS, 1)?;
            let id = table_id_from(ids[0])?;
            let oid = Oid::new(ByteReader::new(value).read_vuint()?);
            if let Some(table) = state.objects.by_id.get_mut(&id) {
                table.singleton = Some(oid);
                table.singleton_persisted = Some(oid);
            }
            Ok(())
        })?;
        debug!(
            tables = state.objects.by_id.len(),
            relations = state.relations.by_id.len(),
            "schema registry loaded"
        );
        Ok(Self {
            state: RwLock::new(state),
            type_names: HashMap::new(),
        })
    }

    /// Replaces the declared persisted names of the given types.
    #[must_use]
    pub(crate) fn with_type_names(mut self, type_names: HashMap<TypeId, String>) -> Self {
        self.type_names = type_names;
        self
    }

    fn persisted_name<T: 'static>(&self, declared: &'static str) -> &str {
        self.type_names
            .get(&TypeId::of::<T>())
            .map_or(declared, String::as_str)
    }

    /// Resolves the table of a persisted type, registering it if allowed.
    pub(crate) fn bind_object<T: Persist>(&self, auto_register: bool) -> CoreResult<TableId> {
        let type_id = cell_type_id_of::<T>();
        if let Some(id) = self.state.read().object_bindings.get(&type_id) {
            return Ok(*id);
        }
        let name = self.persisted_name::<T>(T::TYPE_NAME);
        let mut state = self.state.write();
        if let Some(id) = state.object_bindings.get(&type_id) {
            return Ok(*id);
        }
        let id = match state.objects.by_name.get(name) {
            Some(id) => {
                if let Some(other) = state.table_bindings.get(id) {
                    return Err(CoreError::invalid_operation(format!(
                        "table {name} is already bound to {}",
                        other.type_name
                    )));
                }
                *id
            }
            None if auto_register => state.objects.allocate(name, TableFamily::Objects),
            None => return Err(CoreError::unregistered_type(name)),
        };
        let layout = ClientLayout {
            primary_key: Vec::new(),
            fields: T::fields(),
            secondary_keys: Vec::new(),
        };
        state.table_mut(TableFamily::Objects, id)?.client = Some(Arc::new(layout));
        state.object_bindings.insert(type_id, id);
        state.table_bindings.insert(id, TypeBinding::of::<T>());
        Ok(id)
    }

    /// Resolves the id of a relation, registering it if allowed.
    pub(crate) fn bind_relation<R: Relation>(&self, auto_register: bool) -> CoreResult<TableId> {
        let type_id = TypeId::of::<R>();
        if let Some(id) = self.state.read().relation_bindings.get(&type_id) {
            return Ok(*id);
        }
        let name = self.persisted_name::<R>(R::NAME);
        let mut state = self.state.write();
        if let Some(id) = state.relation_bindings.get(&type_id) {
            return Ok(*id);
        }
        let id = match state.relations.by_name.get(name) {
            Some(id) if state.relation_bindings.values().any(|bound| bound == id) => {
                return Err(CoreError::invalid_operation(format!(
                    "relation {name} is already bound to another type"
                )));
            }
            Some(id) => *id,
            None if auto_register => state.relations.allocate(name, TableFamily::Relations),
            None => return Err(CoreError::unregistered_type(name)),
        };
        let layout = ClientLayout {
            primary_key: R::primary_key(),
            fields: R::fields(),
            secondary_keys: R::secondary_keys(),
        };
        state.table_mut(TableFamily::Relations, id)?.client = Some(Arc::new(layout));
        state.relation_bindings.insert(type_id, id);
        Ok(id)
    }

    /// Returns the live type bound to an object table.
    pub(crate) fn binding(&self, id: TableId) -> Option<TypeBinding> {
        self.state.read().table_bindings.get(&id).copied()
    }

    /// Returns the table bound to a live type, if any.
    pub(crate) fn table_of(&self, type_id: TypeId) -> Option<TableId> {
        self.state.read().object_bindings.get(&type_id).copied()
    }

    /// Derives the client schema and resolves its version number.
    ///
    /// An unchanged layout reuses the latest stored version. A changed one
    /// gets `latest + 1`, persisted by the first transaction that writes it.
    pub(crate) fn ensure_client_version(
        &self,
        family: TableFamily,
        id: TableId,
    ) -> CoreResult<ClientVersion> {
        {
            let state = self.state.read();
            let table = state.table(family, id)?;
            if let Some(version) = table.client_version.filter(|_| table.client.is_some()) {
                if let Some(schema) = table.versions.get(&version) {
                    return Ok(ClientVersion {
                        id,
                        name: table.name.clone(),
                        version,
                        schema: Arc::clone(schema),
                    });
                }
            }
        }

        let mut state = self.state.write();
        let table = state.table_mut(family, id)?;
        let layout = table
            .client
            .clone()
            .ok_or_else(|| CoreError::unregistered_type(table.name.clone()))?;
        let schema = layout.schema();

        if family == TableFamily::Relations {
            for field in schema.primary_key.iter().chain(
                schema
                    .secondary_keys
                    .iter()
                    .flat_map(|sk| sk.fields.iter())
                    .filter_map(|name| schema.any_field(name)),
            ) {
                if !field.kind.allowed_in_key() {
                    return Err(CoreError::unsupported_type(format!(
                        "{:?} as key field {} of {}",
                        field.kind, field.name, table.name
                    )));
                }
            }
            for sk in &schema.secondary_keys {
                if let Some(missing) = sk.fields.iter().find(|f| schema.any_field(f).is_none()) {
                    return Err(CoreError::schema_mismatch(
                        table.name.clone(),
                        format!("secondary key {} names unknown field {missing}", sk.name),
                    ));
                }
            }
            if let Some((version, _)) = table
                .versions
                .iter()
                .find(|(_, stored)| stored.primary_key != schema.primary_key)
            {
                return Err(CoreError::schema_mismatch(
                    table.name.clone(),
                    format!("primary key differs from version {version}"),
                ));
            }
        }

        let latest = table.versions.last_key_value().map(|(v, s)| (*v, Arc::clone(s)));
        let version = match latest {
            Some((version, stored)) if *stored == schema => version,
            Some((version, stored)) => {
                let next = version + 1;
                table.rebuild_secondary = stored.secondary_keys != schema.secondary_keys;
                info!(table = %table.name, version = next, "new schema version");
                table.versions.insert(next, Arc::new(schema));
                next
            }
            None => {
                debug!(table = %table.name, "first schema version");
                table.versions.insert(1, Arc::new(schema));
                1
            }
        };
        table.client_version = Some(version);
        let schema = table
            .versions
            .get(&version)
            .cloned()
            .ok_or_else(|| CoreError::invalid_operation("client version vanished"))?;
        Ok(ClientVersion {
            id,
            name: table.name.clone(),
            version,
            schema,
        })
    }

    /// Returns the schema a row of `version` was written with.
    pub(crate) fn stored_schema(
        &self,
        family: TableFamily,
        id: TableId,
        version: u32,
        kv: &dyn KeyValueTransaction,
    ) -> CoreResult<Arc<VersionSchema>> {
        if let Some(schema) = self.state.read().table(family, id)?.versions.get(&version) {
            return Ok(Arc::clone(schema));
        }
        let bytes = kv
            .get(&version_key(family.version_prefix(), id, version))?
            .ok_or_else(|| {
                CoreError::invalid_format(format!("{id} has no stored version {version}"))
            })?;
        let schema = Arc::new(objdb_codec::from_record::<VersionSchema>(&bytes)?);
        let mut state = self.state.write();
        let table = state.table_mut(family, id)?;
        table.last_persisted_version = table.last_persisted_version.max(version);
        Ok(Arc::clone(table.versions.entry(version).or_insert(schema)))
    }

    /// Returns the memoised decoder from `version` into the client layout.
    pub(crate) fn load_plan(
        &self,
        family: TableFamily,
        id: TableId,
        version: u32,
        kv: &dyn KeyValueTransaction,
    ) -> CoreResult<Arc<LoadPlan>> {
        if let Some(plan) = self.state.read().table(family, id)?.loaders.get(&version) {
            return Ok(Arc::clone(plan));
        }
        let stored = self.stored_schema(family, id, version, kv)?;
        let mut state = self.state.write();
        let table = state.table_mut(family, id)?;
        let layout = table
            .client
            .clone()
            .ok_or(CoreError::UnknownStorageTypeId {
                table_id: id.as_u32(),
            })?;
        let plan = table
            .loaders
            .entry(version)
            .or_insert_with(|| Arc::new(LoadPlan::build(&stored, &layout.fields)));
        Ok(Arc::clone(plan))
    }

    /// Records the singleton instance of an object table.
    pub(crate) fn set_singleton(&self, id: TableId, oid: Oid) -> CoreResult<()> {
        self.state.write().table_mut(TableFamily::Objects, id)?.singleton = Some(oid);
        Ok(())
    }

    /// Returns the singleton instance of an object table.
    pub(crate) fn singleton(&self, id: TableId) -> Option<Oid> {
        self.state
            .read()
            .objects
            .by_id
            .get(&id)
            .and_then(|table| table.singleton)
    }

    /// Returns true while a relation's creation hook has not run durably.
    pub(crate) fn on_create_pending(&self, id: TableId) -> bool {
        self.state
            .read()
            .relations
            .by_id
            .get(&id)
            .is_some_and(|table| table.on_create_pending)
    }

    /// Returns true if a relation's secondary keys changed with its new version.
    pub(crate) fn needs_secondary_rebuild(&self, id: TableId) -> bool {
        self.state
            .read()
            .relations
            .by_id
            .get(&id)
            .is_some_and(|table| table.rebuild_secondary)
    }

    /// Collects the metadata records a table still needs in the store.
    pub(crate) fn pending_persist(
        &self,
        family: TableFamily,
        id: TableId,
    ) -> CoreResult<PersistWork> {
        let state = self.state.read();
        let table = state.table(family, id)?;
        let version = match table.client_version {
            Some(version) if version > table.last_persisted_version => {
                let schema = table.versions.get(&version).ok_or_else(|| {
                    CoreError::invalid_operation(format!("{id} lost version {version}"))
                })?;
                Some((
                    version_key(family.version_prefix(), id, version),
                    objdb_codec::to_record(schema.as_ref())?,
                    version,
                ))
            }
            _ => None,
        };
        let singleton = match table.singleton {
            Some(oid) if table.singleton_persisted != Some(oid) => {
                let mut writer = ByteWriter::new();
                writer.write_vuint(oid.as_u64());
                Some((layout::singleton_key(id), writer.into_bytes(), oid))
            }
            _ => None,
        };
        Ok(PersistWork {
            name_key: name_key(family.name_prefix(), id),
            name: encode_name(&table.name),
            version,
            singleton,
        })
    }

    /// Marks metadata durable after the writing transaction committed.
    pub(crate) fn mark_persisted(
        &self,
        family: TableFamily,
        id: TableId,
        version: Option<u32>,
        singleton: Option<Oid>,
    ) {
        let mut state = self.state.write();
        if let Ok(table) = state.table_mut(family, id) {
            table.name_persisted = true;
            table.on_create_pending = false;
            if let Some(version) = version {
                if version > table.last_persisted_version {
                    debug!(table = %table.name, version, "schema version persisted");
                    table.last_persisted_version = version;
                    table.rebuild_secondary = false;
                }
            }
            if singleton.is_some() {
                table.singleton_persisted = singleton;
            }
        }
    }

    /// Name of a table.
    #[must_use]
    pub fn table_name(&self, family: TableFamily, id: TableId) -> Option<String> {
        self.state
            .read()
            .set(family)
            .by_id
            .get(&id)
            .map(|table| table.name.clone())
    }

    /// Id of a table by name.
    #[must_use]
    pub fn table_id(&self, family: TableFamily, name: &str) -> Option<TableId> {
        self.state.read().set(family).by_name.get(name).copied()
    }

    /// Names of all known tables of a family, ordered by id.
    #[must_use]
    pub fn names(&self, family: TableFamily) -> Vec<String> {
        self.state
            .read()
            .set(family)
            .by_id
            .values()
            .map(|table| table.name.clone())
            .collect()
    }

    /// Names of object tables that have a singleton.
    #[must_use]
    pub fn singleton_names(&self) -> Vec<String> {
        self.state
            .read()
            .objects
            .by_id
            .values()
            .filter(|table| table.singleton.is_some())
            .map(|table| table.name.clone())
            .collect()
    }

    /// Known version numbers of a table, ascending.
    #[must_use]
    pub fn versions(&self, family: TableFamily, id: TableId) -> Vec<u32> {
        self.state
            .read()
            .set(family)
            .by_id
            .get(&id)
            .map(|table| table.versions.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Highest version known to be durable in the store.
    #[must_use]
    pub fn last_persisted_version(&self, family: TableFamily, id: TableId) -> u32 {
        self.state
            .read()
            .set(family)
            .by_id
            .get(&id)
            .map_or(0, |table| table.last_persisted_version)
    }

    /// Returns true once the table's name record is durable.
    #[must_use]
    pub fn is_persisted(&self, family: TableFamily, id: TableId) -> bool {
        self.state
            .read()
            .set(family)
            .by_id
            .get(&id)
            .is_some_and(|table| table.name_persisted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldKind;
    use objdb_storage::{BTreeKeyValueDb, KeyValueDb};

    struct Counter {
        hits: u64,
    }

    impl Persist for Counter {
        const TYPE_NAME: &'static str = "Counter";

        fn fields() -> Vec<FieldDef> {
            vec![FieldDef::new("hits", FieldKind::U64)]
        }

        fn create() -> Self {
            Self { hits: 0 }
        }

        fn save(&self) -> Vec<Value> {
            vec![Value::U64(self.hits)]
        }

        fn load(&mut self, record: &mut Record) -> CoreResult<()> {
            self.hits = record.take_u64("hits")?;
            Ok(())
        }
    }

    struct OtherCounter;

    impl Persist for OtherCounter {
        const TYPE_NAME: &'static str = "Counter";

        fn fields() -> Vec<FieldDef> {
            Vec::new()
        }

        fn create() -> Self {
            Self
        }

        fn save(&self) -> Vec<Value> {
            Vec::new()
        }

        fn load(&mut self, _: &mut Record) -> CoreResult<()> {
            Ok(())
        }
    }

    fn empty_registry() -> SchemaRegistry {
        let db = BTreeKeyValueDb::in_memory();
        let tx = db.begin_read().unwrap();
        SchemaRegistry::load(tx.as_ref()).unwrap()
    }

    #[test]
    fn auto_registration_allocates_ids() {
        let registry = empty_registry();
        let id = registry.bind_object::<Counter>(true).unwrap();
        assert_eq!(id, TableId::new(1));
        assert_eq!(registry.bind_object::<Counter>(false).unwrap(), id);
        assert_eq!(registry.table_name(TableFamily::Objects, id).unwrap(), "Counter");
        assert!(!registry.is_persisted(TableFamily::Objects, id));
    }

    #[test]
    fn custom_type_name_replaces_the_declared_one() {
        let mut names = HashMap::new();
        names.insert(TypeId::of::<OtherCounter>(), "Tally".to_owned());
        let registry = empty_registry().with_type_names(names);
        let counter = registry.bind_object::<Counter>(true).unwrap();
        let other = registry.bind_object::<OtherCounter>(true).unwrap();
        assert_ne!(counter, other);
        assert_eq!(registry.table_name(TableFamily::Objects, other).unwrap(), "Tally");
        assert_eq!(registry.table_id(TableFamily::Objects, "Tally"), Some(other));
    }

    #[test]
    fn disabled_auto_registration_fails() {
        let registry = empty_registry();
        let err = registry.bind_object::<Counter>(false).unwrap_err();
        assert!(matches!(err, CoreError::UnregisteredType { .. }));
    }

    #[test]
    fn name_conflict_between_types_is_rejected() {
        let registry = empty_registry();
        registry.bind_object::<Counter>(true).unwrap();
        let err = registry.bind_object::<OtherCounter>(true).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }

    #[test]
    fn same_layout_reuses_version() {
        let registry = empty_registry();
        let id = registry.bind_object::<Counter>(true).unwrap();
        let first = registry
            .ensure_client_version(TableFamily::Objects, id)
            .unwrap();
        let again = registry
            .ensure_client_version(TableFamily::Objects, id)
            .unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(again.version, 1);

        let work = registry.pending_persist(TableFamily::Objects, id).unwrap();
        assert_eq!(work.version.as_ref().map(|v| v.2), Some(1));
        registry.mark_persisted(TableFamily::Objects, id, Some(1), None);
        assert_eq!(registry.last_persisted_version(TableFamily::Objects, id), 1);
        let work = registry.pending_persist(TableFamily::Objects, id).unwrap();
        assert!(work.version.is_none());
    }

    #[test]
    fn load_reads_persisted_metadata() {
        let db = BTreeKeyValueDb::in_memory();
        {
            let mut tx = db.begin_write().unwrap();
            tx.create_or_update(&name_key(layout::TABLE_NAMES, TableId::new(3)), &encode_name("Counter"))
                .unwrap();
            let schema = VersionSchema::for_object(&Counter::fields());
            tx.create_or_update(
                &version_key(layout::TABLE_VERSIONS, TableId::new(3), 4),
                &objdb_codec::to_record(&schema).unwrap(),
            )
            .unwrap();
            tx.commit().unwrap();
        }
        let tx = db.begin_read().unwrap();
        let registry = SchemaRegistry::load(tx.as_ref()).unwrap();
        let id = registry.bind_object::<Counter>(false).unwrap();
        assert_eq!(id, TableId::new(3));
        let client = registry
            .ensure_client_version(TableFamily::Objects, id)
            .unwrap();
        assert_eq!(client.version, 4);
        assert!(registry.is_persisted(TableFamily::Objects, id));
        assert_eq!(registry.names(TableFamily::Objects), vec!["Counter".to_owned()]);
    }
}
