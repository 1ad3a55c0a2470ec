//! Database facade.

use crate::config::DbOptions;
use crate::error::CoreResult;
use crate::layout::{counter_key, LAST_DICT_COUNTER, LAST_OID_COUNTER};
use crate::object::Persist;
use crate::relation::Relation;
use crate::schema::{SchemaRegistry, TableFamily};
use crate::transaction::ObjectTransaction;
use objdb_codec::ByteReader;
use objdb_storage::{BTreeKeyValueDb, KeyValueDb, KeyValueTransaction, StoreConfig};
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tracing::info;

/// State shared by a database and all of its transactions.
pub(crate) struct DbShared {
    pub kv: Arc<dyn KeyValueDb>,
    pub registry: SchemaRegistry,
    pub options: DbOptions,
    pub last_oid: AtomicU64,
    pub last_dict_id: AtomicU64,
}

/// The object database handle.
///
/// `ObjectDb` maps Rust objects and typed relations onto an ordered
/// key-value store. It owns the schema registry and the oid and dictionary
/// id counters. Everything else lives in the transactions it begins.
///
/// # Example
///
/// ```rust
/// use objdb_core::{CoreResult, FieldDef, FieldKind, ObjectDb, Obj, Persist, Record, Value};
///
/// struct Counter {
///     hits: u64,
/// }
///
/// impl Persist for Counter {
///     const TYPE_NAME: &'static str = "Counter";
///
///     fn fields() -> Vec<FieldDef> {
///         vec![FieldDef::new("hits", FieldKind::U64)]
///     }
///
///     fn create() -> Self {
///         Self { hits: 0 }
///     }
///
///     fn save(&self) -> Vec<Value> {
///         vec![Value::U64(self.hits)]
///     }
///
///     fn load(&mut self, record: &mut Record) -> CoreResult<()> {
///         self.hits = record.take_u64("hits")?;
///         Ok(())
///     }
/// }
///
/// let db = ObjectDb::open_in_memory()?;
/// let oid = db.transaction(|tx| tx.store(&Obj::new(Counter { hits: 3 })))?;
///
/// let tx = db.begin_read()?;
/// let counter = tx.get::<Counter>(oid)?.unwrap();
/// assert_eq!(counter.borrow().hits, 3);
/// # Ok::<(), objdb_core::CoreError>(())
/// ```
pub struct ObjectDb {
    shared: Arc<DbShared>,
}

fn read_counter(kv: &dyn KeyValueTransaction, tag: u8) -> CoreResult<u64> {
    match kv.get(&counter_key(tag))? {
        Some(bytes) => Ok(ByteReader::new(&bytes).read_vuint()?),
        None => Ok(0),
    }
}

impl ObjectDb {
    /// Opens an object database over an existing key-value store.
    ///
    /// Table names, schema versions and id counters are loaded from the
    /// store.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored metadata cannot be read.
    pub fn open_with_options(kv: Arc<dyn KeyValueDb>, options: DbOptions) -> CoreResult<Self> {
        let (registry, last_oid, last_dict_id) = {
            let tx = kv.begin_read()?;
            let registry =
                SchemaRegistry::load(tx.as_ref())?.with_type_names(options.type_names.clone());
            let last_oid = read_counter(tx.as_ref(), LAST_OID_COUNTER)?;
            let last_dict_id = read_counter(tx.as_ref(), LAST_DICT_COUNTER)?;
            (registry, last_oid, last_dict_id)
        };
        info!(
            db = options.log_name(),
            tables = registry.names(TableFamily::Objects).len(),
            relations = registry.names(TableFamily::Relations).len(),
            last_oid,
            "object database opened"
        );
        Ok(Self {
            shared: Arc::new(DbShared {
                kv,
                registry,
                options,
                last_oid: AtomicU64::new(last_oid),
                last_dict_id: AtomicU64::new(last_dict_id),
            }),
        })
    }

    /// Opens an object database over a key-value store with default options.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored metadata cannot be read.
    pub fn open(kv: Arc<dyn KeyValueDb>) -> CoreResult<Self> {
        Self::open_with_options(kv, DbOptions::default())
    }

    /// Opens or creates a file-backed database.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or replayed.
    pub fn open_path(path: &Path, options: DbOptions) -> CoreResult<Self> {
        let kv = BTreeKeyValueDb::open_file(path, &StoreConfig::default())?;
        Self::open_with_options(Arc::new(kv), options)
    }

    /// Opens a fresh in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the other constructors.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_options(Arc::new(BTreeKeyValueDb::in_memory()), DbOptions::default())
    }

    /// Registers a persisted type, even when auto-registration is off.
    ///
    /// # Errors
    ///
    /// Fails if the type's name is already bound to another type.
    pub fn register<T: Persist>(&self) -> CoreResult<()> {
        self.shared.registry.bind_object::<T>(true)?;
        Ok(())
    }

    /// Registers a relation, even when auto-registration is off.
    ///
    /// # Errors
    ///
    /// Fails if the relation's name is already bound to another type.
    pub fn register_relation<R: Relation>(&self) -> CoreResult<()> {
        self.shared.registry.bind_relation::<R>(true)?;
        Ok(())
    }

    /// Begins a read-only transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot begin a transaction.
    pub fn begin_read(&self) -> CoreResult<ObjectTransaction> {
        let kv = self.shared.kv.begin_read()?;
        Ok(ObjectTransaction::new(Arc::clone(&self.shared), kv, true))
    }

    /// Begins a writing transaction, waiting for any other writer to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot begin a transaction.
    pub fn begin_write(&self) -> CoreResult<ObjectTransaction> {
        let kv = self.shared.kv.begin_write()?;
        Ok(ObjectTransaction::new(Arc::clone(&self.shared), kv, false))
    }

    /// Executes a function within a writing transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is disposed.
    ///
    /// # Errors
    ///
    /// Returns the function's error or the commit error.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&ObjectTransaction) -> CoreResult<T>,
    {
        let tx = self.begin_write()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Executes a function within a read-only transaction.
    ///
    /// # Errors
    ///
    /// Returns the function's error.
    pub fn read<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&ObjectTransaction) -> CoreResult<T>,
    {
        let tx = self.begin_read()?;
        f(&tx)
    }

    /// The schema registry shared by all transactions.
    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.shared.registry
    }

    /// Returns the database options.
    #[must_use]
    pub fn options(&self) -> &DbOptions {
        &self.shared.options
    }
}

impl std::fmt::Debug for ObjectDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectDb")
            .field("name", &self.shared.options.log_name())
            .field(
                "last_oid",
                &self.shared.last_oid.load(std::sync::atomic::Ordering::SeqCst),
            )
            .finish_non_exhaustive()
    }
}
