//! Test fixtures and database helpers.
//!
//! A [`TestDatabase`] remembers where its bytes live, so a test can close
//! the database and open it again, the way a process restart would.

use crate::faults::FailingBackend;
use objdb_core::{BTreeKeyValueDb, DbOptions, KeyValueDb, ObjectDb, StoreConfig};
use objdb_storage::InMemoryBackend;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

enum Location {
    Memory(InMemoryBackend),
    Failing(FailingBackend),
    File(PathBuf),
}

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: ObjectDb,
    location: Location,
    options: DbOptions,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self::memory_with(DbOptions::new().with_name("test"))
    }

    /// Creates a new in-memory test database with the given options.
    pub fn memory_with(options: DbOptions) -> Self {
        init_test_logging();
        let backend = InMemoryBackend::new();
        let location = Location::Memory(backend);
        let db = open(&location, options.clone());
        Self {
            db,
            location,
            options,
            _temp_dir: None,
        }
    }

    /// Creates a test database on a backend the test can make fail.
    ///
    /// The backend is cloned, so the caller's handle keeps control of its
    /// failure switches across [`reopen`](Self::reopen).
    pub fn on_backend(backend: &FailingBackend) -> Self {
        init_test_logging();
        let location = Location::Failing(backend.clone());
        let options = DbOptions::new().with_name("test-failing");
        let db = open(&location, options.clone());
        Self {
            db,
            location,
            options,
            _temp_dir: None,
        }
    }

    /// Creates a new file-based test database.
    pub fn file() -> Self {
        init_test_logging();
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let location = Location::File(temp_dir.path().join("objects.log"));
        let options = DbOptions::new().with_name("test-file");
        let db = open(&location, options.clone());
        Self {
            db,
            location,
            options,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Closes the database and opens it again from its stored bytes.
    ///
    /// Nothing registered in the old handle carries over, so each reopen
    /// behaves like a new process.
    #[must_use]
    pub fn reopen(self) -> Self {
        let options = self.options.clone();
        self.reopen_with(options)
    }

    /// Like [`reopen`](Self::reopen), with different options.
    #[must_use]
    pub fn reopen_with(self, options: DbOptions) -> Self {
        let Self {
            db,
            location,
            _temp_dir,
            ..
        } = self;
        drop(db);
        let db = open(&location, options.clone());
        Self {
            db,
            location,
            options,
            _temp_dir,
        }
    }

    /// Returns the log file path if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::File(path) => Some(path),
            Location::Memory(_) | Location::Failing(_) => None,
        }
    }
}

fn open(location: &Location, options: DbOptions) -> ObjectDb {
    let config = StoreConfig::default();
    let kv = match location {
        Location::Memory(backend) => {
            BTreeKeyValueDb::open(Box::new(backend.clone()), &config)
                .expect("Failed to open in-memory store")
        }
        Location::Failing(backend) => {
            BTreeKeyValueDb::open(Box::new(backend.clone()), &config)
                .expect("Failed to open failing store")
        }
        Location::File(path) => {
            BTreeKeyValueDb::open_file(path, &config).expect("Failed to open file store")
        }
    };
    let kv: Arc<dyn KeyValueDb> = Arc::new(kv);
    ObjectDb::open_with_options(kv, options).expect("Failed to open object database")
}

impl std::ops::Deref for TestDatabase {
    type Target = ObjectDb;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Installs a test-friendly tracing subscriber once per process.
///
/// The filter comes from `RUST_LOG` and defaults to warnings.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_ansi(false)
            .try_init();
    });
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust
/// use objdb_testkit::with_temp_db;
///
/// with_temp_db(|db| {
///     let tx = db.begin_write().unwrap();
///     tx.commit().unwrap();
/// });
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&ObjectDb) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary file-based database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&ObjectDb, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db
        .path()
        .expect("File database should have a path")
        .to_path_buf();
    f(&test_db.db, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use crate::samples::Person;
    use objdb_core::Oid;

    /// Creates a database holding `count` committed people.
    pub fn populated_database(count: usize) -> (TestDatabase, Vec<Oid>) {
        let test_db = TestDatabase::memory();
        let oids = test_db
            .db
            .transaction(|tx| {
                (0..count)
                    .map(|i| {
                        let age = u32::try_from(i).expect("count fits in u32");
                        tx.store(&Person::named(&format!("person-{i}"), age))
                    })
                    .collect()
            })
            .expect("Failed to store people");
        (test_db, oids)
    }
}
