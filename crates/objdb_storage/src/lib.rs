//! # ObjDB Storage
//!
//! Ordered transactional key-value storage underneath the ObjDB object layer.
//!
//! The object layer only talks to the [`KeyValueDb`] and
//! [`KeyValueTransaction`] traits. This crate ships one implementation,
//! [`BTreeKeyValueDb`], which keeps the data in a copy-on-write ordered map
//! and optionally persists commits to an append-only log written through a
//! [`StorageBackend`].
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use objdb_storage::{BTreeKeyValueDb, InMemoryBackend, KeyValueDb, StoreConfig};
//!
//! let backend = InMemoryBackend::new();
//! let db = BTreeKeyValueDb::open(Box::new(backend.clone()), &StoreConfig::default()).unwrap();
//! let mut tx = db.begin_write().unwrap();
//! tx.create_or_update(b"key", b"value").unwrap();
//! tx.commit().unwrap();
//!
//! let reopened = BTreeKeyValueDb::open(Box::new(backend), &StoreConfig::default()).unwrap();
//! assert_eq!(reopened.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod btree;
mod commit_log;
mod config;
mod error;
mod file;
mod kv;
mod memory;

pub use backend::StorageBackend;
pub use btree::BTreeKeyValueDb;
pub use config::StoreConfig;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use kv::{KeyValue, KeyValueDb, KeyValueTransaction};
pub use memory::InMemoryBackend;
