//! # objdb core
//!
//! Transactional object persistence over an ordered key-value store.
//!
//! This crate provides:
//! - A schema registry mapping types to numeric table ids and versions
//! - Object transactions with an identity cache and a dirty set flushed
//!   at commit
//! - Inline object graphs, including cycles, inside a single row
//! - Typed relations with primary and secondary keys
//! - Nested dictionaries owned by objects and rows
//!
//! Everything is stored through [`objdb_storage::KeyValueDb`]; the key
//! layout is described in [`layout`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod config;
mod database;
mod dictionary;
mod error;
pub mod layout;
mod object;
mod relation;
mod schema;
mod transaction;
mod types;
mod value;

pub use config::DbOptions;
pub use database::ObjectDb;
pub use dictionary::Dictionary;
pub use error::{CoreError, CoreResult};
pub use object::{cell_type_id_of, AnyObject, Obj, Persist, WeakObject};
pub use relation::{Relation, RelationEnumerator, RelationTable};
pub use schema::{
    FieldDef, FieldDescriptor, FieldInit, FieldKind, SchemaRegistry, SecondaryKeyDef,
    SecondaryKeyDescriptor, TableFamily, VersionSchema,
};
pub use transaction::{AnyObjects, ObjectTransaction, Objects, TransactionState};
pub use types::{DictId, Oid, TableId};
pub use value::{Record, Value};

pub use objdb_storage::{BTreeKeyValueDb, KeyValueDb, StoreConfig};
