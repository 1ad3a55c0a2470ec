//! # ObjDB Testkit
//!
//! Test utilities for ObjDB.
//!
//! This crate provides:
//! - Test fixtures that can close and reopen a database
//! - A storage backend that fails on demand
//! - Sample persisted types and relations
//! - Property-based test generators using proptest
//! - A relation harness that checks a relation against an in-memory model
//!
//! ## Usage
//!
//! ```rust
//! use objdb_testkit::prelude::*;
//!
//! with_temp_db(|db| {
//!     let oid = db
//!         .transaction(|tx| tx.store(&Person::named("Ada", 36)))
//!         .unwrap();
//!     let tx = db.begin_read().unwrap();
//!     let ada = tx.get::<Person>(oid).unwrap().unwrap();
//!     assert_eq!(ada.borrow().age, 36);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod samples;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::samples::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use samples::*;
