//! Typed relations.
//!
//! A relation is a table of rows addressed by a primary key. Rows are
//! stored as
//!
//! ```text
//! key:   0x05 vu(relation_id) pk fields…
//! value: vu(version) value fields…
//! ```
//!
//! with primary-key fields in an order-preserving encoding, so rows are
//! enumerated in key order. Each value row carries the version it was
//! written with and is decoded through that version's schema, which keeps
//! old rows readable after the relation's fields change.

mod enumerator;
mod table;

pub use enumerator::RelationEnumerator;
pub use table::RelationTable;

use crate::error::CoreResult;
use crate::schema::{FieldDef, SecondaryKeyDef};
use crate::value::{Record, Value};

/// A row type stored in a relation.
///
/// Primary key fields are fixed for the lifetime of the relation. Value
/// fields may be added, removed or retyped. A row written before a field
/// existed is read with that field's initializer.
pub trait Relation: Sized + 'static {
    /// Persisted relation name.
    const NAME: &'static str;

    /// Primary key fields, in key order.
    fn primary_key() -> Vec<FieldDef>;

    /// Value fields.
    fn fields() -> Vec<FieldDef>;

    /// Secondary keys over primary key or value fields.
    fn secondary_keys() -> Vec<SecondaryKeyDef> {
        Vec::new()
    }

    /// Primary key values in the order of `primary_key`.
    fn key(&self) -> Vec<Value>;

    /// Value field values in the order of `fields`.
    fn values(&self) -> Vec<Value>;

    /// Rebuilds a row from its key and value fields.
    ///
    /// # Errors
    ///
    /// Returns an error if a field is missing or of an unexpected kind.
    fn from_record(record: &mut Record) -> CoreResult<Self>;

    /// Runs once, in the first writing transaction that opens the relation.
    ///
    /// # Errors
    ///
    /// An error is returned from the `relation` call that triggered it.
    fn on_create(_table: &RelationTable<'_, Self>) -> CoreResult<()> {
        Ok(())
    }
}
