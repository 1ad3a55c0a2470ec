//! Live objects, their persisted shape, and the per-transaction identity cache.

mod cache;
mod handle;

pub(crate) use cache::{ObjectCache, ObjectMetadata, ObjectState};
pub use handle::{cell_type_id_of, AnyObject, Obj, WeakObject};

use crate::error::CoreResult;
use crate::schema::FieldDef;
use crate::value::{Record, Value};

/// A type stored as a free-form object addressed by oid.
///
/// `fields` declares the current layout. Its order is the order of the
/// values returned by `save`. `load` receives a [`Record`] holding every
/// declared field: values written by older versions are converted when the
/// kind changed, and fields the stored version lacked carry their
/// initializer (or the kind's zero value).
///
/// Types referenced from another object's [`Value::Object`] field must be
/// known to the database, either through [`crate::ObjectDb::register`] or
/// through an earlier typed call such as `store` or `get`.
///
/// # Example
///
/// ```rust
/// use objdb_core::{CoreResult, FieldDef, FieldKind, Persist, Record, Value};
///
/// struct Note {
///     text: String,
/// }
///
/// impl Persist for Note {
///     const TYPE_NAME: &'static str = "Note";
///
///     fn fields() -> Vec<FieldDef> {
///         vec![FieldDef::new("text", FieldKind::String)]
///     }
///
///     fn create() -> Self {
///         Self { text: String::new() }
///     }
///
///     fn save(&self) -> Vec<Value> {
///         vec![Value::from(self.text.as_str())]
///     }
///
///     fn load(&mut self, record: &mut Record) -> CoreResult<()> {
///         self.text = record.take_string("text")?;
///         Ok(())
///     }
/// }
/// ```
pub trait Persist: 'static {
    /// Persisted table name.
    const TYPE_NAME: &'static str;

    /// Current field layout.
    fn fields() -> Vec<FieldDef>;

    /// Creates a blank instance, filled by `load` when reading.
    fn create() -> Self
    where
        Self: Sized;

    /// Field values in the order of `fields`.
    fn save(&self) -> Vec<Value>;

    /// Populates the instance from a decoded row.
    ///
    /// # Errors
    ///
    /// Returns an error if a field is missing or of an unexpected kind.
    fn load(&mut self, record: &mut Record) -> CoreResult<()>;
}
