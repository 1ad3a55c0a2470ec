//! Field declarations, version schemas and the table registry.

mod field;
mod registry;
mod version;

pub use field::{FieldDef, FieldDescriptor, FieldInit, FieldKind, SecondaryKeyDef};
pub(crate) use registry::{ClientVersion, TypeBinding};
pub use registry::{SchemaRegistry, TableFamily};
pub use version::{SecondaryKeyDescriptor, VersionSchema};
