//! Field declarations.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Storage kind of a field.
///
/// The kind decides the byte encoding of the field and is recorded in every
/// persisted version schema, so rows written by older versions can still be
/// decoded or skipped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    /// One byte, 0 or 1.
    Bool,
    /// Unsigned integer.
    U8,
    /// Unsigned integer.
    U32,
    /// Unsigned integer.
    U64,
    /// Signed integer (zigzag).
    I32,
    /// Signed integer (zigzag).
    I64,
    /// Eight little-endian bytes.
    F64,
    /// Length-prefixed UTF-8.
    String,
    /// Length-prefixed bytes.
    Bytes,
    /// Sixteen raw bytes.
    Guid,
    /// Count followed by items.
    List(Box<FieldKind>),
    /// Presence byte followed by the item.
    Optional(Box<FieldKind>),
    /// Reference to another object, by id or inline.
    Object,
    /// Id of a nested dictionary whose entries live under their own prefix.
    Dictionary,
}

impl FieldKind {
    /// Shorthand for `List(Box::new(item))`.
    #[must_use]
    pub fn list(item: Self) -> Self {
        Self::List(Box::new(item))
    }

    /// Shorthand for `Optional(Box::new(item))`.
    #[must_use]
    pub fn optional(item: Self) -> Self {
        Self::Optional(Box::new(item))
    }

    /// Returns true if this kind may appear in a primary or secondary key.
    ///
    /// Object references and dictionary handles are not part of the value's
    /// identity and are rejected in keys.
    #[must_use]
    pub fn allowed_in_key(&self) -> bool {
        match self {
            Self::Object | Self::Dictionary => false,
            Self::List(item) | Self::Optional(item) => item.allowed_in_key(),
            _ => true,
        }
    }

    /// Returns true if a value of this kind can hold a dictionary handle.
    #[must_use]
    pub fn holds_dictionary(&self) -> bool {
        match self {
            Self::Dictionary => true,
            Self::List(item) | Self::Optional(item) => item.holds_dictionary(),
            _ => false,
        }
    }
}

/// Persisted description of one field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name, the join key between versions.
    pub name: String,
    /// Storage kind.
    pub kind: FieldKind,
}

/// Initializer producing the value of a field missing from an older row.
pub type FieldInit = fn() -> Value;

/// A field declared by a persisted type or relation.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Name and kind.
    pub descriptor: FieldDescriptor,
    /// Value for rows written before this field existed.
    pub init: Option<FieldInit>,
}

impl FieldDef {
    /// Declares a field without an initializer.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            descriptor: FieldDescriptor {
                name: name.into(),
                kind,
            },
            init: None,
        }
    }

    /// Sets the initializer used when an older row lacks this field.
    #[must_use]
    pub fn with_init(mut self, init: FieldInit) -> Self {
        self.init = Some(init);
        self
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Field kind.
    #[must_use]
    pub fn kind(&self) -> &FieldKind {
        &self.descriptor.kind
    }

    /// Value for a row that lacks this field.
    #[must_use]
    pub fn initial_value(&self) -> Value {
        self.init
            .map_or_else(|| Value::default_for(self.kind()), |init| init())
    }
}

/// A secondary key declared by a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryKeyDef {
    /// Name used to query the index.
    pub name: String,
    /// Stable index number inside the relation's secondary key space.
    pub index: u32,
    /// Value or primary-key fields forming the key, in order.
    pub fields: Vec<String>,
}

impl SecondaryKeyDef {
    /// Declares a secondary key.
    pub fn new(name: impl Into<String>, index: u32, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            index,
            fields: fields.iter().map(|f| (*f).to_owned()).collect(),
        }
    }
}
