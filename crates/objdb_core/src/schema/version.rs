//! Version schemas.

use crate::schema::field::{FieldDef, FieldDescriptor, SecondaryKeyDef};
use serde::{Deserialize, Serialize};

/// Persisted secondary key description.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecondaryKeyDescriptor {
    /// Query name.
    pub name: String,
    /// Stable index number.
    pub index: u32,
    /// Fields forming the key.
    pub fields: Vec<String>,
}

/// The field layout of one version of a table or relation.
///
/// Two versions are the same version exactly when their schemas compare
/// equal, so any change in names, kinds, or order allocates a new version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionSchema {
    /// Primary key fields (relations only), immutable across versions.
    pub primary_key: Vec<FieldDescriptor>,
    /// Value fields, free to change between versions.
    pub fields: Vec<FieldDescriptor>,
    /// Secondary keys (relations only).
    pub secondary_keys: Vec<SecondaryKeyDescriptor>,
}

impl VersionSchema {
    /// Schema of an object type.
    #[must_use]
    pub fn for_object(fields: &[FieldDef]) -> Self {
        Self {
            primary_key: Vec::new(),
            fields: fields.iter().map(|f| f.descriptor.clone()).collect(),
            secondary_keys: Vec::new(),
        }
    }

    /// Schema of a relation.
    #[must_use]
    pub fn for_relation(
        primary_key: &[FieldDef],
        fields: &[FieldDef],
        secondary_keys: &[SecondaryKeyDef],
    ) -> Self {
        Self {
            primary_key: primary_key.iter().map(|f| f.descriptor.clone()).collect(),
            fields: fields.iter().map(|f| f.descriptor.clone()).collect(),
            secondary_keys: secondary_keys
                .iter()
                .map(|sk| SecondaryKeyDescriptor {
                    name: sk.name.clone(),
                    index: sk.index,
                    fields: sk.fields.clone(),
                })
                .collect(),
        }
    }

    /// Looks up a value field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Looks up a primary key or value field.
    #[must_use]
    pub fn any_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.primary_key
            .iter()
            .chain(self.fields.iter())
            .find(|f| f.name == name)
    }

    /// Returns true if removing a row must free nested dictionaries.
    #[must_use]
    pub fn needs_free_content(&self) -> bool {
        self.fields.iter().any(|f| f.kind.holds_dictionary())
    }

    /// Looks up a secondary key by name.
    #[must_use]
    pub fn secondary_key(&self, name: &str) -> Option<&SecondaryKeyDescriptor> {
        self.secondary_keys.iter().find(|sk| sk.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldKind;

    fn person(fields: &[(&str, FieldKind)]) -> VersionSchema {
        let defs: Vec<FieldDef> = fields
            .iter()
            .map(|(n, k)| FieldDef::new(*n, k.clone()))
            .collect();
        VersionSchema::for_object(&defs)
    }

    #[test]
    fn equality_is_structural() {
        let a = person(&[("name", FieldKind::String), ("age", FieldKind::U32)]);
        let b = person(&[("name", FieldKind::String), ("age", FieldKind::U32)]);
        let reordered = person(&[("age", FieldKind::U32), ("name", FieldKind::String)]);
        let retyped = person(&[("name", FieldKind::String), ("age", FieldKind::U64)]);
        assert_eq!(a, b);
        assert_ne!(a, reordered);
        assert_ne!(a, retyped);
    }

    #[test]
    fn cbor_roundtrip() {
        let schema = VersionSchema::for_relation(
            &[FieldDef::new("id", FieldKind::U64)],
            &[FieldDef::new("tags", FieldKind::Dictionary)],
            &[SecondaryKeyDef::new("by_name", 1, &["name"])],
        );
        let bytes = objdb_codec::to_record(&schema).unwrap();
        let decoded: VersionSchema = objdb_codec::from_record(&bytes).unwrap();
        assert_eq!(decoded, schema);
        assert!(decoded.needs_free_content());
        assert_eq!(decoded.secondary_key("by_name").unwrap().index, 1);
    }
}
