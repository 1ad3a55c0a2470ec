//! Error types for ObjDB core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in ObjDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] objdb_storage::StorageError),

    /// Binary codec error.
    #[error("codec error: {0}")]
    Codec(#[from] objdb_codec::CodecError),

    /// The type has no table and auto-registration is disabled.
    #[error("type {type_name} is not registered")]
    UnregisteredType {
        /// Persisted name of the type.
        type_name: String,
    },

    /// A stored row names a table id that no live type is bound to.
    #[error("unknown storage type id {table_id}")]
    UnknownStorageTypeId {
        /// The table id read from storage.
        table_id: u32,
    },

    /// Insert collided with an existing primary key.
    #[error("duplicate key in relation {relation}")]
    DuplicateKey {
        /// Relation name.
        relation: String,
    },

    /// A row or object required by the operation does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// What was looked up.
        message: String,
    },

    /// The transaction was already committed or disposed.
    #[error("transaction is closed")]
    TransactionClosed,

    /// The value cannot be stored as a top-level entity.
    #[error("cannot store {type_name} to the database directly")]
    UnsupportedType {
        /// Name of the rejected type.
        type_name: String,
    },

    /// A relation's primary key changed shape between versions.
    #[error("schema mismatch in relation {relation}: {message}")]
    SchemaMismatch {
        /// Relation name.
        relation: String,
        /// Description of the mismatch.
        message: String,
    },

    /// A mutation was attempted in a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnlyTransaction,

    /// A loaded object is not of the requested type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Requested type name.
        expected: String,
        /// Type name found in storage.
        found: String,
    },

    /// The object was deleted in this transaction and cannot be stored again.
    #[error("object {oid} was deleted")]
    ObjectDeleted {
        /// Object id of the deleted instance.
        oid: u64,
    },

    /// Stored bytes do not match the expected layout.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an unregistered type error.
    pub fn unregistered_type(type_name: impl Into<String>) -> Self {
        Self::UnregisteredType {
            type_name: type_name.into(),
        }
    }

    /// Creates a duplicate key error.
    pub fn duplicate_key(relation: impl Into<String>) -> Self {
        Self::DuplicateKey {
            relation: relation.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates an unsupported type error.
    pub fn unsupported_type(type_name: impl Into<String>) -> Self {
        Self::UnsupportedType {
            type_name: type_name.into(),
        }
    }

    /// Creates a schema mismatch error.
    pub fn schema_mismatch(relation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            relation: relation.into(),
            message: message.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for errors raised while decoding stored bytes.
    ///
    /// Self-healing reads turn these into skipped rows.
    #[must_use]
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            Self::Codec(_)
                | Self::InvalidFormat { .. }
                | Self::UnknownStorageTypeId { .. }
                | Self::UnregisteredType { .. }
        )
    }
}
