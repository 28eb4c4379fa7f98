//! Error types and result types for storage operations.
//!
//! Every fallible operation in the workspace returns a [`StoreResult<T>`]. The error kinds
//! form a closed set so callers can match on the failure instead of inspecting strings.

use bson::de::Error as BsonDeError;
use bson::ser::Error as BsonSerError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

use crate::definition::FieldType;

/// Represents all possible errors raised by the registry, the migration engine and the
/// storage adapters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The storage backend failed while executing a statement.
    /// Driver errors are wrapped here and surfaced to the caller without retry.
    #[error("Storage failure: {0}")]
    StorageFailure(String),
    /// A field type change falls outside the type-compatibility lattice.
    #[error("Incompatible schema change for {collection}.{field}: cannot convert {from} to {to}")]
    IncompatibleSchemaChange {
        collection: String,
        field: String,
        from: FieldType,
        to: FieldType,
    },
    /// A value collided with an existing record on a unique field.
    /// The field name is best-effort and may be `"id"` or `"unknown"`.
    #[error("Unique constraint violation in collection {collection} on field {field} (value {value})")]
    UniqueConstraintViolation {
        collection: String,
        field: String,
        value: String,
    },
    /// A table or column name failed identifier validation.
    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),
    /// A collection definition violates a structural invariant.
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),
    /// A record payload does not fit the collection definition.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    /// A query references unknown fields or carries invalid pagination.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// Serialization/deserialization error when converting between formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The adapter configuration is malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// A specialized `Result` type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<BsonSerError> for StoreError {
    fn from(err: BsonSerError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<BsonDeError> for StoreError {
    fn from(err: BsonDeError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for StoreError {
    fn from(err: SerdeJsonError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
