//! Convenient re-exports of commonly used types from recordlayer.
//!
//! ```ignore
//! use recordlayer::prelude::*;
//! ```
//!
//! This provides access to:
//! - Collection and field definitions
//! - The collection registry and its events
//! - Query construction, filtering and pagination
//! - The storage adapter contract and the adapter factory
//! - Error types and migration records

pub use recordlayer_core::{
    adapter::{AdapterBuilder, StorageAdapter},
    definition::{
        CollectionDefinition, CollectionDefinitionBuilder, FieldDefinition, FieldType, ReferenceDescriptor,
        StorageConfig, StorageMode, ValidationRules,
    },
    error::{StoreError, StoreResult},
    page::{Pagination, PaginationMetadata, QueryResult},
    query::{Filter, FilterCondition, FilterOperator, FilterVisitor, Query, QueryBuilder, SortDirection, SortField},
    record::Record,
    registry::{CollectionRegistry, ListenerId, RegistryEvent},
    schema::{MigrationKind, MigrationRecord, SchemaDiff},
};

pub use crate::config::{AdapterConfig, build_adapter, build_adapter_on, build_migration_engine};
