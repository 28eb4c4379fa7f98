//! Main recordlayer crate providing a unified interface over runtime-defined collections.
//!
//! Applications describe their collections at runtime, keep the live set of definitions in a
//! [`CollectionRegistry`](registry::CollectionRegistry) and persist records through a
//! [`StorageAdapter`](adapter::StorageAdapter). Two storage layouts sit behind the same
//! adapter contract and are selected once, from configuration:
//!
//! - **Physical tables** ([`table`]) - one table per collection and one column per field, with
//!   schema changes applied as recorded DDL migrations
//! - **Document store** ([`document`]) - one shared table holding every record as a BSON
//!   document, with filtering and sorting evaluated in memory
//!
//! # Quick Start
//!
//! ```ignore
//! use recordlayer::prelude::*;
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> StoreResult<()> {
//!     let adapter = build_adapter(&AdapterConfig::new(StorageMode::PhysicalTables)).await?;
//!     let registry = CollectionRegistry::new();
//!
//!     let fruits = registry.register(
//!         CollectionDefinition::builder("fruits")
//!             .field(FieldDefinition::new("name", FieldType::String).nullable(false).unique())
//!             .field(FieldDefinition::new("price", FieldType::Double))
//!             .build()?,
//!     );
//!     adapter.initialize_collection(&fruits).await?;
//!
//!     adapter.create(&fruits, doc! { "name": "Apple", "price": 1.5 }).await?;
//!
//!     let expensive = adapter
//!         .query(
//!             &fruits,
//!             Query::builder()
//!                 .filter(Filter::gt("price", "1.00"))
//!                 .sort("price", SortDirection::Desc)
//!                 .build(),
//!         )
//!         .await?;
//!
//!     println!("{} expensive fruits", expensive.metadata.total_count);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Schema Evolution
//!
//! Definitions are immutable. Changing one produces a new version, which the adapter brings
//! the storage up to:
//!
//! ```ignore
//! let next = fruits.with_field(FieldDefinition::new("stock", FieldType::Integer))?;
//! adapter.update_collection_schema(&fruits, &next).await?;
//! registry.register(next);
//! ```
//!
//! In physical-table mode every executed statement is kept in the migration history, which
//! [`build_migration_engine`] exposes.

pub mod config;
pub mod prelude;

pub use config::{AdapterConfig, build_adapter, build_adapter_on, build_migration_engine};
pub use recordlayer_core::{adapter, definition, error, page, query, record, registry, schema};

// Re-export BSON types for convenience
pub use bson;

/// Embedded SQLite driver.
pub mod sqlite {
    pub use recordlayer_sqlite::{Database, DatabaseBuilder, DatabaseConfig, DatabaseError, JournalMode};
}

/// Physical-table storage and the schema migration engine.
pub mod table {
    pub use recordlayer_table::{
        DEPRECATED_COLUMNS_TABLE, MIGRATIONS_TABLE, SchemaMigrationEngine, TableStore, TableStoreBuilder,
    };
}

/// Shared document-table storage.
pub mod document {
    pub use recordlayer_document::{DOCUMENTS_TABLE, DocumentStore, DocumentStoreBuilder};
}
