//! Physical-table storage for recordlayer.
//!
//! This crate provides a [`StorageAdapter`](recordlayer_core::adapter::StorageAdapter) that
//! keeps every collection in its own SQLite table with one column per field, and the
//! [`SchemaMigrationEngine`] that evolves those tables when a definition changes.
//!
//! # Features
//!
//! - **Typed columns** - Each field type maps to a declared column type
//! - **Server-side queries** - Filters, sorting and pagination run as SQL
//! - **Identifier validation** - Table and column names are validated, values are always bound
//! - **Non-destructive migrations** - Removed fields keep their data; every statement is recorded
//!
//! # Example
//!
//! ```ignore
//! use recordlayer_core::adapter::{AdapterBuilder, StorageAdapter};
//! use recordlayer_sqlite::Database;
//! use recordlayer_table::TableStore;
//!
//! let store = TableStore::builder(Database::open_in_memory()?).build().await?;
//! store.initialize_collection(&products).await?;
//! let record = store.create(&products, bson::doc! { "name": "Apple" }).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as recordlayer_table;

mod ddl;
pub mod migrate;
pub mod sql;
pub mod store;
mod translator;

pub use migrate::{DEPRECATED_COLUMNS_TABLE, MIGRATIONS_TABLE, SchemaMigrationEngine};
pub use store::{TableStore, TableStoreBuilder};
