//! Document-store storage for recordlayer.
//!
//! This crate provides a [`StorageAdapter`](recordlayer_core::adapter::StorageAdapter) that
//! keeps the records of every collection in one shared SQLite table, each record encoded as
//! a BSON document. Filtering, sorting and pagination are evaluated in memory with the same
//! semantics the physical-table layout applies in SQL.
//!
//! # Features
//!
//! - **No per-collection DDL** - New collections and schema changes need no storage work
//! - **Opaque payloads** - Records are stored as BSON and read back unchanged
//! - **Declared uniqueness** - Unique fields are checked by scanning the collection
//! - **Race-free setup** - The shared table is created once, however many tasks race for it
//!
//! # Quick Start
//!
//! ```ignore
//! use recordlayer_core::adapter::{AdapterBuilder, StorageAdapter};
//! use recordlayer_document::DocumentStore;
//! use recordlayer_sqlite::Database;
//!
//! let store = DocumentStore::builder(Database::open_in_memory()?).build().await?;
//! store.initialize_collection(&notes).await?;
//! let note = store.create(&notes, bson::doc! { "title": "hello" }).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as recordlayer_document;

mod evaluator;
pub mod store;

pub use store::{DOCUMENTS_TABLE, DocumentStore, DocumentStoreBuilder};
