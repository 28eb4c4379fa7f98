//! Runtime-defined record collections over interchangeable storage layouts.
//!
//! This crate is the core of the recordlayer project and provides:
//!
//! - **Definition model** ([`definition`]) - Immutable, versioned collection and field definitions
//! - **Collection registry** ([`registry`]) - Lock-free reads over the live set of definitions
//! - **Records** ([`record`]) - The stored record type and per-type value coercion
//! - **Query model** ([`query`]) - Filter conditions, sorting, projection and the visitor used by adapters
//! - **Pagination** ([`page`]) - Page selection and result metadata
//! - **Schema evolution** ([`schema`]) - Definition diffs, the type-compatibility lattice and migration records
//! - **Storage adapter contract** ([`adapter`]) - The trait every storage layout implements
//! - **Error handling** ([`error`]) - The closed set of failure kinds
//!
//! # Example
//!
//! ```ignore
//! use recordlayer_core::{
//!     definition::{CollectionDefinition, FieldDefinition, FieldType},
//!     registry::CollectionRegistry,
//! };
//!
//! let registry = CollectionRegistry::new();
//! let products = CollectionDefinition::builder("products")
//!     .field(FieldDefinition::new("name", FieldType::String).nullable(false))
//!     .field(FieldDefinition::new("price", FieldType::Double))
//!     .build()?;
//!
//! let stored = registry.register(products);
//! assert_eq!(registry.get("products"), Some(stored));
//! ```

#[allow(unused_extern_crates)]
extern crate self as recordlayer_core;

pub mod adapter;
pub mod definition;
pub mod error;
pub mod page;
pub mod query;
pub mod record;
pub mod registry;
pub mod schema;
