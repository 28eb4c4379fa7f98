//! The storage adapter contract.
//!
//! A [`StorageAdapter`] persists records of runtime-defined collections. Two layouts exist
//! behind the same contract: one backend table per collection, or one shared document table.
//! Callers hold adapters as `Arc<dyn StorageAdapter>` and never need to know which one they
//! were given.
//!
//! Every operation receives the [`CollectionDefinition`] it should act against. Adapters do
//! not consult the registry themselves.
//!
//! # Examples
//!
//! ```ignore
//! use bson::doc;
//! use recordlayer_core::{adapter::StorageAdapter, query::{Filter, Query}};
//!
//! adapter.initialize_collection(&products).await?;
//! let created = adapter.create(&products, doc! { "name": "Apple", "price": 1.99 }).await?;
//!
//! let cheap = adapter
//!     .query(&products, Query::builder().filter(Filter::lt("price", 2.0)).build())
//!     .await?;
//! ```

use async_trait::async_trait;
use bson::{Bson, Document, Uuid};
use std::fmt::Debug;

use crate::{
    definition::{CollectionDefinition, StorageMode},
    error::StoreResult,
    page::QueryResult,
    query::Query,
    record::Record,
};

/// Persistence of records for runtime-defined collections.
///
/// # Thread Safety
///
/// Implementations are shared across tasks and must be `Send + Sync`. No record-level
/// locking happens inside an adapter; concurrent writes rely on the backend's own
/// single-statement atomicity.
///
/// # Error Handling
///
/// Backend failures surface as `StorageFailure`, duplicate values on unique fields as
/// `UniqueConstraintViolation`, payloads that do not fit the definition as `InvalidRecord`
/// and queries naming unknown fields as `InvalidQuery`.
#[async_trait]
pub trait StorageAdapter: Send + Sync + Debug {
    /// The layout this adapter stores records in.
    fn mode(&self) -> StorageMode;

    /// Prepares storage for a collection. Calling it again for an existing collection is a
    /// no-op.
    async fn initialize_collection(&self, definition: &CollectionDefinition) -> StoreResult<()>;

    /// Evolves storage from `old` to `new`.
    async fn update_collection_schema(
        &self,
        old: &CollectionDefinition,
        new: &CollectionDefinition,
    ) -> StoreResult<()>;

    /// Inserts a record with a freshly generated id.
    async fn create(&self, definition: &CollectionDefinition, data: Document) -> StoreResult<Record>;

    async fn get_by_id(&self, definition: &CollectionDefinition, id: Uuid) -> StoreResult<Option<Record>>;

    /// Applies the supplied fields to an existing record and refreshes its update time.
    ///
    /// Fields absent from `data` keep their stored value. Returns `None` when no record has
    /// the given id.
    async fn update(
        &self,
        definition: &CollectionDefinition,
        id: Uuid,
        data: Document,
    ) -> StoreResult<Option<Record>>;

    /// Returns `false` when no record has the given id.
    async fn delete(&self, definition: &CollectionDefinition, id: Uuid) -> StoreResult<bool>;

    /// Filters, sorts, paginates and projects the records of a collection.
    async fn query(&self, definition: &CollectionDefinition, query: Query) -> StoreResult<QueryResult<Record>>;

    /// Returns whether no record other than `exclude_id` holds `value` in `field`.
    async fn is_unique(
        &self,
        definition: &CollectionDefinition,
        field: &str,
        value: &Bson,
        exclude_id: Option<Uuid>,
    ) -> StoreResult<bool>;
}

#[async_trait]
impl<A> StorageAdapter for &A
where
    A: StorageAdapter,
{
    fn mode(&self) -> StorageMode {
        (*self).mode()
    }

    async fn initialize_collection(&self, definition: &CollectionDefinition) -> StoreResult<()> {
        (*self).initialize_collection(definition).await
    }

    async fn update_collection_schema(
        &self,
        old: &CollectionDefinition,
        new: &CollectionDefinition,
    ) -> StoreResult<()> {
        (*self).update_collection_schema(old, new).await
    }

    async fn create(&self, definition: &CollectionDefinition, data: Document) -> StoreResult<Record> {
        (*self).create(definition, data).await
    }

    async fn get_by_id(&self, definition: &CollectionDefinition, id: Uuid) -> StoreResult<Option<Record>> {
        (*self).get_by_id(definition, id).await
    }

    async fn update(
        &self,
        definition: &CollectionDefinition,
        id: Uuid,
        data: Document,
    ) -> StoreResult<Option<Record>> {
        (*self).update(definition, id, data).await
    }

    async fn delete(&self, definition: &CollectionDefinition, id: Uuid) -> StoreResult<bool> {
        (*self).delete(definition, id).await
    }

    async fn query(&self, definition: &CollectionDefinition, query: Query) -> StoreResult<QueryResult<Record>> {
        (*self).query(definition, query).await
    }

    async fn is_unique(
        &self,
        definition: &CollectionDefinition,
        field: &str,
        value: &Bson,
        exclude_id: Option<Uuid>,
    ) -> StoreResult<bool> {
        (*self)
            .is_unique(definition, field, value, exclude_id)
            .await
    }
}

/// Factory trait for creating adapter instances.
#[async_trait]
pub trait AdapterBuilder {
    type Adapter: StorageAdapter;

    async fn build(self) -> StoreResult<Self::Adapter>;
}
