//! Document-store layout: every collection shares one table of opaque BSON documents.
//!
//! Each row holds the record id, the collection name, the BSON encoding of the record
//! payload and the two timestamps. Filtering, sorting, pagination and projection happen in
//! memory after every row of the collection has been loaded.

use async_trait::async_trait;
use bson::{Bson, Document, Uuid};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use recordlayer_core::{
    adapter::{AdapterBuilder, StorageAdapter},
    definition::{CollectionDefinition, FieldType, StorageMode},
    error::{StoreError, StoreResult},
    page::QueryResult,
    query::{FilterVisitor, Query, field_type_of},
    record::{Record, WriteKind, coerce_value, format_timestamp, normalize_payload, now, parse_timestamp, text_of},
};
use recordlayer_sqlite::{Database, Row, Value};

use crate::evaluator::{Comparable, PredicateCompiler, sort_records, stored_value};

pub const DOCUMENTS_TABLE: &str = "_documents";

const DOCUMENTS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS _documents (
    id TEXT PRIMARY KEY,
    collection_name TEXT NOT NULL,
    document BLOB NOT NULL,
    created_at TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx__documents_collection ON _documents (collection_name);";

const SELECT_COLUMNS: &str = "id, document, created_at, updated_at";

/// Thread-safe document storage over the shared `_documents` table.
///
/// # Thread Safety
///
/// `DocumentStore` is cloneable and all clones share the database handle, the one-time table
/// setup and a write lock. Creates and updates hold the write lock across their uniqueness
/// scan and the write itself, so two writers in one process cannot both claim a unique
/// value.
///
/// # Performance
///
/// Queries and uniqueness checks load every record of the collection. Nothing is indexed
/// beyond the collection name.
///
/// # Example
///
/// ```ignore
/// use recordlayer_document::DocumentStore;
/// use recordlayer_core::adapter::{AdapterBuilder, StorageAdapter};
///
/// let store = DocumentStore::builder(db).build().await?;
/// let record = store.create(&products, bson::doc! { "name": "Apple" }).await?;
/// ```
#[derive(Debug, Clone)]
pub struct DocumentStore {
    db: Database,
    ready: Arc<OnceCell<()>>,
    writes: Arc<Mutex<()>>,
}

impl DocumentStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            ready: Arc::new(OnceCell::new()),
            writes: Arc::new(Mutex::new(())),
        }
    }

    pub fn builder(db: Database) -> DocumentStoreBuilder {
        DocumentStoreBuilder::new(db)
    }

    /// Creates the shared table and its index. Runs once per store, however many tasks race
    /// for it.
    pub async fn ensure_table(&self) -> StoreResult<()> {
        self.ready
            .get_or_try_init(|| async {
                self.db.execute_batch(DOCUMENTS_DDL).await?;
                debug!(table = DOCUMENTS_TABLE, "document table ready");
                Ok::<_, StoreError>(())
            })
            .await?;

        Ok(())
    }

    /// Every record of a collection, oldest first.
    async fn load(&self, definition: &CollectionDefinition) -> StoreResult<Vec<Record>> {
        self.ensure_table().await?;

        self.db
            .query(
                &format!(
                    "SELECT {} FROM _documents WHERE collection_name = ?1 ORDER BY created_at, id",
                    SELECT_COLUMNS
                ),
                vec![Value::Text(definition.name().to_string())],
            )
            .await?
            .iter()
            .map(record_from_row)
            .collect()
    }

    async fn find(&self, definition: &CollectionDefinition, id: Uuid) -> StoreResult<Option<Record>> {
        self.ensure_table().await?;

        self.db
            .query_one(
                &format!(
                    "SELECT {} FROM _documents WHERE id = ?1 AND collection_name = ?2",
                    SELECT_COLUMNS
                ),
                vec![
                    Value::Text(id.to_string()),
                    Value::Text(definition.name().to_string()),
                ],
            )
            .await?
            .map(|row| record_from_row(&row))
            .transpose()
    }

    /// Fails with `UniqueConstraintViolation` when a unique field of `data` matches another
    /// record of the collection.
    async fn ensure_unique(
        &self,
        definition: &CollectionDefinition,
        data: &Document,
        exclude_id: Option<Uuid>,
    ) -> StoreResult<()> {
        let candidates = definition
            .unique_fields()
            .filter_map(|field| {
                data.get(&field.name)
                    .filter(|value| !matches!(value, Bson::Null))
                    .map(|value| (field, value))
            })
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            return Ok(());
        }

        let records = self.load(definition).await?;
        for (field, value) in candidates {
            if collides(&records, &field.name, Comparable::of(field.field_type, value), field.field_type, exclude_id) {
                return Err(StoreError::UniqueConstraintViolation {
                    collection: definition.name().to_string(),
                    field: field.name.clone(),
                    value: text_of(value).unwrap_or_default(),
                });
            }
        }

        Ok(())
    }
}

fn collides(
    records: &[Record],
    field: &str,
    candidate: Comparable,
    field_type: FieldType,
    exclude_id: Option<Uuid>,
) -> bool {
    records
        .iter()
        .filter(|record| Some(record.id) != exclude_id)
        .any(|record| Comparable::of(field_type, &stored_value(record, field)) == candidate)
}

fn strip_nulls(data: Document) -> Document {
    data.into_iter()
        .filter(|(_, value)| !matches!(value, Bson::Null))
        .collect()
}

fn encode(data: &Document) -> StoreResult<Vec<u8>> {
    Ok(bson::to_vec(data)?)
}

fn record_from_row(row: &Row) -> StoreResult<Record> {
    let text = |column: &str| match row.get(column) {
        Some(Value::Text(text)) => Ok(text.as_str()),
        other => Err(StoreError::Serialization(format!(
            "Expected text in column '{}', found {:?}",
            column, other
        ))),
    };

    let data = match row.get("document") {
        Some(Value::Blob(bytes)) => bson::from_slice::<Document>(bytes)?,
        other => {
            return Err(StoreError::Serialization(format!(
                "Expected a BSON document, found {:?}",
                other
            )));
        }
    };

    Ok(Record {
        id: Uuid::parse_str(text("id")?).map_err(|err| StoreError::Serialization(err.to_string()))?,
        data,
        created_at: parse_timestamp(text("created_at")?)
            .map_err(|err| StoreError::Serialization(err.to_string()))?,
        updated_at: parse_timestamp(text("updated_at")?)
            .map_err(|err| StoreError::Serialization(err.to_string()))?,
    })
}

#[async_trait]
impl StorageAdapter for DocumentStore {
    fn mode(&self) -> StorageMode {
        StorageMode::DocumentStore
    }

    async fn initialize_collection(&self, definition: &CollectionDefinition) -> StoreResult<()> {
        self.ensure_table().await?;
        info!(collection = definition.name(), "collection ready in document table");

        Ok(())
    }

    async fn update_collection_schema(
        &self,
        old: &CollectionDefinition,
        new: &CollectionDefinition,
    ) -> StoreResult<()> {
        // Documents carry their own shape; stored payloads are left as they are.
        debug!(
            collection = new.name(),
            from_version = old.version(),
            to_version = new.version(),
            "schema change needs no storage work"
        );

        Ok(())
    }

    async fn create(&self, definition: &CollectionDefinition, data: Document) -> StoreResult<Record> {
        let data = strip_nulls(normalize_payload(definition, data, WriteKind::Create)?);
        self.ensure_table().await?;

        let _guard = self.writes.lock().await;
        self.ensure_unique(definition, &data, None).await?;

        let record = Record::new(Uuid::new(), data);
        self.db
            .execute(
                "INSERT INTO _documents (id, collection_name, document, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                vec![
                    Value::Text(record.id.to_string()),
                    Value::Text(definition.name().to_string()),
                    Value::Blob(encode(&record.data)?),
                    Value::Text(format_timestamp(&record.created_at)),
                    Value::Text(format_timestamp(&record.updated_at)),
                ],
            )
            .await?;

        Ok(record)
    }

    async fn get_by_id(&self, definition: &CollectionDefinition, id: Uuid) -> StoreResult<Option<Record>> {
        self.find(definition, id).await
    }

    async fn update(
        &self,
        definition: &CollectionDefinition,
        id: Uuid,
        data: Document,
    ) -> StoreResult<Option<Record>> {
        let patch = normalize_payload(definition, data, WriteKind::Update)?;

        let _guard = self.writes.lock().await;
        let Some(mut record) = self.find(definition, id).await? else {
            return Ok(None);
        };
        self.ensure_unique(definition, &patch, Some(id)).await?;

        for (key, value) in patch {
            match value {
                Bson::Null => {
                    record.data.remove(&key);
                }
                value => {
                    record.data.insert(key, value);
                }
            }
        }
        record.updated_at = now();

        let changed = self
            .db
            .execute(
                "UPDATE _documents SET document = ?1, updated_at = ?2 WHERE id = ?3 AND collection_name = ?4",
                vec![
                    Value::Blob(encode(&record.data)?),
                    Value::Text(format_timestamp(&record.updated_at)),
                    Value::Text(id.to_string()),
                    Value::Text(definition.name().to_string()),
                ],
            )
            .await?;

        Ok((changed > 0).then_some(record))
    }

    async fn delete(&self, definition: &CollectionDefinition, id: Uuid) -> StoreResult<bool> {
        self.ensure_table().await?;

        let changed = self
            .db
            .execute(
                "DELETE FROM _documents WHERE id = ?1 AND collection_name = ?2",
                vec![
                    Value::Text(id.to_string()),
                    Value::Text(definition.name().to_string()),
                ],
            )
            .await?;

        Ok(changed > 0)
    }

    async fn query(&self, definition: &CollectionDefinition, query: Query) -> StoreResult<QueryResult<Record>> {
        query.validate(definition)?;
        let predicate = PredicateCompiler::new(definition).visit_query(&query)?;

        let mut records = self
            .load(definition)
            .await?
            .into_iter()
            .filter(|record| predicate.matches(record))
            .collect::<Vec<_>>();
        sort_records(definition, &mut records, &query.sort)?;
        debug!(collection = definition.name(), matched = records.len(), "query evaluated in memory");

        let page = query.pagination.paginate(records);
        Ok(match &query.fields {
            Some(fields) => page.map(|record| record.project(fields)),
            None => page,
        })
    }

    async fn is_unique(
        &self,
        definition: &CollectionDefinition,
        field: &str,
        value: &Bson,
        exclude_id: Option<Uuid>,
    ) -> StoreResult<bool> {
        let field_type = field_type_of(definition, field).ok_or_else(|| {
            StoreError::InvalidQuery(format!(
                "Unknown field '{}' for collection '{}'",
                field,
                definition.name()
            ))
        })?;

        let value = coerce_value(field_type, value.clone())?;
        if value == Bson::Null {
            return Ok(true);
        }

        let records = self.load(definition).await?;
        Ok(!collides(&records, field, Comparable::of(field_type, &value), field_type, exclude_id))
    }
}

/// Builds a [`DocumentStore`] and creates the shared table.
pub struct DocumentStoreBuilder {
    db: Database,
}

impl DocumentStoreBuilder {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AdapterBuilder for DocumentStoreBuilder {
    type Adapter = DocumentStore;

    async fn build(self) -> StoreResult<Self::Adapter> {
        let store = DocumentStore::new(self.db);
        store.ensure_table().await?;

        Ok(store)
    }
}
