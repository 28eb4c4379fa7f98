use async_trait::async_trait;
use bson::{Bson, Document, Uuid};
use recordlayer_core::{
    adapter::{AdapterBuilder, StorageAdapter},
    definition::{CollectionDefinition, CREATED_AT_FIELD, ID_FIELD, StorageMode, UPDATED_AT_FIELD},
    error::{StoreError, StoreResult},
    page::{PaginationMetadata, QueryResult},
    query::{FilterVisitor, Query, field_type_of},
    record::{Record, WriteKind, coerce_value, format_timestamp, normalize_payload, now, parse_timestamp, text_of},
};
use recordlayer_sqlite::{Database, DatabaseError, Row, Value};
use tracing::{debug, info, warn};

use crate::{
    ddl::select_list,
    migrate::SchemaMigrationEngine,
    sql::{from_sql_value, quote_ident, to_sql_value},
    translator::{SqlFilterTranslator, order_by_clause},
};

/// Stores every collection in its own table, one column per field.
///
/// Schema changes are delegated to the [`SchemaMigrationEngine`], which shares this store's
/// database handle.
#[derive(Debug, Clone)]
pub struct TableStore {
    db: Database,
    migrations: SchemaMigrationEngine,
}

impl TableStore {
    pub fn new(db: Database) -> Self {
        Self {
            migrations: SchemaMigrationEngine::new(db.clone()),
            db,
        }
    }

    pub fn builder(db: Database) -> TableStoreBuilder {
        TableStoreBuilder::new(db)
    }

    pub fn migrations(&self) -> &SchemaMigrationEngine {
        &self.migrations
    }

    fn table(definition: &CollectionDefinition) -> StoreResult<String> {
        quote_ident(&definition.table_name())
    }

    fn record_from_row(definition: &CollectionDefinition, row: &Row) -> StoreResult<Record> {
        let text = |column: &str| match row.get(column) {
            Some(Value::Text(text)) => Ok(text.as_str()),
            other => Err(StoreError::Serialization(format!(
                "Expected text in column '{}', found {:?}",
                column, other
            ))),
        };

        let id = Uuid::parse_str(text(ID_FIELD)?)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        let created_at = parse_timestamp(text(CREATED_AT_FIELD)?)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        let updated_at = parse_timestamp(text(UPDATED_AT_FIELD)?)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;

        let data = row
            .iter()
            .filter_map(|(column, value)| {
                let field = definition.field(column)?;
                match from_sql_value(field.field_type, value.clone()) {
                    Bson::Null => None,
                    value => Some((column.to_string(), value)),
                }
            })
            .collect::<Document>();

        Ok(Record { id, data, created_at, updated_at })
    }

    /// Turns a unique violation reported by the backend into a `UniqueConstraintViolation`
    /// naming the colliding field.
    ///
    /// Each unique field of the payload is re-checked against the stored rows. When none of
    /// them collides the driver message decides between `"id"` and `"unknown"`.
    async fn unique_violation(
        &self,
        definition: &CollectionDefinition,
        data: &Document,
        exclude_id: Option<Uuid>,
        err: DatabaseError,
    ) -> StoreError {
        for field in definition.unique_fields() {
            let Some(value) = data.get(&field.name).filter(|value| !matches!(value, Bson::Null)) else {
                continue;
            };

            if let Ok(false) = self.is_unique(definition, &field.name, value, exclude_id).await {
                return StoreError::UniqueConstraintViolation {
                    collection: definition.name().to_string(),
                    field: field.name.clone(),
                    value: text_of(value).unwrap_or_default(),
                };
            }
        }

        let field = match err.violated_column() {
            Some(ID_FIELD) => ID_FIELD,
            _ => "unknown",
        };
        warn!(
            collection = definition.name(),
            field,
            error = %err,
            "could not attribute unique violation to a field"
        );

        StoreError::UniqueConstraintViolation {
            collection: definition.name().to_string(),
            field: field.to_string(),
            value: String::new(),
        }
    }
}

fn strip_nulls(data: Document) -> Document {
    data.into_iter()
        .filter(|(_, value)| !matches!(value, Bson::Null))
        .collect()
}

fn bind_payload(definition: &CollectionDefinition, data: &Document) -> StoreResult<Vec<(String, Value)>> {
    data.iter()
        .map(|(key, value)| {
            let field_type = definition
                .field(key)
                .map(|field| field.field_type)
                .ok_or_else(|| StoreError::InvalidRecord(format!("Unknown field '{}'", key)))?;
            Ok((quote_ident(key)?, to_sql_value(field_type, value)?))
        })
        .collect()
}

// SQLite integers are signed; an offset past `i64::MAX` still means "nothing left".
fn sql_count(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

#[async_trait]
impl StorageAdapter for TableStore {
    fn mode(&self) -> StorageMode {
        StorageMode::PhysicalTables
    }

    async fn initialize_collection(&self, definition: &CollectionDefinition) -> StoreResult<()> {
        let created = self.migrations.create_table(definition).await?;
        if !created.is_empty() {
            info!(collection = definition.name(), table = %definition.table_name(), "collection table created");
        }

        Ok(())
    }

    async fn update_collection_schema(
        &self,
        old: &CollectionDefinition,
        new: &CollectionDefinition,
    ) -> StoreResult<()> {
        self.migrations.migrate_schema(old, new).await?;

        Ok(())
    }

    async fn create(&self, definition: &CollectionDefinition, data: Document) -> StoreResult<Record> {
        let data = strip_nulls(normalize_payload(definition, data, WriteKind::Create)?);
        let record = Record::new(Uuid::new(), data);

        let mut columns = vec![
            quote_ident(ID_FIELD)?,
            quote_ident(CREATED_AT_FIELD)?,
            quote_ident(UPDATED_AT_FIELD)?,
        ];
        let mut params = vec![
            Value::Text(record.id.to_string()),
            Value::Text(format_timestamp(&record.created_at)),
            Value::Text(format_timestamp(&record.updated_at)),
        ];
        for (column, value) in bind_payload(definition, &record.data)? {
            columns.push(column);
            params.push(value);
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            Self::table(definition)?,
            columns.join(", "),
            placeholders(columns.len())
        );

        match self.db.execute(&sql, params).await {
            Ok(_) => Ok(record),
            Err(err) if err.is_unique_violation() => {
                Err(self.unique_violation(definition, &record.data, None, err).await)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_by_id(&self, definition: &CollectionDefinition, id: Uuid) -> StoreResult<Option<Record>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            select_list(definition, None)?,
            Self::table(definition)?,
            quote_ident(ID_FIELD)?
        );

        self.db
            .query_one(&sql, vec![Value::Text(id.to_string())])
            .await?
            .map(|row| Self::record_from_row(definition, &row))
            .transpose()
    }

    async fn update(
        &self,
        definition: &CollectionDefinition,
        id: Uuid,
        data: Document,
    ) -> StoreResult<Option<Record>> {
        let data = normalize_payload(definition, data, WriteKind::Update)?;

        let mut assignments = vec![format!("{} = ?", quote_ident(UPDATED_AT_FIELD)?)];
        let mut params = vec![Value::Text(format_timestamp(&now()))];
        for (column, value) in bind_payload(definition, &data)? {
            assignments.push(format!("{} = ?", column));
            params.push(value);
        }
        params.push(Value::Text(id.to_string()));

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ? RETURNING {}",
            Self::table(definition)?,
            assignments.join(", "),
            quote_ident(ID_FIELD)?,
            select_list(definition, None)?
        );

        match self.db.query_one(&sql, params).await {
            Ok(row) => row.map(|row| Self::record_from_row(definition, &row)).transpose(),
            Err(err) if err.is_unique_violation() => {
                Err(self.unique_violation(definition, &data, Some(id), err).await)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, definition: &CollectionDefinition, id: Uuid) -> StoreResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            Self::table(definition)?,
            quote_ident(ID_FIELD)?
        );

        Ok(self.db.execute(&sql, vec![Value::Text(id.to_string())]).await? > 0)
    }

    async fn query(&self, definition: &CollectionDefinition, query: Query) -> StoreResult<QueryResult<Record>> {
        query.validate(definition)?;

        let table = Self::table(definition)?;
        let filter = SqlFilterTranslator::new(definition).visit_query(&query)?;
        let where_clause = filter.where_clause();

        let count_sql = format!("SELECT COUNT(*) AS total FROM {}{}", table, where_clause);
        let total = match self.db.query_one(&count_sql, filter.params.clone()).await? {
            Some(row) => match row.get("total") {
                Some(Value::Integer(total)) => usize::try_from(*total).unwrap_or_default(),
                _ => 0,
            },
            None => 0,
        };

        let select_sql = format!(
            "SELECT {} FROM {}{}{} LIMIT ? OFFSET ?",
            select_list(definition, query.fields.as_deref())?,
            table,
            where_clause,
            order_by_clause(&query.sort)?
        );
        debug!(collection = definition.name(), sql = %select_sql, "query plan");

        let mut params = filter.params;
        params.push(Value::Integer(sql_count(query.pagination.page_size())));
        params.push(Value::Integer(sql_count(query.pagination.offset())));

        let records = self
            .db
            .query(&select_sql, params)
            .await?
            .iter()
            .map(|row| Self::record_from_row(definition, row))
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(QueryResult::new(
            records,
            PaginationMetadata::new(total, &query.pagination),
        ))
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

        let mut sql = format!(
            "SELECT COUNT(*) AS total FROM {} WHERE {} = ?",
            Self::table(definition)?,
            quote_ident(field)?
        );
        let mut params = vec![to_sql_value(field_type, &value)?];
        if let Some(id) = exclude_id {
            sql.push_str(&format!(" AND {} <> ?", quote_ident(ID_FIELD)?));
            params.push(Value::Text(id.to_string()));
        }

        let count = match self.db.query_one(&sql, params).await? {
            Some(row) => matches!(row.get("total"), Some(Value::Integer(count)) if *count > 0),
            None => false,
        };

        Ok(!count)
    }
}

/// Builds a [`TableStore`] and prepares its migration tables.
pub struct TableStoreBuilder {
    db: Database,
}

impl TableStoreBuilder {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AdapterBuilder for TableStoreBuilder {
    type Adapter = TableStore;

    async fn build(self) -> StoreResult<Self::Adapter> {
        let store = TableStore::new(self.db);
        store.migrations.ensure_tables().await?;

        Ok(store)
    }
}
