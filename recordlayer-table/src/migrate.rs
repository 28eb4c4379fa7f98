//! Schema migration engine for physical collection tables.
//!
//! The engine turns the [`SchemaDiff`]s between two definitions of a collection into DDL,
//! executes each statement in order and appends it to the `_schema_migrations` history
//! table right after it succeeds. Nothing runs inside a transaction: when a step fails, the
//! steps that already ran stay applied and recorded.
//!
//! # Actions
//!
//! - an added field becomes a nullable column (plus a unique index when the field is
//!   unique);
//! - a removed field keeps its column and data, and is annotated in `_deprecated_columns`;
//! - a type change copies the column through a shadow column with an explicit cast, since
//!   the backend cannot alter a column type in place.
//!
//! # Example
//!
//! ```ignore
//! use recordlayer_table::SchemaMigrationEngine;
//!
//! let engine = SchemaMigrationEngine::new(db);
//! let applied = engine.migrate_schema(&v1, &v2).await?;
//! let history = engine.migration_history("products").await?;
//! ```

use recordlayer_core::{
    definition::{CollectionDefinition, FieldDefinition, FieldType},
    error::{StoreError, StoreResult},
    record::{format_timestamp, now, parse_timestamp},
    schema::{
        MigrationKind, MigrationRecord, SchemaDiff, detect_differences, ensure_type_change_compatible,
        is_type_change_compatible,
    },
};
use recordlayer_sqlite::{Database, Row, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{
    ddl::{self, SHADOW_SUFFIX},
    sql::{column_type, validate_identifier},
};

pub const MIGRATIONS_TABLE: &str = "_schema_migrations";
pub const DEPRECATED_COLUMNS_TABLE: &str = "_deprecated_columns";

const SYSTEM_TABLES_DDL: &str = "\
CREATE TABLE IF NOT EXISTS _schema_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection_name TEXT NOT NULL,
    migration_type TEXT NOT NULL,
    statement TEXT NOT NULL,
    executed_at TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx__schema_migrations_collection ON _schema_migrations (collection_name);
CREATE TABLE IF NOT EXISTS _deprecated_columns (
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    note TEXT NOT NULL,
    deprecated_at TIMESTAMP NOT NULL,
    PRIMARY KEY (table_name, column_name)
);";

/// Executes and records schema changes for collections stored as physical tables.
///
/// Cloning is cheap; clones share the database handle.
#[derive(Debug, Clone)]
pub struct SchemaMigrationEngine {
    db: Database,
    ready: Arc<OnceCell<()>>,
}

impl SchemaMigrationEngine {
    pub fn new(db: Database) -> Self {
        Self { db, ready: Arc::new(OnceCell::new()) }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Creates the history and deprecation tables once per engine.
    pub async fn ensure_tables(&self) -> StoreResult<()> {
        self.ready
            .get_or_try_init(|| async {
                self.db.execute_batch(SYSTEM_TABLES_DDL).await?;
                debug!("migration tables ready");
                Ok::<_, StoreError>(())
            })
            .await?;

        Ok(())
    }

    pub fn detect_differences(&self, old: &CollectionDefinition, new: &CollectionDefinition) -> Vec<SchemaDiff> {
        detect_differences(old, new)
    }

    pub fn is_type_change_compatible(&self, from: FieldType, to: FieldType) -> bool {
        is_type_change_compatible(from, to)
    }

    /// Creates the table and unique indexes of a collection.
    ///
    /// Returns the `CreateTable` records appended, which is empty when the table already
    /// existed.
    pub async fn create_table(&self, definition: &CollectionDefinition) -> StoreResult<Vec<MigrationRecord>> {
        self.ensure_tables().await?;

        let table = definition.table_name();
        validate_identifier(&table)?;
        if self.db.table_exists(&table).await? {
            debug!(collection = definition.name(), table = %table, "table already exists");
            return Ok(Vec::new());
        }

        let mut op = MigrateOp::new(self, definition.name(), &table);
        op.run(MigrationKind::CreateTable, ddl::create_table(definition)?).await?;
        for field in definition.unique_fields() {
            op.run(MigrationKind::CreateTable, ddl::create_unique_index(&table, &field.name)?)
                .await?;
        }

        Ok(op.finish())
    }

    /// Evolves the table of `old` into the shape of `new`.
    ///
    /// Differences are applied in the order [`detect_differences`] reports them. An
    /// incompatible type change fails with `IncompatibleSchemaChange` before any statement
    /// for that field runs; actions applied before it are kept.
    pub async fn migrate_schema(
        &self,
        old: &CollectionDefinition,
        new: &CollectionDefinition,
    ) -> StoreResult<Vec<MigrationRecord>> {
        self.ensure_tables().await?;

        let table = new.table_name();
        validate_identifier(&table)?;
        if !self.db.table_exists(&table).await? {
            return self.create_table(new).await;
        }

        let diffs = self.detect_differences(old, new);
        info!(collection = new.name(), table = %table, changes = diffs.len(), "migrating collection schema");

        let mut op = MigrateOp::new(self, new.name(), &table);
        for diff in diffs {
            match diff {
                SchemaDiff::FieldAdded { field } => op.add_column(&field).await?,
                SchemaDiff::FieldRemoved { field } => op.deprecate_column(&field.name).await?,
                SchemaDiff::TypeChanged { field, from, to } => {
                    let was_unique = old.field(&field).is_some_and(|f| f.unique);
                    let is_unique = new.field(&field).is_some_and(|f| f.unique);
                    op.alter_column_type(&field, from, to, was_unique, is_unique).await?;
                }
            }
        }

        Ok(op.finish())
    }

    /// Appends one entry to the migration history.
    pub async fn record_migration(
        &self,
        collection: &str,
        kind: MigrationKind,
        statement: &str,
    ) -> StoreResult<MigrationRecord> {
        self.ensure_tables().await?;

        let record = MigrationRecord::new(collection, kind, statement);
        self.db
            .execute(
                "INSERT INTO _schema_migrations (collection_name, migration_type, statement, executed_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                vec![
                    Value::Text(record.collection.clone()),
                    Value::Text(record.kind.to_string()),
                    Value::Text(record.statement.clone()),
                    Value::Text(format_timestamp(&record.executed_at)),
                ],
            )
            .await?;

        Ok(record)
    }

    /// History of one collection, oldest first.
    pub async fn migration_history(&self, collection: &str) -> StoreResult<Vec<MigrationRecord>> {
        self.ensure_tables().await?;

        self.db
            .query(
                "SELECT collection_name, migration_type, statement, executed_at \
                 FROM _schema_migrations WHERE collection_name = ?1 ORDER BY id",
                vec![Value::Text(collection.to_string())],
            )
            .await?
            .iter()
            .map(migration_from_row)
            .collect()
    }

    /// History of every collection, oldest first.
    pub async fn all_migration_history(&self) -> StoreResult<Vec<MigrationRecord>> {
        self.ensure_tables().await?;

        self.db
            .query(
                "SELECT collection_name, migration_type, statement, executed_at \
                 FROM _schema_migrations ORDER BY id",
                Vec::new(),
            )
            .await?
            .iter()
            .map(migration_from_row)
            .collect()
    }

    /// Columns of `table` annotated as deprecated, in column order.
    pub async fn deprecated_columns(&self, table: &str) -> StoreResult<Vec<String>> {
        self.ensure_tables().await?;

        let rows = self
            .db
            .query(
                "SELECT column_name FROM _deprecated_columns WHERE table_name = ?1 ORDER BY column_name",
                vec![Value::Text(table.to_string())],
            )
            .await?;

        rows.iter().map(|row| text_column(row, "column_name")).collect()
    }

    async fn index_exists(&self, index: &str) -> StoreResult<bool> {
        let row = self
            .db
            .query_one(
                "SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1",
                vec![Value::Text(index.to_string())],
            )
            .await?;

        Ok(row.is_some())
    }

    async fn column_types(&self, table: &str) -> StoreResult<Vec<(String, String)>> {
        let rows = self
            .db
            .query(
                "SELECT name, type FROM pragma_table_info(?1) ORDER BY cid",
                vec![Value::Text(table.to_string())],
            )
            .await?;

        rows.iter()
            .map(|row| Ok((text_column(row, "name")?, text_column(row, "type")?)))
            .collect()
    }
}

/// Statements of one `migrate_schema` or `create_table` call, applied to a single table.
struct MigrateOp<'a> {
    engine: &'a SchemaMigrationEngine,
    collection: &'a str,
    table: &'a str,
    applied: Vec<MigrationRecord>,
}

impl<'a> MigrateOp<'a> {
    fn new(engine: &'a SchemaMigrationEngine, collection: &'a str, table: &'a str) -> Self {
        Self { engine, collection, table, applied: Vec::new() }
    }

    fn finish(self) -> Vec<MigrationRecord> {
        self.applied
    }

    /// Executes one statement and records it once it has succeeded.
    async fn run(&mut self, kind: MigrationKind, statement: String) -> StoreResult<()> {
        self.engine.db.execute(&statement, Vec::new()).await?;
        info!(collection = self.collection, kind = %kind, statement = %statement, "migration applied");

        let record = self
            .engine
            .record_migration(self.collection, kind, &statement)
            .await?;
        self.applied.push(record);

        Ok(())
    }

    async fn add_column(&mut self, field: &FieldDefinition) -> StoreResult<()> {
        let existing = self
            .engine
            .column_types(self.table)
            .await?
            .into_iter()
            .find(|(name, _)| *name == field.name);

        let mut indexed = false;
        match existing {
            // The column survived an earlier removal: reactivate it instead of adding it.
            Some((_, declared)) => {
                self.run(
                    MigrationKind::AddColumn,
                    format!(
                        "DELETE FROM _deprecated_columns WHERE table_name = {} AND column_name = {}",
                        sql_literal(self.table),
                        sql_literal(&field.name)
                    ),
                )
                .await?;

                indexed = self
                    .engine
                    .index_exists(&ddl::unique_index_name(self.table, &field.name)?)
                    .await?;

                match field_type_for_column(&declared) {
                    Some(previous) if previous != field.field_type => {
                        return self
                            .alter_column_type(&field.name, previous, field.field_type, indexed, field.unique)
                            .await;
                    }
                    _ => {}
                }

                if indexed && !field.unique {
                    self.run(MigrationKind::AddColumn, ddl::drop_unique_index(self.table, &field.name)?)
                        .await?;
                }
            }
            None => {
                self.run(MigrationKind::AddColumn, ddl::add_column(self.table, field)?)
                    .await?;
            }
        }

        if field.unique && !indexed {
            self.run(MigrationKind::AddColumn, ddl::create_unique_index(self.table, &field.name)?)
                .await?;
        }

        Ok(())
    }

    async fn deprecate_column(&mut self, column: &str) -> StoreResult<()> {
        validate_identifier(column)?;

        let statement = format!(
            "INSERT INTO _deprecated_columns (table_name, column_name, note, deprecated_at) \
             VALUES ({}, {}, {}, {}) \
             ON CONFLICT (table_name, column_name) DO UPDATE SET note = excluded.note, deprecated_at = excluded.deprecated_at",
            sql_literal(self.table),
            sql_literal(column),
            sql_literal(&format!("DEPRECATED: field removed from collection '{}'", self.collection)),
            sql_literal(&format_timestamp(&now())),
        );

        self.run(MigrationKind::DeprecateColumn, statement).await
    }

    async fn alter_column_type(
        &mut self,
        column: &str,
        from: FieldType,
        to: FieldType,
        was_unique: bool,
        is_unique: bool,
    ) -> StoreResult<()> {
        ensure_type_change_compatible(self.collection, column, from, to)?;

        let shadow = format!("{}{}", column, SHADOW_SUFFIX);
        let table = self.table;
        let kind = MigrationKind::AlterColumnType;

        self.run(kind, ddl::add_raw_column(table, &shadow, to)?).await?;
        self.run(kind, ddl::copy_with_cast(table, column, &shadow, from, to)?).await?;
        if was_unique {
            self.run(kind, ddl::drop_unique_index(table, column)?).await?;
        }
        self.run(kind, ddl::drop_column(table, column)?).await?;
        self.run(kind, ddl::rename_column(table, &shadow, column)?).await?;
        if is_unique {
            self.run(kind, ddl::create_unique_index(table, column)?).await?;
        }

        Ok(())
    }
}

/// Field type a declared column type was created for.
fn field_type_for_column(declared: &str) -> Option<FieldType> {
    FieldType::ALL
        .into_iter()
        .find(|field_type| column_type(*field_type).eq_ignore_ascii_case(declared))
}

/// Single-quoted SQL string literal. Used only for statements that are recorded verbatim.
fn sql_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn text_column(row: &Row, column: &str) -> StoreResult<String> {
    match row.get(column) {
        Some(Value::Text(text)) => Ok(text.clone()),
        other => Err(StoreError::Serialization(format!(
            "Expected text in column '{}', found {:?}",
            column, other
        ))),
    }
}

fn migration_from_row(row: &Row) -> StoreResult<MigrationRecord> {
    Ok(MigrationRecord {
        collection: text_column(row, "collection_name")?,
        kind: text_column(row, "migration_type")?.parse()?,
        statement: text_column(row, "statement")?,
        executed_at: parse_timestamp(&text_column(row, "executed_at")?)
            .map_err(|err| StoreError::Serialization(err.to_string()))?,
    })
}
