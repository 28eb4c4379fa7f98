//! Embedded SQLite database handle.
//!
//! [`Database`] wraps a single connection behind an async mutex. It offers the two
//! primitives the storage layer needs: executing a parameterized statement and running a
//! parameterized query that returns owned rows. Values are always bound, never interpolated.

use rusqlite::{Connection, params_from_iter, types::Value};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::DatabaseError;

/// Default busy timeout in milliseconds.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Journal mode applied to file-backed databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    #[default]
    Wal,
    Delete,
}

impl JournalMode {
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// Connection settings for the embedded database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file. `None` opens a private in-memory database.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Ignored for in-memory databases.
    #[serde(default)]
    pub journal_mode: JournalMode,
}

const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: JournalMode::default(),
        }
    }
}

/// One result row with its column names.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of the named column, `None` when the row has no such column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|name| name == column)
            .map(|index| &self.values[index])
    }

    /// Iterates `(column, value)` pairs in select order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

/// Shared handle to an embedded SQLite database.
///
/// Cloning is cheap; all clones use the same connection. Statements run one at a time.
#[derive(Debug, Clone)]
pub struct Database {
    connection: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(connection: Connection) -> Self {
        Self { connection: Arc::new(Mutex::new(connection)) }
    }

    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::default()
    }

    /// Opens a private in-memory database with default settings.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        DatabaseBuilder::default().open()
    }

    /// Opens a database described by `config`.
    pub fn open(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        DatabaseBuilder::from_config(config).open()
    }

    /// Executes one statement and returns the number of changed rows.
    pub async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<usize, DatabaseError> {
        debug!(sql, params = params.len(), "execute");
        let connection = self.connection.lock().await;
        let mut statement = connection.prepare_cached(sql)?;

        Ok(statement.execute(params_from_iter(params.iter()))?)
    }

    /// Executes several `;`-separated statements without parameters.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), DatabaseError> {
        debug!(sql, "execute batch");
        let connection = self.connection.lock().await;

        Ok(connection.execute_batch(sql)?)
    }

    /// Runs a query and collects every row.
    pub async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>, DatabaseError> {
        debug!(sql, params = params.len(), "query");
        let connection = self.connection.lock().await;
        let mut statement = connection.prepare_cached(sql)?;
        let columns: Arc<[String]> = statement
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let width = columns.len();

        let mut rows = statement.query(params_from_iter(params.iter()))?;
        let mut collected = Vec::new();
        while let Some(row) = rows.next()? {
            let values = (0..width)
                .map(|index| row.get::<_, Value>(index))
                .collect::<Result<Vec<_>, _>>()?;
            collected.push(Row { columns: columns.clone(), values });
        }

        Ok(collected)
    }

    /// Runs a query expected to return at most one row.
    pub async fn query_one(&self, sql: &str, params: Vec<Value>) -> Result<Option<Row>, DatabaseError> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    /// Whether a table with the given name exists.
    pub async fn table_exists(&self, table: &str) -> Result<bool, DatabaseError> {
        let row = self
            .query_one(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                vec![Value::Text(table.to_string())],
            )
            .await?;

        Ok(row.is_some())
    }

    /// Column names of a table in declaration order. Empty when the table does not exist.
    pub async fn table_columns(&self, table: &str) -> Result<Vec<String>, DatabaseError> {
        let rows = self
            .query(
                "SELECT name FROM pragma_table_info(?1) ORDER BY cid",
                vec![Value::Text(table.to_string())],
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match row.values.into_iter().next() {
                Some(Value::Text(name)) => Some(name),
                _ => None,
            })
            .collect())
    }
}

/// Builder for [`Database`].
#[derive(Debug, Clone)]
pub struct DatabaseBuilder {
    config: DatabaseConfig,
}

impl DatabaseBuilder {
    pub fn new() -> Self {
        Self { config: DatabaseConfig::default() }
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self { config: config.clone() }
    }

    /// Stores data in `path` instead of memory.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = Some(path.into());
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.config.busy_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn journal_mode(mut self, journal_mode: JournalMode) -> Self {
        self.config.journal_mode = journal_mode;
        self
    }

    /// Opens the connection and applies the configured pragmas.
    pub fn open(self) -> Result<Database, DatabaseError> {
        let connection = match &self.config.path {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
        .map_err(|err| DatabaseError::Open(err.to_string()))?;

        connection
            .busy_timeout(Duration::from_millis(self.config.busy_timeout_ms))
            .map_err(|err| DatabaseError::Open(err.to_string()))?;

        if self.config.path.is_some() {
            // journal_mode returns the resulting mode as a row, so it cannot go through execute.
            connection
                .query_row(
                    &format!("PRAGMA journal_mode = {}", self.config.journal_mode.pragma_value()),
                    [],
                    |_| Ok(()),
                )
                .map_err(|err| DatabaseError::Open(err.to_string()))?;
        }

        info!(
            path = ?self.config.path,
            busy_timeout_ms = self.config.busy_timeout_ms,
            "database opened"
        );

        Ok(Database::new(connection))
    }
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_and_query_bind_parameters() {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT UNIQUE, price REAL)")
            .await
            .unwrap();

        let inserted = db
            .execute(
                "INSERT INTO items (name, price) VALUES (?, ?)",
                vec![Value::Text("apple'; DROP TABLE items; --".into()), Value::Real(1.5)],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let rows = db
            .query("SELECT name, price FROM items WHERE price > ?", vec![Value::Real(1.0)])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].columns(), ["name".to_string(), "price".to_string()]);
        assert_eq!(rows[0].get("price"), Some(&Value::Real(1.5)));
        assert_eq!(rows[0].get("missing"), None);
        assert!(db.table_exists("items").await.unwrap());
    }

    #[tokio::test]
    async fn unique_violations_are_classified() {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE tags (id TEXT PRIMARY KEY, label TEXT); CREATE UNIQUE INDEX ux_tags_label ON tags (label);")
            .await
            .unwrap();

        db.execute("INSERT INTO tags VALUES (?, ?)", vec![Value::Text("a".into()), Value::Text("red".into())])
            .await
            .unwrap();

        let err = db
            .execute("INSERT INTO tags VALUES (?, ?)", vec![Value::Text("b".into()), Value::Text("red".into())])
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(err.violated_column(), Some("label"));

        let err = db
            .execute("INSERT INTO tags VALUES (?, ?)", vec![Value::Text("a".into()), Value::Text("blue".into())])
            .await
            .unwrap_err();
        assert_eq!(err.violated_column(), Some("id"));

        let err = db.execute("INSERT INTO nowhere VALUES (1)", vec![]).await.unwrap_err();
        assert!(!err.is_unique_violation());
    }

    #[tokio::test]
    async fn table_columns_follow_declaration_order() {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE t (b TEXT, a INTEGER)").await.unwrap();

        assert_eq!(db.table_columns("t").await.unwrap(), vec!["b", "a"]);
        assert!(db.table_columns("absent").await.unwrap().is_empty());
        assert!(!db.table_exists("absent").await.unwrap());
    }

    #[tokio::test]
    async fn file_database_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");

        let db = Database::builder().path(&path).open().unwrap();
        db.execute_batch("CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT)").await.unwrap();
        db.execute("INSERT INTO kv VALUES (?1, ?2)", vec![Value::Text("a".into()), Value::Text("1".into())])
            .await
            .unwrap();
        drop(db);

        let config = DatabaseConfig { path: Some(path), ..Default::default() };
        let reopened = Database::open(&config).unwrap();
        let row = reopened.query_one("SELECT v FROM kv WHERE k = 'a'", vec![]).await.unwrap();
        assert_eq!(row.unwrap().get("v"), Some(&Value::Text("1".into())));
    }
}
