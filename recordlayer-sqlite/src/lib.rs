//! Embedded SQLite driver for recordlayer.
//!
//! Provides parameterized statement execution and owned result rows over a single shared
//! connection, plus classification of unique-constraint failures so adapters can report
//! which field collided.
//!
//! ```ignore
//! use recordlayer_sqlite::{Database, Value};
//!
//! let db = Database::open_in_memory()?;
//! db.execute_batch("CREATE TABLE t (name TEXT)").await?;
//! db.execute("INSERT INTO t (name) VALUES (?)", vec![Value::Text("a".into())]).await?;
//! let rows = db.query("SELECT name FROM t", vec![]).await?;
//! ```

mod database;
mod error;

pub use database::{
    DEFAULT_BUSY_TIMEOUT_MS, Database, DatabaseBuilder, DatabaseConfig, JournalMode, Row,
};
pub use error::DatabaseError;
pub use rusqlite::types::Value;
