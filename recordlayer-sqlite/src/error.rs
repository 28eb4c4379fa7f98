//! Driver error classification.

use rusqlite::{ErrorCode, ffi};
use thiserror::Error;

use recordlayer_core::error::StoreError;

/// Errors raised by the embedded database driver.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// A `UNIQUE` or `PRIMARY KEY` constraint rejected a write.
    /// Carries the driver message, which names the offending `table.column`.
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),
    /// The database could not be opened or configured.
    #[error("Failed to open database: {0}")]
    Open(String),
    #[error(transparent)]
    Sqlite(rusqlite::Error),
}

impl DatabaseError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DatabaseError::UniqueViolation(_))
    }

    /// Best-effort column named by a unique-violation message such as
    /// `UNIQUE constraint failed: coll_fruits.name`.
    pub fn violated_column(&self) -> Option<&str> {
        match self {
            DatabaseError::UniqueViolation(message) => message
                .rsplit(':')
                .next()
                .and_then(|columns| columns.split(',').next())
                .and_then(|column| column.trim().rsplit('.').next())
                .filter(|column| !column.is_empty()),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, message)
                if failure.code == ErrorCode::ConstraintViolation
                    && matches!(
                        failure.extended_code,
                        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    ) =>
            {
                DatabaseError::UniqueViolation(message.clone().unwrap_or_else(|| failure.to_string()))
            }
            _ => DatabaseError::Sqlite(err),
        }
    }
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        StoreError::StorageFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_violated_column() {
        let err = DatabaseError::UniqueViolation("UNIQUE constraint failed: coll_fruits.name".into());
        assert_eq!(err.violated_column(), Some("name"));

        let composite = DatabaseError::UniqueViolation("UNIQUE constraint failed: t.a, t.b".into());
        assert_eq!(composite.violated_column(), Some("a"));

        let other = DatabaseError::Open("no such directory".into());
        assert_eq!(other.violated_column(), None);
        assert!(!other.is_unique_violation());
    }

    #[test]
    fn converts_into_storage_failure() {
        let err: StoreError = DatabaseError::Open("disk full".into()).into();
        assert!(matches!(err, StoreError::StorageFailure(message) if message.contains("disk full")));
    }
}
