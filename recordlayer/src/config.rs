//! Adapter configuration and the explicit adapter factory.
//!
//! The storage layout is chosen once, at startup, from an [`AdapterConfig`]. Nothing else
//! in the workspace decides which adapter a caller gets.
//!
//! ```toml
//! mode = "document_store"
//!
//! [database]
//! path = "data/records.db"
//! busy_timeout_ms = 2000
//! journal_mode = "wal"
//! ```

use serde::{Deserialize, Serialize};
use std::{path::Path, sync::Arc};
use tracing::info;

use recordlayer_core::{
    adapter::{AdapterBuilder, StorageAdapter},
    definition::StorageMode,
    error::{StoreError, StoreResult},
};
use recordlayer_document::DocumentStoreBuilder;
use recordlayer_sqlite::{Database, DatabaseBuilder, DatabaseConfig};
use recordlayer_table::{SchemaMigrationEngine, TableStoreBuilder};

/// Selects the storage layout and the database it lives in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default)]
    pub mode: StorageMode,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl AdapterConfig {
    pub fn new(mode: StorageMode) -> Self {
        Self { mode, ..Default::default() }
    }

    pub fn with_database(mut self, database: DatabaseConfig) -> Self {
        self.database = database;
        self
    }

    /// Parses a configuration from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> StoreResult<Self> {
        let config: AdapterConfig = toml::from_str(content)
            .map_err(|err| StoreError::Configuration(format!("Failed to parse adapter config: {}", err)))?;

        config.validate()?;

        Ok(config)
    }

    /// Loads a configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|err| {
            StoreError::Configuration(format!(
                "Failed to read adapter config {}: {}",
                path.as_ref().display(),
                err
            ))
        })?;

        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.database.busy_timeout_ms == 0 {
            return Err(StoreError::Configuration(
                "busy_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if let Some(path) = &self.database.path
            && path.as_os_str().is_empty()
        {
            return Err(StoreError::Configuration(
                "database path must not be empty; omit it for an in-memory database".to_string(),
            ));
        }

        Ok(())
    }
}

/// Opens the configured database and returns the adapter for the configured mode.
pub async fn build_adapter(config: &AdapterConfig) -> StoreResult<Arc<dyn StorageAdapter>> {
    config.validate()?;

    let db = DatabaseBuilder::from_config(&config.database).open()?;

    build_adapter_on(db, config.mode).await
}

/// Returns the adapter for `mode` over an already opened database.
pub async fn build_adapter_on(db: Database, mode: StorageMode) -> StoreResult<Arc<dyn StorageAdapter>> {
    let adapter: Arc<dyn StorageAdapter> = match mode {
        StorageMode::PhysicalTables => Arc::new(TableStoreBuilder::new(db).build().await?),
        StorageMode::DocumentStore => Arc::new(DocumentStoreBuilder::new(db).build().await?),
    };

    info!(mode = %mode, "storage adapter ready");

    Ok(adapter)
}

/// Migration engine over `db`, with its history tables in place.
pub async fn build_migration_engine(db: Database) -> StoreResult<SchemaMigrationEngine> {
    let engine = SchemaMigrationEngine::new(db);
    engine.ensure_tables().await?;

    Ok(engine)
}
