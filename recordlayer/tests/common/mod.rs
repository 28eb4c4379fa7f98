#![allow(dead_code)]

use bson::{Bson, doc};
use std::sync::Arc;

use recordlayer::{prelude::*, sqlite::Database};

pub const MODES: [StorageMode; 2] = [StorageMode::PhysicalTables, StorageMode::DocumentStore];

pub async fn adapter(mode: StorageMode) -> Arc<dyn StorageAdapter> {
    build_adapter_on(Database::open_in_memory().unwrap(), mode)
        .await
        .unwrap()
}

pub fn fruits() -> CollectionDefinition {
    CollectionDefinition::builder("fruits")
        .field(FieldDefinition::new("name", FieldType::String).nullable(false).unique())
        .field(FieldDefinition::new("price", FieldType::Double))
        .field(FieldDefinition::new("color", FieldType::String))
        .field(FieldDefinition::new("organic", FieldType::Boolean))
        .build()
        .unwrap()
}

pub const FRUITS: [(&str, f64); 5] = [
    ("Apple", 1.99),
    ("Banana", 0.99),
    ("Cherry", 3.99),
    ("Date", 5.99),
    ("Elderberry", 7.99),
];

/// Initializes the fruit collection and inserts the fruit dataset in order.
pub async fn seed_fruits(adapter: &dyn StorageAdapter) -> CollectionDefinition {
    let def = fruits();
    adapter.initialize_collection(&def).await.unwrap();

    for (name, price) in FRUITS {
        adapter
            .create(&def, doc! { "name": name, "price": price })
            .await
            .unwrap();
    }

    def
}

pub fn names(result: &QueryResult<Record>) -> Vec<String> {
    result
        .records
        .iter()
        .map(|record| record.get("name").and_then(Bson::as_str).unwrap_or_default().to_string())
        .collect()
}
