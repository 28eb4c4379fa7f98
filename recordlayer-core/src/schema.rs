//! Schema differences between two definitions of one collection.
//!
//! [`detect_differences`] is a pure function; executing the resulting actions is the job of a
//! backend-specific migration engine, which records each executed statement as a
//! [`MigrationRecord`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::{
    definition::{CollectionDefinition, FieldDefinition, FieldType},
    error::{StoreError, StoreResult},
};

/// One structural difference between two definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaDiff {
    FieldAdded { field: FieldDefinition },
    FieldRemoved { field: FieldDefinition },
    TypeChanged { field: String, from: FieldType, to: FieldType },
}

impl SchemaDiff {
    /// Name of the field the difference concerns.
    pub fn field_name(&self) -> &str {
        match self {
            SchemaDiff::FieldAdded { field } | SchemaDiff::FieldRemoved { field } => &field.name,
            SchemaDiff::TypeChanged { field, .. } => field,
        }
    }
}

/// Diffs `old` against `new`.
///
/// Added fields come first, then removed fields, then type changes, each group in
/// declaration order. This is also the order in which the actions must execute.
pub fn detect_differences(old: &CollectionDefinition, new: &CollectionDefinition) -> Vec<SchemaDiff> {
    let added = new
        .fields()
        .iter()
        .filter(|field| !old.has_field(&field.name))
        .map(|field| SchemaDiff::FieldAdded { field: field.clone() });

    let removed = old
        .fields()
        .iter()
        .filter(|field| !new.has_field(&field.name))
        .map(|field| SchemaDiff::FieldRemoved { field: field.clone() });

    let changed = new.fields().iter().filter_map(|field| {
        old.field(&field.name)
            .filter(|previous| previous.field_type != field.field_type)
            .map(|previous| SchemaDiff::TypeChanged {
                field: field.name.clone(),
                from: previous.field_type,
                to: field.field_type,
            })
    });

    added.chain(removed).chain(changed).collect()
}

/// Returns whether a column of type `from` can be converted to `to` without losing its
/// meaning. The relation is reflexive.
pub fn is_type_change_compatible(from: FieldType, to: FieldType) -> bool {
    if from == to {
        return true;
    }

    match from {
        FieldType::String => true,
        FieldType::Integer => matches!(to, FieldType::Long | FieldType::Double | FieldType::String),
        FieldType::Long => matches!(to, FieldType::Double | FieldType::String),
        FieldType::Double => matches!(to, FieldType::String),
        FieldType::Boolean => matches!(to, FieldType::String),
        FieldType::Date => matches!(to, FieldType::DateTime | FieldType::String),
        FieldType::DateTime => matches!(to, FieldType::String),
        FieldType::Json => matches!(to, FieldType::String),
    }
}

/// Fails with `IncompatibleSchemaChange` when a type change is outside the lattice.
pub fn ensure_type_change_compatible(
    collection: &str,
    field: &str,
    from: FieldType,
    to: FieldType,
) -> StoreResult<()> {
    if is_type_change_compatible(from, to) {
        return Ok(());
    }

    Err(StoreError::IncompatibleSchemaChange {
        collection: collection.to_string(),
        field: field.to_string(),
        from,
        to,
    })
}

/// Kind of an executed schema action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationKind {
    CreateTable,
    AddColumn,
    DeprecateColumn,
    AlterColumnType,
}

impl MigrationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationKind::CreateTable => "CREATE_TABLE",
            MigrationKind::AddColumn => "ADD_COLUMN",
            MigrationKind::DeprecateColumn => "DEPRECATE_COLUMN",
            MigrationKind::AlterColumnType => "ALTER_COLUMN_TYPE",
        }
    }
}

impl fmt::Display for MigrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE_TABLE" => Ok(MigrationKind::CreateTable),
            "ADD_COLUMN" => Ok(MigrationKind::AddColumn),
            "DEPRECATE_COLUMN" => Ok(MigrationKind::DeprecateColumn),
            "ALTER_COLUMN_TYPE" => Ok(MigrationKind::AlterColumnType),
            other => Err(StoreError::Serialization(format!("Unknown migration kind '{}'", other))),
        }
    }
}

/// Append-only audit entry for one executed statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub collection: String,
    pub kind: MigrationKind,
    /// The literal statement that was executed.
    pub statement: String,
    pub executed_at: DateTime<Utc>,
}

impl MigrationRecord {
    pub fn new(collection: impl Into<String>, kind: MigrationKind, statement: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            kind,
            statement: statement.into(),
            executed_at: crate::record::now(),
        }
    }
}
