//! Immutable value types describing a collection and its fields.
//!
//! A [`CollectionDefinition`] is created through [`CollectionDefinition::builder`], which
//! enforces the structural invariants (non-blank name, at least one field, unique field
//! names). Definitions are never mutated in place: every `with_*` method returns a new value
//! whose version is one higher and whose update timestamp is fresh.
//!
//! # Example
//!
//! ```ignore
//! use recordlayer_core::definition::{CollectionDefinition, FieldDefinition, FieldType};
//!
//! let products = CollectionDefinition::builder("products")
//!     .field(FieldDefinition::new("name", FieldType::String).nullable(false).unique())
//!     .field(FieldDefinition::new("price", FieldType::Double))
//!     .build()?;
//!
//! assert_eq!(products.version(), 1);
//! assert_eq!(products.table_name(), "coll_products");
//! ```

use bson::Bson;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    str::FromStr,
};

use crate::error::{StoreError, StoreResult};

/// Name of the system column holding the record identifier.
pub const ID_FIELD: &str = "id";
/// Name of the system column holding the creation timestamp.
pub const CREATED_AT_FIELD: &str = "created_at";
/// Name of the system column holding the last update timestamp.
pub const UPDATED_AT_FIELD: &str = "updated_at";
/// System columns present on every stored record.
pub const SYSTEM_FIELDS: [&str; 3] = [ID_FIELD, CREATED_AT_FIELD, UPDATED_AT_FIELD];

const TABLE_PREFIX: &str = "coll_";

/// Primitive type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Long,
    Double,
    Boolean,
    Date,
    DateTime,
    Json,
}

impl FieldType {
    /// Every primitive type, in declaration order.
    pub const ALL: [FieldType; 8] = [
        FieldType::String,
        FieldType::Integer,
        FieldType::Long,
        FieldType::Double,
        FieldType::Boolean,
        FieldType::Date,
        FieldType::DateTime,
        FieldType::Json,
    ];

    /// Returns `true` for types compared as numbers rather than as text.
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Long | FieldType::Double)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Long => "long",
            FieldType::Double => "double",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
            FieldType::Json => "json",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldType::ALL
            .into_iter()
            .find(|ty| ty.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| StoreError::InvalidDefinition(format!("Unknown field type '{}'", s)))
    }
}

/// Constraints consumed by the validation layer. They are carried here as data only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// Points a field at a record in another collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDescriptor {
    /// The target collection name.
    pub collection: String,
    /// The target field, `"id"` unless stated otherwise.
    #[serde(default = "default_reference_field")]
    pub field: String,
    /// Whether deleting the target should cascade to referring records.
    #[serde(default)]
    pub cascade_delete: bool,
}

fn default_reference_field() -> String {
    ID_FIELD.to_string()
}

impl ReferenceDescriptor {
    /// Creates a reference to the `id` of a record in `collection`.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            field: default_reference_field(),
            cascade_delete: false,
        }
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    pub fn cascade(mut self) -> Self {
        self.cascade_delete = true;
        self
    }
}

/// Describes one typed attribute of a collection.
///
/// Fields are nullable, mutable and non-unique unless configured otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Rejects updates once the record has been created.
    #[serde(default)]
    pub immutable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Bson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<ValidationRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<ReferenceDescriptor>,
}

fn default_nullable() -> bool {
    true
}

impl FieldDefinition {
    /// Creates a nullable, mutable, non-unique field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
            immutable: false,
            unique: false,
            default_value: None,
            rules: None,
            enum_values: None,
            reference: None,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Bson>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn rules(mut self, rules: ValidationRules) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn enum_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn reference(mut self, reference: ReferenceDescriptor) -> Self {
        self.reference = Some(reference);
        self
    }
}

/// Physical layout used to persist a collection's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// One backend table per collection, one column per field.
    #[default]
    PhysicalTables,
    /// One shared table for every collection, records stored as opaque documents.
    DocumentStore,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMode::PhysicalTables => f.write_str("physical_tables"),
            StorageMode::DocumentStore => f.write_str("document_store"),
        }
    }
}

/// Storage settings attached to a collection definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub mode: StorageMode,
    /// Overrides the table name derived from the collection name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    /// Adapter-specific options.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl StorageConfig {
    pub fn new(mode: StorageMode) -> Self {
        Self { mode, ..Default::default() }
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Derives the default table name for a collection: `coll_` followed by the lower-cased
/// name with every character outside `[a-z0-9_]` replaced by `_`.
pub fn derive_table_name(collection: &str) -> String {
    let sanitized = collection
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect::<String>();

    format!("{}{}", TABLE_PREFIX, sanitized)
}

/// The complete, versioned description of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DefinitionRepr")]
pub struct CollectionDefinition {
    name: String,
    display_name: String,
    description: Option<String>,
    fields: Vec<FieldDefinition>,
    storage: StorageConfig,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CollectionDefinition {
    /// Creates a builder for a collection with the given unique name.
    pub fn builder(name: impl Into<String>) -> CollectionDefinitionBuilder {
        CollectionDefinitionBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|field| field.unique)
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// The backend table name: the configured override, or the derived name.
    pub fn table_name(&self) -> String {
        self.storage
            .table_name
            .clone()
            .unwrap_or_else(|| derive_table_name(&self.name))
    }

    /// Returns a copy with `field` appended.
    pub fn with_field(&self, field: FieldDefinition) -> StoreResult<Self> {
        let mut next = self.clone();
        next.fields.push(field);
        next.validate()?;
        Ok(next.next_revision())
    }

    /// Returns a copy without the named field.
    pub fn without_field(&self, name: &str) -> StoreResult<Self> {
        if !self.has_field(name) {
            return Err(StoreError::InvalidDefinition(format!(
                "Collection '{}' has no field '{}'",
                self.name, name
            )));
        }

        let mut next = self.clone();
        next.fields.retain(|field| field.name != name);
        next.validate()?;
        Ok(next.next_revision())
    }

    /// Returns a copy where the field with the same name as `field` is replaced.
    pub fn with_field_replaced(&self, field: FieldDefinition) -> StoreResult<Self> {
        let mut next = self.clone();
        let slot = next
            .fields
            .iter_mut()
            .find(|existing| existing.name == field.name)
            .ok_or_else(|| {
                StoreError::InvalidDefinition(format!(
                    "Collection '{}' has no field '{}'",
                    self.name, field.name
                ))
            })?;
        *slot = field;
        next.validate()?;
        Ok(next.next_revision())
    }

    pub fn with_display_name(&self, display_name: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.display_name = display_name.into();
        next.next_revision()
    }

    pub fn with_description(&self, description: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.description = Some(description.into());
        next.next_revision()
    }

    pub fn with_storage(&self, storage: StorageConfig) -> Self {
        let mut next = self.clone();
        next.storage = storage;
        next.next_revision()
    }

    /// Re-stamps the definition as stored by the registry.
    pub(crate) fn restamped(
        &self,
        version: u64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let mut next = self.clone();
        next.version = version;
        next.created_at = created_at;
        next.updated_at = updated_at;
        next
    }

    fn next_revision(mut self) -> Self {
        self.version += 1;
        self.updated_at = Utc::now();
        self
    }

    fn validate(&self) -> StoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(StoreError::InvalidDefinition(
                "Collection name must not be blank".to_string(),
            ));
        }
        if self.fields.is_empty() {
            return Err(StoreError::InvalidDefinition(format!(
                "Collection '{}' must declare at least one field",
                self.name
            )));
        }
        if self.version == 0 {
            return Err(StoreError::InvalidDefinition(format!(
                "Collection '{}' version must start at 1",
                self.name
            )));
        }

        let mut seen = HashSet::with_capacity(self.fields.len());
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(StoreError::InvalidDefinition(format!(
                    "Collection '{}' has a field with a blank name",
                    self.name
                )));
            }
            if SYSTEM_FIELDS.contains(&field.name.as_str()) {
                return Err(StoreError::InvalidDefinition(format!(
                    "Field name '{}' is reserved for system columns",
                    field.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(StoreError::InvalidDefinition(format!(
                    "Collection '{}' declares field '{}' more than once",
                    self.name, field.name
                )));
            }
        }

        Ok(())
    }
}

#[derive(Deserialize)]
struct DefinitionRepr {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    fields: Vec<FieldDefinition>,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default = "default_version")]
    version: u64,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
}

fn default_version() -> u64 {
    1
}

impl TryFrom<DefinitionRepr> for CollectionDefinition {
    type Error = StoreError;

    fn try_from(repr: DefinitionRepr) -> Result<Self, Self::Error> {
        let definition = CollectionDefinition {
            display_name: repr.display_name.unwrap_or_else(|| repr.name.clone()),
            name: repr.name,
            description: repr.description,
            fields: repr.fields,
            storage: repr.storage,
            version: repr.version,
            created_at: repr.created_at,
            updated_at: repr.updated_at,
        };
        definition.validate()?;

        Ok(definition)
    }
}

/// Builder for [`CollectionDefinition`].
#[derive(Debug, Clone)]
pub struct CollectionDefinitionBuilder {
    name: String,
    display_name: Option<String>,
    description: Option<String>,
    fields: Vec<FieldDefinition>,
    storage: StorageConfig,
    version: u64,
    created_at: Option<DateTime<Utc>>,
}

impl CollectionDefinitionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            description: None,
            fields: Vec::new(),
            storage: StorageConfig::default(),
            version: 1,
            created_at: None,
        }
    }

    /// Sets the human-readable name. Defaults to the collection name.
    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Appends a field. Declaration order is preserved.
    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldDefinition>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    /// Sets the starting version. Defaults to 1.
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Validates the invariants and builds the definition.
    pub fn build(self) -> StoreResult<CollectionDefinition> {
        let created_at = self.created_at.unwrap_or_else(Utc::now);
        let definition = CollectionDefinition {
            display_name: self.display_name.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            description: self.description,
            fields: self.fields,
            storage: self.storage,
            version: self.version,
            created_at,
            updated_at: created_at,
        };
        definition.validate()?;

        Ok(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn products() -> CollectionDefinition {
        CollectionDefinition::builder("products")
            .field(FieldDefinition::new("name", FieldType::String).nullable(false))
            .field(FieldDefinition::new("price", FieldType::Double))
            .build()
            .unwrap()
    }

    #[test]
    fn builder_defaults() {
        let def = products();

        assert_eq!(def.version(), 1);
        assert_eq!(def.display_name(), "products");
        assert_eq!(def.created_at(), def.updated_at());
        assert_eq!(def.storage().mode, StorageMode::PhysicalTables);
        assert_eq!(def.fields().len(), 2);
        assert!(def.field("price").unwrap().nullable);
        assert!(!def.field("name").unwrap().nullable);
    }

    #[test]
    fn rejects_structural_violations() {
        let blank = CollectionDefinition::builder("  ")
            .field(FieldDefinition::new("a", FieldType::String))
            .build();
        assert!(matches!(blank, Err(StoreError::InvalidDefinition(_))));

        let empty = CollectionDefinition::builder("empty").build();
        assert!(matches!(empty, Err(StoreError::InvalidDefinition(_))));

        let duplicate = CollectionDefinition::builder("dup")
            .field(FieldDefinition::new("a", FieldType::String))
            .field(FieldDefinition::new("a", FieldType::Integer))
            .build();
        assert!(matches!(duplicate, Err(StoreError::InvalidDefinition(_))));

        let reserved = CollectionDefinition::builder("reserved")
            .field(FieldDefinition::new("created_at", FieldType::DateTime))
            .build();
        assert!(matches!(reserved, Err(StoreError::InvalidDefinition(_))));
    }

    #[test]
    fn mutation_produces_new_version() {
        let def = products();
        let next = def
            .with_field(FieldDefinition::new("stock", FieldType::Integer))
            .unwrap();

        assert_eq!(def.version(), 1);
        assert_eq!(def.fields().len(), 2);
        assert_eq!(next.version(), 2);
        assert!(next.has_field("stock"));
        assert!(next.updated_at() >= def.updated_at());

        let trimmed = next.without_field("price").unwrap();
        assert_eq!(trimmed.version(), 3);
        assert!(!trimmed.has_field("price"));

        let duplicate = next.with_field(FieldDefinition::new("stock", FieldType::Long));
        assert!(matches!(duplicate, Err(StoreError::InvalidDefinition(_))));

        let replaced = next
            .with_field_replaced(FieldDefinition::new("stock", FieldType::Long))
            .unwrap();
        assert_eq!(replaced.field("stock").unwrap().field_type, FieldType::Long);
    }

    #[test]
    fn removing_last_field_is_rejected() {
        let def = CollectionDefinition::builder("single")
            .field(FieldDefinition::new("only", FieldType::String))
            .build()
            .unwrap();

        assert!(def.without_field("only").is_err());
        assert!(def.without_field("missing").is_err());
    }

    #[test]
    fn table_name_is_derived_or_overridden() {
        assert_eq!(derive_table_name("Order Items"), "coll_order_items");
        assert_eq!(derive_table_name("line-items.v2"), "coll_line_items_v2");

        let def = products().with_storage(StorageConfig::default().with_table_name("catalog"));
        assert_eq!(def.table_name(), "catalog");
    }

    #[test]
    fn field_type_parses_tokens() {
        assert_eq!("datetime".parse::<FieldType>().unwrap(), FieldType::DateTime);
        assert_eq!("LONG".parse::<FieldType>().unwrap(), FieldType::Long);
        assert!("decimal".parse::<FieldType>().is_err());
        assert!(FieldType::Double.is_numeric());
        assert!(!FieldType::Date.is_numeric());
    }

    #[test]
    fn deserialization_enforces_invariants() {
        let json = serde_json::json!({
            "name": "books",
            "fields": [
                { "name": "title", "type": "string", "nullable": false, "unique": true },
                { "name": "pages", "type": "integer" }
            ],
            "storage": { "mode": "document_store" }
        });
        let def: CollectionDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(def.version(), 1);
        assert_eq!(def.storage().mode, StorageMode::DocumentStore);
        assert!(def.field("title").unwrap().unique);
        assert_eq!(def.unique_fields().count(), 1);

        let invalid = serde_json::json!({ "name": "books", "fields": [] });
        assert!(serde_json::from_value::<CollectionDefinition>(invalid).is_err());
    }
}
