//! Backend-agnostic query model: filter conditions, sorting, pagination and projection.
//!
//! Filters are a flat conjunction of [`FilterCondition`]s. Both storage adapters walk them
//! through the [`FilterVisitor`] trait, the SQL adapter to render a `WHERE` clause and the
//! document adapter to evaluate records in memory.
//!
//! # Query Building
//!
//! ```ignore
//! use recordlayer_core::query::{Filter, Query, SortDirection};
//! use recordlayer_core::page::Pagination;
//!
//! let query = Query::builder()
//!     .filter(Filter::gt("price", 5.0))
//!     .filter(Filter::icontains("name", "berry"))
//!     .sort("price", SortDirection::Desc)
//!     .pagination(Pagination::new(1, 10)?)
//!     .build();
//! ```
//!
//! # Operators
//!
//! | token | meaning |
//! |---|---|
//! | `eq` `neq` | equality and inequality |
//! | `gt` `lt` `gte` `lte` | ordering, numeric for numeric fields and lexicographic otherwise |
//! | `isnull` | `true` matches absent or null values, `false` matches present ones |
//! | `contains` `starts` `ends` | case-sensitive substring, prefix and suffix |
//! | `icontains` `istarts` `iends` `ieq` | case-insensitive variants |

use bson::Bson;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::{
    definition::{CollectionDefinition, CREATED_AT_FIELD, FieldType, ID_FIELD, UPDATED_AT_FIELD},
    error::{StoreError, StoreResult},
    page::Pagination,
    record::{coerce_value, text_of},
};

/// Comparison operator of a [`FilterCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    Eq,
    Neq,
    Gt,
    Lt,
    Gte,
    Lte,
    IsNull,
    Contains,
    Starts,
    Ends,
    IContains,
    IStarts,
    IEnds,
    IEq,
}

impl FilterOperator {
    pub const ALL: [FilterOperator; 14] = [
        FilterOperator::Eq,
        FilterOperator::Neq,
        FilterOperator::Gt,
        FilterOperator::Lt,
        FilterOperator::Gte,
        FilterOperator::Lte,
        FilterOperator::IsNull,
        FilterOperator::Contains,
        FilterOperator::Starts,
        FilterOperator::Ends,
        FilterOperator::IContains,
        FilterOperator::IStarts,
        FilterOperator::IEnds,
        FilterOperator::IEq,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Neq => "neq",
            FilterOperator::Gt => "gt",
            FilterOperator::Lt => "lt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lte => "lte",
            FilterOperator::IsNull => "isnull",
            FilterOperator::Contains => "contains",
            FilterOperator::Starts => "starts",
            FilterOperator::Ends => "ends",
            FilterOperator::IContains => "icontains",
            FilterOperator::IStarts => "istarts",
            FilterOperator::IEnds => "iends",
            FilterOperator::IEq => "ieq",
        }
    }

    /// Operators that match on the textual form of a value.
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            FilterOperator::Contains
                | FilterOperator::Starts
                | FilterOperator::Ends
                | FilterOperator::IContains
                | FilterOperator::IStarts
                | FilterOperator::IEnds
                | FilterOperator::IEq
        )
    }

    pub fn is_case_insensitive(&self) -> bool {
        matches!(
            self,
            FilterOperator::IContains
                | FilterOperator::IStarts
                | FilterOperator::IEnds
                | FilterOperator::IEq
        )
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for FilterOperator {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim().to_ascii_lowercase();
        FilterOperator::ALL
            .into_iter()
            .find(|op| op.token() == token)
            .ok_or_else(|| StoreError::InvalidQuery(format!("Unknown filter operator '{}'", s)))
    }
}

/// A single `field <operator> value` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Bson,
}

impl FilterCondition {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: impl Into<Bson>) -> Self {
        Self { field: field.into(), operator, value: value.into() }
    }

    /// Normalizes the comparison value for a field of type `field_type`.
    ///
    /// - `isnull` yields a boolean (null counts as `true`);
    /// - textual operators yield the canonical text of the value;
    /// - every other operator coerces the value to the field type.
    pub fn operand(&self, field_type: FieldType) -> StoreResult<Bson> {
        let invalid = |reason: String| {
            StoreError::InvalidQuery(format!(
                "Invalid value for {} {}: {}",
                self.field, self.operator, reason
            ))
        };

        match self.operator {
            FilterOperator::IsNull => match &self.value {
                Bson::Null => Ok(Bson::Boolean(true)),
                other => coerce_value(FieldType::Boolean, other.clone())
                    .map_err(|err| invalid(err.to_string())),
            },
            op if op.is_textual() => text_of(&self.value)
                .map(Bson::String)
                .ok_or_else(|| invalid("a text value is required".to_string())),
            _ => coerce_value(field_type, self.value.clone()).map_err(|err| invalid(err.to_string())),
        }
    }
}

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            _ => Err(StoreError::InvalidQuery(format!("Unknown sort direction '{}'", s))),
        }
    }
}

/// One key of a multi-key sort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortField {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self { field: field.into(), direction }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Asc)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Desc)
    }
}

/// Resolves the type of any queryable field, system columns included.
pub fn field_type_of(definition: &CollectionDefinition, name: &str) -> Option<FieldType> {
    match name {
        ID_FIELD => Some(FieldType::String),
        CREATED_AT_FIELD | UPDATED_AT_FIELD => Some(FieldType::DateTime),
        _ => definition.field(name).map(|field| field.field_type),
    }
}

/// A structured query over one collection.
///
/// Use [`QueryBuilder`] for ergonomic construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Conditions that must all hold.
    #[serde(default)]
    pub filters: Vec<FilterCondition>,
    /// Sort keys in priority order.
    #[serde(default)]
    pub sort: Vec<SortField>,
    #[serde(default)]
    pub pagination: Pagination,
    /// Projection. `None` returns every field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Checks every referenced name against the definition.
    ///
    /// Filters and sorts may name declared fields or system columns. Projections may only
    /// name declared fields.
    pub fn validate(&self, definition: &CollectionDefinition) -> StoreResult<()> {
        let unknown = |kind: &str, name: &str| {
            StoreError::InvalidQuery(format!(
                "Unknown {} field '{}' for collection '{}'",
                kind,
                name,
                definition.name()
            ))
        };

        for condition in &self.filters {
            if field_type_of(definition, &condition.field).is_none() {
                return Err(unknown("filter", &condition.field));
            }
        }
        for sort in &self.sort {
            if field_type_of(definition, &sort.field).is_none() {
                return Err(unknown("sort", &sort.field));
            }
        }
        if let Some(fields) = &self.fields {
            if let Some(name) = fields.iter().find(|name| !definition.has_field(name)) {
                return Err(unknown("projection", name));
            }
        }

        Ok(())
    }
}

/// Helper with one constructor per [`FilterOperator`].
pub struct Filter;

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> FilterCondition {
        FilterCondition::new(field, FilterOperator::Eq, value)
    }

    pub fn neq(field: impl Into<String>, value: impl Into<Bson>) -> FilterCondition {
        FilterCondition::new(field, FilterOperator::Neq, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> FilterCondition {
        FilterCondition::new(field, FilterOperator::Gt, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> FilterCondition {
        FilterCondition::new(field, FilterOperator::Lt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> FilterCondition {
        FilterCondition::new(field, FilterOperator::Gte, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> FilterCondition {
        FilterCondition::new(field, FilterOperator::Lte, value)
    }

    /// `is_null(field, true)` matches absent or null values, `false` the opposite.
    pub fn is_null(field: impl Into<String>, is_null: bool) -> FilterCondition {
        FilterCondition::new(field, FilterOperator::IsNull, is_null)
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Bson>) -> FilterCondition {
        FilterCondition::new(field, FilterOperator::Contains, value)
    }

    pub fn starts(field: impl Into<String>, value: impl Into<Bson>) -> FilterCondition {
        FilterCondition::new(field, FilterOperator::Starts, value)
    }

    pub fn ends(field: impl Into<String>, value: impl Into<Bson>) -> FilterCondition {
        FilterCondition::new(field, FilterOperator::Ends, value)
    }

    pub fn icontains(field: impl Into<String>, value: impl Into<Bson>) -> FilterCondition {
        FilterCondition::new(field, FilterOperator::IContains, value)
    }

    pub fn istarts(field: impl Into<String>, value: impl Into<Bson>) -> FilterCondition {
        FilterCondition::new(field, FilterOperator::IStarts, value)
    }

    pub fn iends(field: impl Into<String>, value: impl Into<Bson>) -> FilterCondition {
        FilterCondition::new(field, FilterOperator::IEnds, value)
    }

    pub fn ieq(field: impl Into<String>, value: impl Into<Bson>) -> FilterCondition {
        FilterCondition::new(field, FilterOperator::IEq, value)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    pub fn new() -> Self {
        QueryBuilder { query: Query::default() }
    }

    /// Adds a condition to the conjunction.
    pub fn filter(mut self, condition: FilterCondition) -> Self {
        self.query.filters.push(condition);
        self
    }

    pub fn filters(mut self, conditions: impl IntoIterator<Item = FilterCondition>) -> Self {
        self.query.filters.extend(conditions);
        self
    }

    /// Appends a sort key. Keys apply in the order they are added.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort.push(SortField::new(field, direction));
        self
    }

    pub fn pagination(mut self, pagination: Pagination) -> Self {
        self.query.pagination = pagination;
        self
    }

    /// Restricts the returned user fields.
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self) -> Query {
        self.query
    }
}

/// Walks the conjunction of a query's filter conditions.
pub trait FilterVisitor {
    type Output;
    type Error: Into<StoreError>;

    /// Combines every condition with logical AND.
    fn visit_all(&mut self, conditions: &[FilterCondition]) -> Result<Self::Output, Self::Error>;

    fn visit_condition(&mut self, condition: &FilterCondition) -> Result<Self::Output, Self::Error>;

    fn visit_query(&mut self, query: &Query) -> Result<Self::Output, Self::Error> {
        self.visit_all(&query.filters)
    }
}
