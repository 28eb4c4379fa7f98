//! In-memory evaluation of filters and sort keys over stored records.
//!
//! Conditions are compiled once per query into a [`Predicate`] and then tested against every
//! record of the collection. Values are compared in the same representation the physical
//! table layout stores them in, so both layouts select and order records identically.

use bson::Bson;
use std::cmp::Ordering;

use recordlayer_core::{
    definition::{CREATED_AT_FIELD, CollectionDefinition, FieldType, UPDATED_AT_FIELD},
    error::{StoreError, StoreResult},
    query::{FilterCondition, FilterOperator, FilterVisitor, SortDirection, SortField, field_type_of},
    record::{Record, format_timestamp, number_of, text_of},
};

/// Comparable view of a stored value.
///
/// Integer and long fields compare as exact integers, doubles as reals, booleans as
/// booleans and everything else as its canonical text. An integer and a real compare by
/// their exact values, the way SQLite orders an `INTEGER` against a `REAL`.
#[derive(Debug, Clone)]
pub(crate) enum Comparable {
    Null,
    Bool(bool),
    Int(i64),
    Number(f64),
    Text(String),
}

impl Comparable {
    pub fn of(field_type: FieldType, value: &Bson) -> Self {
        if matches!(value, Bson::Null | Bson::Undefined) {
            return Comparable::Null;
        }

        match field_type {
            FieldType::Integer | FieldType::Long => integer_of(value).unwrap_or(Comparable::Null),
            FieldType::Double => number_of(value)
                .map(Comparable::Number)
                .unwrap_or(Comparable::Null),
            FieldType::Boolean => match value {
                Bson::Boolean(flag) => Comparable::Bool(*flag),
                _ => Comparable::Null,
            },
            _ => text_form(field_type, value)
                .map(Comparable::Text)
                .unwrap_or(Comparable::Null),
        }
    }

    fn is_null(&self) -> bool {
        matches!(self, Comparable::Null)
    }
}

// Values that fit an i64 stay exact; anything else keeps its real value.
fn integer_of(value: &Bson) -> Option<Comparable> {
    let exact = match value {
        Bson::Int32(number) => Some(i64::from(*number)),
        Bson::Int64(number) => Some(*number),
        Bson::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    };
    if let Some(number) = exact {
        return Some(Comparable::Int(number));
    }

    number_of(value).map(|number| {
        if number.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(&number) {
            Comparable::Int(number as i64)
        } else {
            Comparable::Number(number)
        }
    })
}

// 2^63, the first real above every i64.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

fn compare_int_real(int: i64, real: f64) -> Option<Ordering> {
    if real.is_nan() {
        return None;
    }
    if real >= I64_BOUND {
        return Some(Ordering::Less);
    }
    if real < -I64_BOUND {
        return Some(Ordering::Greater);
    }

    match int.cmp(&(real.trunc() as i64)) {
        Ordering::Equal => 0.0_f64.partial_cmp(&real.fract()),
        ordering => Some(ordering),
    }
}

impl PartialOrd for Comparable {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Int(a), Comparable::Int(b)) => Some(a.cmp(b)),
            (Comparable::Int(a), Comparable::Number(b)) => compare_int_real(*a, *b),
            (Comparable::Number(a), Comparable::Int(b)) => compare_int_real(*b, *a).map(Ordering::reverse),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::Text(a), Comparable::Text(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl PartialEq for Comparable {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            _ => self.partial_cmp(other) == Some(Ordering::Equal),
        }
    }
}

/// Text a value is matched against by the string operators.
///
/// JSON values are rendered as JSON text, which is how they are stored in a column.
fn text_form(field_type: FieldType, value: &Bson) -> Option<String> {
    match (field_type, value) {
        (_, Bson::Null | Bson::Undefined) => None,
        (FieldType::Json, value) => Some(value.clone().into_relaxed_extjson().to_string()),
        (_, value) => text_of(value),
    }
}

/// Value of `field` in the form the table layout stores it.
///
/// System timestamps are rendered as canonical text so they keep microsecond precision,
/// which a BSON datetime would truncate to milliseconds.
pub(crate) fn stored_value(record: &Record, field: &str) -> Bson {
    match field {
        CREATED_AT_FIELD => Bson::String(format_timestamp(&record.created_at)),
        UPDATED_AT_FIELD => Bson::String(format_timestamp(&record.updated_at)),
        _ => record.value_of(field),
    }
}

#[derive(Debug, Clone)]
struct CompiledCondition {
    field: String,
    field_type: FieldType,
    operator: FilterOperator,
    operand: Bson,
}

impl CompiledCondition {
    fn matches(&self, record: &Record) -> bool {
        let value = stored_value(record, &self.field);

        if self.operator == FilterOperator::IsNull {
            let wants_null = !matches!(self.operand, Bson::Boolean(false));
            return matches!(value, Bson::Null) == wants_null;
        }

        if self.operator.is_textual() {
            let (Some(text), Bson::String(needle)) = (text_form(self.field_type, &value), &self.operand) else {
                return false;
            };
            let (text, needle) = if self.operator.is_case_insensitive() {
                (text.to_ascii_lowercase(), needle.to_ascii_lowercase())
            } else {
                (text, needle.clone())
            };

            return match self.operator {
                FilterOperator::Contains | FilterOperator::IContains => text.contains(&needle),
                FilterOperator::Starts | FilterOperator::IStarts => text.starts_with(&needle),
                FilterOperator::Ends | FilterOperator::IEnds => text.ends_with(&needle),
                _ => text == needle,
            };
        }

        let left = Comparable::of(self.field_type, &value);
        let right = Comparable::of(self.field_type, &self.operand);
        if left.is_null() || right.is_null() {
            return false;
        }

        match left.partial_cmp(&right) {
            Some(ordering) => match self.operator {
                FilterOperator::Eq => ordering == Ordering::Equal,
                FilterOperator::Neq => ordering != Ordering::Equal,
                FilterOperator::Gt => ordering == Ordering::Greater,
                FilterOperator::Gte => ordering != Ordering::Less,
                FilterOperator::Lt => ordering == Ordering::Less,
                FilterOperator::Lte => ordering != Ordering::Greater,
                _ => false,
            },
            None => false,
        }
    }
}

/// Conjunction of compiled conditions. An empty predicate matches every record.
#[derive(Debug, Clone, Default)]
pub(crate) struct Predicate {
    conditions: Vec<CompiledCondition>,
}

impl Predicate {
    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|condition| condition.matches(record))
    }
}

/// Compiles filter conditions against a collection definition.
///
/// Unknown fields and operands that do not fit the field type fail here, before any record
/// is looked at.
pub(crate) struct PredicateCompiler<'a> {
    definition: &'a CollectionDefinition,
}

impl<'a> PredicateCompiler<'a> {
    pub fn new(definition: &'a CollectionDefinition) -> Self {
        Self { definition }
    }
}

impl FilterVisitor for PredicateCompiler<'_> {
    type Output = Predicate;
    type Error = StoreError;

    fn visit_all(&mut self, conditions: &[FilterCondition]) -> Result<Self::Output, Self::Error> {
        let mut predicate = Predicate::default();
        for condition in conditions {
            predicate.conditions.extend(self.visit_condition(condition)?.conditions);
        }

        Ok(predicate)
    }

    fn visit_condition(&mut self, condition: &FilterCondition) -> Result<Self::Output, Self::Error> {
        let field_type = field_type_of(self.definition, &condition.field).ok_or_else(|| {
            StoreError::InvalidQuery(format!(
                "Unknown filter field '{}' for collection '{}'",
                condition.field,
                self.definition.name()
            ))
        })?;

        Ok(Predicate {
            conditions: vec![CompiledCondition {
                field: condition.field.clone(),
                field_type,
                operator: condition.operator,
                operand: condition.operand(field_type)?,
            }],
        })
    }
}

/// Stable multi-key sort with nulls first in either direction, then by creation time and id.
pub(crate) fn sort_records(
    definition: &CollectionDefinition,
    records: &mut [Record],
    sort: &[SortField],
) -> StoreResult<()> {
    let keys = sort
        .iter()
        .map(|key| {
            field_type_of(definition, &key.field)
                .map(|field_type| (key.field.as_str(), field_type, key.direction))
                .ok_or_else(|| {
                    StoreError::InvalidQuery(format!(
                        "Unknown sort field '{}' for collection '{}'",
                        key.field,
                        definition.name()
                    ))
                })
        })
        .collect::<StoreResult<Vec<_>>>()?;

    records.sort_by(|a, b| {
        for (field, field_type, direction) in &keys {
            let left = Comparable::of(*field_type, &stored_value(a, field));
            let right = Comparable::of(*field_type, &stored_value(b, field));

            let ordering = match (left.is_null(), right.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => {
                    let ordering = left.partial_cmp(&right).unwrap_or(Ordering::Equal);
                    match direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    }
                }
            };

            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.to_string().cmp(&b.id.to_string()))
    });

    Ok(())
}
