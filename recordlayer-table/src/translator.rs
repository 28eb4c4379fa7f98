//! Translation of filter conditions into a parameterized SQL `WHERE` clause.

use bson::Bson;
use recordlayer_core::{
    definition::{CREATED_AT_FIELD, CollectionDefinition, FieldType, ID_FIELD},
    error::{StoreError, StoreResult},
    query::{FilterCondition, FilterOperator, FilterVisitor, SortDirection, SortField, field_type_of},
};
use recordlayer_sqlite::Value;

use crate::sql::{quote_ident, text_expression, to_sql_value};

/// A rendered predicate and the parameters it binds, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SqlFragment {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlFragment {
    fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self { sql: sql.into(), params }
    }

    /// ` WHERE ...`, or nothing when there is no predicate.
    pub fn where_clause(&self) -> String {
        if self.sql.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.sql)
        }
    }
}

/// Renders filter conditions against the columns of one collection table.
pub(crate) struct SqlFilterTranslator<'a> {
    definition: &'a CollectionDefinition,
}

impl<'a> SqlFilterTranslator<'a> {
    pub fn new(definition: &'a CollectionDefinition) -> Self {
        Self { definition }
    }

    fn field_type(&self, field: &str) -> StoreResult<FieldType> {
        field_type_of(self.definition, field).ok_or_else(|| {
            StoreError::InvalidQuery(format!(
                "Unknown filter field '{}' for collection '{}'",
                field,
                self.definition.name()
            ))
        })
    }
}

impl FilterVisitor for SqlFilterTranslator<'_> {
    type Output = SqlFragment;
    type Error = StoreError;

    fn visit_all(&mut self, conditions: &[FilterCondition]) -> Result<Self::Output, Self::Error> {
        let mut clauses = Vec::with_capacity(conditions.len());
        let mut params = Vec::new();

        for condition in conditions {
            let fragment = self.visit_condition(condition)?;
            clauses.push(fragment.sql);
            params.extend(fragment.params);
        }

        Ok(SqlFragment::new(clauses.join(" AND "), params))
    }

    fn visit_condition(&mut self, condition: &FilterCondition) -> Result<Self::Output, Self::Error> {
        let field_type = self.field_type(&condition.field)?;
        let column = quote_ident(&condition.field)?;
        let operand = condition.operand(field_type)?;

        if condition.operator == FilterOperator::IsNull {
            let sql = match operand {
                Bson::Boolean(false) => format!("{} IS NOT NULL", column),
                _ => format!("{} IS NULL", column),
            };
            return Ok(SqlFragment::new(sql, Vec::new()));
        }

        if condition.operator.is_textual() {
            let needle = match operand {
                Bson::String(text) => Value::Text(text),
                _ => Value::Null,
            };
            let text = text_expression(&column, field_type);
            let (target, param) = if condition.operator.is_case_insensitive() {
                (format!("lower({})", text), "lower(?)")
            } else {
                (text, "?")
            };

            let fragment = match condition.operator {
                FilterOperator::Contains | FilterOperator::IContains => SqlFragment::new(
                    format!("instr({}, {}) > 0", target, param),
                    vec![needle],
                ),
                FilterOperator::Starts | FilterOperator::IStarts => SqlFragment::new(
                    format!("instr({}, {}) = 1", target, param),
                    vec![needle],
                ),
                FilterOperator::Ends | FilterOperator::IEnds => SqlFragment::new(
                    format!(
                        "substr({target}, length({target}) - length({param}) + 1) = {param}"
                    ),
                    vec![needle.clone(), needle],
                ),
                _ => SqlFragment::new(format!("{} = {}", target, param), vec![needle]),
            };
            return Ok(fragment);
        }

        let comparator = match condition.operator {
            FilterOperator::Eq => "=",
            FilterOperator::Neq => "<>",
            FilterOperator::Gt => ">",
            FilterOperator::Lt => "<",
            FilterOperator::Gte => ">=",
            FilterOperator::Lte => "<=",
            other => {
                return Err(StoreError::InvalidQuery(format!("Unsupported operator '{}'", other)));
            }
        };

        Ok(SqlFragment::new(
            format!("{} {} ?", column, comparator),
            vec![to_sql_value(field_type, &operand)?],
        ))
    }
}

/// `ORDER BY` clause with nulls first and the (`created_at`, `id`) tie-breakers.
pub(crate) fn order_by_clause(sort: &[SortField]) -> StoreResult<String> {
    let mut keys = sort
        .iter()
        .map(|key| {
            let direction = match key.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            Ok(format!("{} {} NULLS FIRST", quote_ident(&key.field)?, direction))
        })
        .collect::<StoreResult<Vec<_>>>()?;

    keys.push(format!("{} ASC", quote_ident(CREATED_AT_FIELD)?));
    keys.push(format!("{} ASC", quote_ident(ID_FIELD)?));

    Ok(format!(" ORDER BY {}", keys.join(", ")))
}
