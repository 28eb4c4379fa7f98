//! Rendering of the DDL statements issued for collection tables.
//!
//! Every function validates the identifiers it interpolates, so a statement returned from
//! here is safe to execute verbatim and to record in the migration history.

use recordlayer_core::{
    definition::{CollectionDefinition, CREATED_AT_FIELD, FieldDefinition, FieldType, ID_FIELD, UPDATED_AT_FIELD},
    error::StoreResult,
};

use crate::sql::{column_type, quote_ident, validate_identifier};

/// Suffix of the temporary column used while a column changes type.
pub(crate) const SHADOW_SUFFIX: &str = "__migrating";

pub(crate) fn create_table(definition: &CollectionDefinition) -> StoreResult<String> {
    let mut columns = vec![
        format!("{} TEXT PRIMARY KEY", quote_ident(ID_FIELD)?),
        format!("{} TIMESTAMP NOT NULL", quote_ident(CREATED_AT_FIELD)?),
        format!("{} TIMESTAMP NOT NULL", quote_ident(UPDATED_AT_FIELD)?),
    ];
    for field in definition.fields() {
        columns.push(column_definition(field)?);
    }

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(&definition.table_name())?,
        columns.join(", ")
    ))
}

// User columns are never NOT NULL; nullability is checked above the storage layer.
fn column_definition(field: &FieldDefinition) -> StoreResult<String> {
    Ok(format!("{} {}", quote_ident(&field.name)?, column_type(field.field_type)))
}

pub(crate) fn unique_index_name(table: &str, column: &str) -> StoreResult<String> {
    validate_identifier(table)?;
    validate_identifier(column)?;
    Ok(format!("ux_{}_{}", table, column))
}

pub(crate) fn create_unique_index(table: &str, column: &str) -> StoreResult<String> {
    Ok(format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
        quote_ident(&unique_index_name(table, column)?)?,
        quote_ident(table)?,
        quote_ident(column)?
    ))
}

pub(crate) fn drop_unique_index(table: &str, column: &str) -> StoreResult<String> {
    Ok(format!(
        "DROP INDEX IF EXISTS {}",
        quote_ident(&unique_index_name(table, column)?)?
    ))
}

pub(crate) fn add_column(table: &str, field: &FieldDefinition) -> StoreResult<String> {
    Ok(format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote_ident(table)?,
        column_definition(field)?
    ))
}

pub(crate) fn add_raw_column(table: &str, column: &str, field_type: FieldType) -> StoreResult<String> {
    Ok(format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_ident(table)?,
        quote_ident(column)?,
        column_type(field_type)
    ))
}

pub(crate) fn drop_column(table: &str, column: &str) -> StoreResult<String> {
    Ok(format!(
        "ALTER TABLE {} DROP COLUMN {}",
        quote_ident(table)?,
        quote_ident(column)?
    ))
}

pub(crate) fn rename_column(table: &str, from: &str, to: &str) -> StoreResult<String> {
    Ok(format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        quote_ident(table)?,
        quote_ident(from)?,
        quote_ident(to)?
    ))
}

/// `UPDATE` copying `column` into `target` converted from `from` to `to`.
pub(crate) fn copy_with_cast(
    table: &str,
    column: &str,
    target: &str,
    from: FieldType,
    to: FieldType,
) -> StoreResult<String> {
    Ok(format!(
        "UPDATE {} SET {} = {}",
        quote_ident(table)?,
        quote_ident(target)?,
        cast_expression(&quote_ident(column)?, from, to)
    ))
}

/// Expression converting a quoted column of type `from` into the stored form of `to`.
///
/// Only pairs admitted by the type-compatibility lattice are expected here; anything else
/// is copied unchanged.
pub(crate) fn cast_expression(column: &str, from: FieldType, to: FieldType) -> String {
    use FieldType::*;

    match (from, to) {
        (Boolean, String) => {
            format!("CASE {} WHEN 1 THEN 'true' WHEN 0 THEN 'false' END", column)
        }
        (Integer | Long | Double, String) => format!("CAST({} AS TEXT)", column),
        (_, String) => column.to_string(),

        (_, Integer | Long) => format!("CAST({} AS INTEGER)", column),
        (_, Double) => format!("CAST({} AS REAL)", column),

        (Date, DateTime) => format!("{} || 'T00:00:00.000000Z'", column),
        (String, DateTime) => format!(
            "strftime('%Y-%m-%dT%H:%M:%S', {col}) || '.' || substr(strftime('%f', {col}), 4, 3) || '000Z'",
            col = column
        ),
        (String, Date) => format!("date({})", column),
        (String, Boolean) => format!(
            "CASE lower({}) WHEN 'true' THEN 1 WHEN 'false' THEN 0 WHEN '1' THEN 1 WHEN '0' THEN 0 END",
            column
        ),
        (String, Json) => format!("json_quote({})", column),

        _ => column.to_string(),
    }
}

/// Column list for a `SELECT`: the system columns followed by the requested fields, or by
/// every declared field when there is no projection.
pub(crate) fn select_list(definition: &CollectionDefinition, projection: Option<&[String]>) -> StoreResult<String> {
    let mut columns = vec![
        quote_ident(ID_FIELD)?,
        quote_ident(CREATED_AT_FIELD)?,
        quote_ident(UPDATED_AT_FIELD)?,
    ];

    match projection {
        Some(fields) => {
            for field in fields {
                columns.push(quote_ident(field)?);
            }
        }
        None => {
            for field in definition.fields() {
                columns.push(quote_ident(&field.name)?);
            }
        }
    }

    Ok(columns.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use recordlayer_core::{definition::StorageConfig, error::StoreError};

    fn products() -> CollectionDefinition {
        CollectionDefinition::builder("products")
            .field(FieldDefinition::new("name", FieldType::String).nullable(false).unique())
            .field(FieldDefinition::new("price", FieldType::Double))
            .build()
            .unwrap()
    }

    #[test]
    fn create_table_has_system_columns_and_nullable_fields() {
        assert_eq!(
            create_table(&products()).unwrap(),
            "CREATE TABLE IF NOT EXISTS \"coll_products\" (\"id\" TEXT PRIMARY KEY, \
             \"created_at\" TIMESTAMP NOT NULL, \"updated_at\" TIMESTAMP NOT NULL, \
             \"name\" TEXT, \"price\" DOUBLE PRECISION)"
        );
    }

    #[test]
    fn table_override_is_still_validated() {
        let def = products().with_storage(StorageConfig::default().with_table_name("bad name"));
        assert!(matches!(create_table(&def), Err(StoreError::InvalidIdentifier(_))));
    }

    #[test]
    fn index_and_column_statements() {
        assert_eq!(
            create_unique_index("coll_products", "name").unwrap(),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"ux_coll_products_name\" ON \"coll_products\" (\"name\")"
        );
        assert_eq!(
            add_column("coll_products", &FieldDefinition::new("stock", FieldType::Integer).nullable(false)).unwrap(),
            "ALTER TABLE \"coll_products\" ADD COLUMN \"stock\" INTEGER"
        );
        assert_eq!(
            rename_column("t", "a__migrating", "a").unwrap(),
            "ALTER TABLE \"t\" RENAME COLUMN \"a__migrating\" TO \"a\""
        );
        assert!(drop_column("t", "a;--").is_err());
    }

    #[test]
    fn cast_expressions() {
        assert_eq!(
            cast_expression("\"flag\"", FieldType::Boolean, FieldType::String),
            "CASE \"flag\" WHEN 1 THEN 'true' WHEN 0 THEN 'false' END"
        );
        assert_eq!(cast_expression("\"n\"", FieldType::Integer, FieldType::Long), "CAST(\"n\" AS INTEGER)");
        assert_eq!(cast_expression("\"n\"", FieldType::Long, FieldType::Double), "CAST(\"n\" AS REAL)");
        assert_eq!(cast_expression("\"d\"", FieldType::Date, FieldType::DateTime), "\"d\" || 'T00:00:00.000000Z'");
        assert_eq!(cast_expression("\"s\"", FieldType::Json, FieldType::String), "\"s\"");
    }

    #[test]
    fn select_list_unions_system_columns() {
        let def = products();
        assert_eq!(
            select_list(&def, None).unwrap(),
            "\"id\", \"created_at\", \"updated_at\", \"name\", \"price\""
        );
        assert_eq!(
            select_list(&def, Some(&["price".to_string()])).unwrap(),
            "\"id\", \"created_at\", \"updated_at\", \"price\""
        );
    }
}
