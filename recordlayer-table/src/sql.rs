//! Identifier validation, column types and value conversion for generated SQL.
//!
//! Identifiers are never escaped: anything that does not match
//! `^[A-Za-z_][A-Za-z0-9_]*$` is rejected before it reaches a statement. Values are never
//! interpolated; they are converted with [`to_sql_value`] and bound as parameters.

use bson::Bson;
use recordlayer_core::{
    definition::FieldType,
    error::{StoreError, StoreResult},
    record::{coerce_value, format_timestamp},
};
use recordlayer_sqlite::Value;
use regex::Regex;
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Validates a table or column name and returns it double-quoted.
pub fn quote_ident(identifier: &str) -> StoreResult<String> {
    validate_identifier(identifier)?;
    Ok(format!("\"{}\"", identifier))
}

pub fn validate_identifier(identifier: &str) -> StoreResult<()> {
    if IDENTIFIER.is_match(identifier) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(identifier.to_string()))
    }
}

/// Declared column type for a field type.
///
/// JSON columns are declared `JSON TEXT` so SQLite gives them text affinity: a scalar such
/// as `10` is kept as the JSON text it was written as instead of being turned into a number.
pub fn column_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::String => "TEXT",
        FieldType::Integer => "INTEGER",
        FieldType::Long => "BIGINT",
        FieldType::Double => "DOUBLE PRECISION",
        FieldType::Boolean => "BOOLEAN",
        FieldType::Date => "DATE",
        FieldType::DateTime => "TIMESTAMP",
        FieldType::Json => "JSON TEXT",
    }
}

/// Expression rendering a column as the canonical text used by string operators.
pub fn text_expression(column: &str, field_type: FieldType) -> String {
    match field_type {
        FieldType::Integer | FieldType::Long | FieldType::Double => {
            format!("CAST({} AS TEXT)", column)
        }
        FieldType::Boolean => format!("CASE {} WHEN 1 THEN 'true' WHEN 0 THEN 'false' END", column),
        FieldType::String | FieldType::Date | FieldType::DateTime | FieldType::Json => {
            column.to_string()
        }
    }
}

/// Converts a normalized value into the parameter bound for a column of `field_type`.
pub fn to_sql_value(field_type: FieldType, value: &Bson) -> StoreResult<Value> {
    let value = match (field_type, value) {
        (_, Bson::Null | Bson::Undefined) => Value::Null,
        (FieldType::Json, value) => Value::Text(value.clone().into_relaxed_extjson().to_string()),
        (FieldType::String | FieldType::Date, Bson::String(text)) => Value::Text(text.clone()),
        (FieldType::Integer, Bson::Int32(number)) => Value::Integer(i64::from(*number)),
        (FieldType::Long, Bson::Int64(number)) => Value::Integer(*number),
        (FieldType::Double, Bson::Double(number)) => Value::Real(*number),
        (FieldType::Boolean, Bson::Boolean(flag)) => Value::Integer(i64::from(*flag)),
        (FieldType::DateTime, Bson::DateTime(timestamp)) => {
            Value::Text(format_timestamp(&timestamp.to_chrono()))
        }
        // Not yet normalized: coerce and retry once.
        (field_type, other) => {
            let coerced = coerce_value(field_type, other.clone())?;
            if &coerced == other {
                return Err(StoreError::InvalidRecord(format!(
                    "cannot bind {} as {}",
                    other, field_type
                )));
            }
            return to_sql_value(field_type, &coerced);
        }
    };

    Ok(value)
}

/// Converts a stored column value back into BSON for a field of `field_type`.
///
/// Values that no longer fit the declared type are returned as stored.
pub fn from_sql_value(field_type: FieldType, value: Value) -> Bson {
    let raw = match value {
        Value::Null => return Bson::Null,
        // Read the way JSON text is: the narrowest integer that holds the number.
        Value::Integer(number) if field_type == FieldType::Json => {
            return i32::try_from(number).map(Bson::Int32).unwrap_or(Bson::Int64(number));
        }
        Value::Integer(number) => Bson::Int64(number),
        Value::Real(number) => Bson::Double(number),
        Value::Text(text) if field_type == FieldType::Json => {
            return serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|json| Bson::try_from(json).ok())
                .unwrap_or(Bson::String(text));
        }
        Value::Text(text) => Bson::String(text),
        Value::Blob(bytes) => Bson::Binary(bson::Binary {
            subtype: bson::spec::BinarySubtype::Generic,
            bytes,
        }),
    };

    coerce_value(field_type, raw.clone()).unwrap_or(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn identifiers_are_validated_not_escaped() {
        assert_eq!(quote_ident("coll_products").unwrap(), "\"coll_products\"");
        assert!(quote_ident("_private9").is_ok());

        for bad in ["", "9lives", "name; DROP TABLE x", "a-b", "quo\"te", "space name", "ünï"] {
            assert!(
                matches!(quote_ident(bad), Err(StoreError::InvalidIdentifier(id)) if id == bad),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn column_types_cover_every_field_type() {
        let rendered = FieldType::ALL.map(column_type);
        assert_eq!(
            rendered,
            ["TEXT", "INTEGER", "BIGINT", "DOUBLE PRECISION", "BOOLEAN", "DATE", "TIMESTAMP", "JSON TEXT"]
        );
    }

    #[test]
    fn values_convert_both_ways() {
        assert_eq!(to_sql_value(FieldType::Boolean, &Bson::Boolean(true)).unwrap(), Value::Integer(1));
        assert_eq!(to_sql_value(FieldType::Integer, &Bson::String("7".into())).unwrap(), Value::Integer(7));
        assert_eq!(to_sql_value(FieldType::Double, &Bson::Null).unwrap(), Value::Null);
        assert!(to_sql_value(FieldType::Integer, &Bson::String("seven".into())).is_err());

        assert_eq!(from_sql_value(FieldType::Boolean, Value::Integer(0)), Bson::Boolean(false));
        assert_eq!(from_sql_value(FieldType::Integer, Value::Integer(12)), Bson::Int32(12));
        assert_eq!(from_sql_value(FieldType::Double, Value::Integer(2)), Bson::Double(2.0));
        assert_eq!(from_sql_value(FieldType::String, Value::Null), Bson::Null);

        assert_eq!(to_sql_value(FieldType::Json, &Bson::Int32(10)).unwrap(), Value::Text("10".into()));
        assert_eq!(from_sql_value(FieldType::Json, Value::Text("10".into())), Bson::Int32(10));
        assert_eq!(from_sql_value(FieldType::Json, Value::Integer(10)), Bson::Int32(10));
        assert_eq!(from_sql_value(FieldType::Json, Value::Text("\"a\"".into())), Bson::String("a".into()));

        let json = to_sql_value(FieldType::Json, &Bson::Document(doc! { "tags": ["a", "b"] })).unwrap();
        let Value::Text(text) = json else { panic!("json is stored as text") };
        assert_eq!(
            from_sql_value(FieldType::Json, Value::Text(text)),
            Bson::Document(doc! { "tags": ["a", "b"] })
        );
    }
}
