//! Stored records and the value coercion shared by every adapter.
//!
//! Payloads arrive as loosely typed BSON documents. Before they reach a backend they are
//! normalized against the collection definition with [`normalize_payload`], so both storage
//! layouts see identical values for identical input.

use bson::{Bson, Document, Uuid};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    definition::{
        CollectionDefinition, CREATED_AT_FIELD, FieldType, ID_FIELD, SYSTEM_FIELDS,
        UPDATED_AT_FIELD,
    },
    error::{StoreError, StoreResult},
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// A single stored record of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    /// User-supplied field values keyed by field name.
    pub data: Document,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Creates a record stamped with the current time.
    pub fn new(id: Uuid, data: Document) -> Self {
        let now = now();
        Self { id, data, created_at: now, updated_at: now }
    }

    /// Returns the value of a user field.
    pub fn get(&self, field: &str) -> Option<&Bson> {
        self.data.get(field)
    }

    /// Returns the value of any field, system columns included.
    ///
    /// System columns are rendered as they are stored: the id as text and timestamps as
    /// BSON datetimes. Absent fields yield `Bson::Null`.
    pub fn value_of(&self, field: &str) -> Bson {
        match field {
            ID_FIELD => Bson::String(self.id.to_string()),
            CREATED_AT_FIELD => Bson::DateTime(bson::DateTime::from_chrono(self.created_at)),
            UPDATED_AT_FIELD => Bson::DateTime(bson::DateTime::from_chrono(self.updated_at)),
            _ => self.data.get(field).cloned().unwrap_or(Bson::Null),
        }
    }

    /// Keeps only the named user fields. System columns are always retained.
    pub fn project(mut self, fields: &[String]) -> Self {
        self.data = self
            .data
            .into_iter()
            .filter(|(key, _)| fields.iter().any(|field| field == key))
            .collect();
        self
    }
}

/// The current time truncated to the precision timestamps are stored with.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Renders a timestamp in the canonical storage format, e.g. `2024-01-02T03:04:05.000000Z`.
///
/// Lexical order of the rendered strings matches chronological order.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses RFC 3339 text, a naive `YYYY-MM-DD[THH:MM:SS[.f]]` datetime (taken as UTC) or a
/// bare date (midnight UTC).
pub fn parse_timestamp(text: &str) -> StoreResult<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(parsed.and_utc());
        }
    }

    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|parsed| parsed.and_utc())
        .ok_or_else(|| StoreError::InvalidRecord(format!("'{}' is not a valid datetime", text)))
}

/// Canonical textual form of a value, used for string matching and non-numeric ordering.
///
/// Returns `None` for null.
pub fn text_of(value: &Bson) -> Option<String> {
    match value {
        Bson::Null | Bson::Undefined => None,
        Bson::String(text) => Some(text.clone()),
        Bson::Boolean(flag) => Some(flag.to_string()),
        Bson::Int32(number) => Some(number.to_string()),
        Bson::Int64(number) => Some(number.to_string()),
        Bson::Double(number) => Some(format_double(*number)),
        Bson::DateTime(timestamp) => Some(format_timestamp(&timestamp.to_chrono())),
        other => Some(other.clone().into_relaxed_extjson().to_string()),
    }
}

/// Numeric view of a value, `None` when it has none.
pub fn number_of(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(number) => Some(*number as f64),
        Bson::Int64(number) => Some(*number as f64),
        Bson::Double(number) => Some(*number),
        Bson::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

// Renders like SQLite's `CAST(real AS TEXT)`: fifteen significant digits, trailing zeros
// dropped but never the last one after the point, exponent form outside 1e-4..1e15.
fn format_double(number: f64) -> String {
    if number.is_nan() {
        return "NaN".to_string();
    }
    if number.is_infinite() {
        return if number > 0.0 { "Inf" } else { "-Inf" }.to_string();
    }
    if number == 0.0 {
        return "0.0".to_string();
    }

    let scientific = format!("{:.14e}", number.abs());
    let Some((exponent, digits)) = scientific.split_once('e').and_then(|(mantissa, exponent)| {
        let digits = mantissa.chars().filter(char::is_ascii_digit).collect::<String>();
        exponent.parse::<i32>().ok().map(|exponent| (exponent, digits))
    }) else {
        return number.to_string();
    };

    let sign = if number < 0.0 { "-" } else { "" };
    let fraction = |digits: &str| match digits.trim_end_matches('0') {
        "" => "0".to_string(),
        kept => kept.to_string(),
    };

    match exponent {
        0..=14 => {
            let (whole, rest) = digits.split_at(exponent as usize + 1);
            format!("{}{}.{}", sign, whole, fraction(rest))
        }
        -4..=-1 => format!(
            "{}0.{}{}",
            sign,
            "0".repeat((-exponent - 1) as usize),
            digits.trim_end_matches('0')
        ),
        _ => {
            let (lead, rest) = digits.split_at(1);
            let exponent_sign = if exponent < 0 { '-' } else { '+' };
            format!("{}{}.{}e{}{:02}", sign, lead, fraction(rest), exponent_sign, exponent.abs())
        }
    }
}

/// Coerces `value` into the representation stored for `field_type`.
///
/// Null is always accepted. Anything that cannot be represented is `InvalidRecord`.
pub fn coerce_value(field_type: FieldType, value: Bson) -> StoreResult<Bson> {
    if matches!(value, Bson::Null | Bson::Undefined) {
        return Ok(Bson::Null);
    }

    let rejected = |value: &Bson| {
        StoreError::InvalidRecord(format!("cannot store {} as {}", value, field_type))
    };

    let coerced = match (field_type, value) {
        (FieldType::Json, value) => value,

        (FieldType::String, Bson::String(text)) => Bson::String(text),
        (FieldType::String, value @ (Bson::Document(_) | Bson::Array(_))) => {
            return Err(rejected(&value));
        }
        (FieldType::String, value) => match text_of(&value) {
            Some(text) => Bson::String(text),
            None => return Err(rejected(&value)),
        },

        (FieldType::Integer, Bson::Int32(number)) => Bson::Int32(number),
        (FieldType::Integer, value) => match integral_of(&value).and_then(|n| i32::try_from(n).ok()) {
            Some(number) => Bson::Int32(number),
            None => return Err(rejected(&value)),
        },

        (FieldType::Long, Bson::Int64(number)) => Bson::Int64(number),
        (FieldType::Long, value) => match integral_of(&value) {
            Some(number) => Bson::Int64(number),
            None => return Err(rejected(&value)),
        },

        (FieldType::Double, value) => match number_of(&value) {
            Some(number) => Bson::Double(number),
            None => return Err(rejected(&value)),
        },

        (FieldType::Boolean, Bson::Boolean(flag)) => Bson::Boolean(flag),
        (FieldType::Boolean, Bson::Int32(number @ (0 | 1))) => Bson::Boolean(number == 1),
        (FieldType::Boolean, Bson::Int64(number @ (0 | 1))) => Bson::Boolean(number == 1),
        (FieldType::Boolean, Bson::String(text)) if text.eq_ignore_ascii_case("true") => {
            Bson::Boolean(true)
        }
        (FieldType::Boolean, Bson::String(text)) if text.eq_ignore_ascii_case("false") => {
            Bson::Boolean(false)
        }
        (FieldType::Boolean, value) => return Err(rejected(&value)),

        (FieldType::Date, Bson::DateTime(timestamp)) => {
            Bson::String(timestamp.to_chrono().format(DATE_FORMAT).to_string())
        }
        (FieldType::Date, Bson::String(text)) => {
            let date = NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
                .or_else(|_| parse_timestamp(&text).map(|timestamp| timestamp.date_naive()))
                .map_err(|_| StoreError::InvalidRecord(format!("'{}' is not a valid date", text)))?;
            Bson::String(date.format(DATE_FORMAT).to_string())
        }
        (FieldType::Date, value) => return Err(rejected(&value)),

        (FieldType::DateTime, Bson::DateTime(timestamp)) => Bson::DateTime(timestamp),
        (FieldType::DateTime, Bson::String(text)) => {
            Bson::DateTime(bson::DateTime::from_chrono(parse_timestamp(&text)?))
        }
        (FieldType::DateTime, value) => return Err(rejected(&value)),
    };

    Ok(coerced)
}

fn integral_of(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(number) => Some(i64::from(*number)),
        Bson::Int64(number) => Some(*number),
        Bson::Double(number) if number.fract() == 0.0 && number.is_finite() => {
            // `as` saturates, so out-of-range doubles must be caught first.
            if *number >= i64::MIN as f64 && *number < i64::MAX as f64 {
                Some(*number as i64)
            } else {
                None
            }
        }
        Bson::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Whether a payload is being inserted or applied to an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    Update,
}

/// Normalizes a payload against the definition.
///
/// - keys naming system columns are dropped;
/// - keys naming no declared field are rejected;
/// - every value is coerced to its field's type;
/// - on create, absent fields with a default receive it;
/// - on update, immutable fields are rejected.
pub fn normalize_payload(
    definition: &CollectionDefinition,
    data: Document,
    kind: WriteKind,
) -> StoreResult<Document> {
    let mut normalized = Document::new();

    for (key, value) in data {
        if SYSTEM_FIELDS.contains(&key.as_str()) {
            continue;
        }

        let field = definition.field(&key).ok_or_else(|| {
            StoreError::InvalidRecord(format!(
                "Collection '{}' has no field '{}'",
                definition.name(),
                key
            ))
        })?;

        if kind == WriteKind::Update && field.immutable {
            return Err(StoreError::InvalidRecord(format!(
                "Field '{}' of collection '{}' is immutable",
                key,
                definition.name()
            )));
        }

        normalized.insert(key, coerce_value(field.field_type, value)?);
    }

    if kind == WriteKind::Create {
        for field in definition.fields() {
            if normalized.contains_key(&field.name) {
                continue;
            }
            if let Some(default) = &field.default_value {
                normalized.insert(field.name.clone(), coerce_value(field.field_type, default.clone())?);
            }
        }
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;
    use crate::definition::FieldDefinition;

    fn inventory() -> CollectionDefinition {
        CollectionDefinition::builder("inventory")
            .field(FieldDefinition::new("sku", FieldType::String).immutable())
            .field(FieldDefinition::new("count", FieldType::Integer).default_value(0))
            .field(FieldDefinition::new("weight", FieldType::Double))
            .field(FieldDefinition::new("active", FieldType::Boolean))
            .field(FieldDefinition::new("received", FieldType::Date))
            .field(FieldDefinition::new("audited_at", FieldType::DateTime))
            .build()
            .unwrap()
    }

    #[test]
    fn coerces_by_field_type() {
        assert_eq!(coerce_value(FieldType::Integer, Bson::String("42".into())).unwrap(), Bson::Int32(42));
        assert_eq!(coerce_value(FieldType::Integer, Bson::Double(7.0)).unwrap(), Bson::Int32(7));
        assert!(coerce_value(FieldType::Integer, Bson::Double(7.5)).is_err());
        assert!(coerce_value(FieldType::Integer, Bson::Int64(i64::MAX)).is_err());
        assert_eq!(coerce_value(FieldType::Long, Bson::Int32(3)).unwrap(), Bson::Int64(3));
        assert_eq!(coerce_value(FieldType::Double, Bson::Int32(2)).unwrap(), Bson::Double(2.0));
        assert_eq!(coerce_value(FieldType::Boolean, Bson::String("TRUE".into())).unwrap(), Bson::Boolean(true));
        assert_eq!(coerce_value(FieldType::Boolean, Bson::Int32(0)).unwrap(), Bson::Boolean(false));
        assert_eq!(coerce_value(FieldType::String, Bson::Int32(5)).unwrap(), Bson::String("5".into()));
        assert_eq!(coerce_value(FieldType::Json, doc! { "a": 1 }.into()).unwrap(), Bson::Document(doc! { "a": 1 }));
        assert_eq!(coerce_value(FieldType::Double, Bson::Null).unwrap(), Bson::Null);
    }

    #[test]
    fn dates_and_datetimes() {
        assert_eq!(
            coerce_value(FieldType::Date, Bson::String("2024-02-29".into())).unwrap(),
            Bson::String("2024-02-29".into())
        );
        assert!(coerce_value(FieldType::Date, Bson::String("2023-02-29".into())).is_err());

        let parsed = coerce_value(FieldType::DateTime, Bson::String("2024-01-02T03:04:05Z".into())).unwrap();
        let Bson::DateTime(timestamp) = parsed else { panic!("expected datetime") };
        assert_eq!(format_timestamp(&timestamp.to_chrono()), "2024-01-02T03:04:05.000000Z");

        assert!(parse_timestamp("2024-01-02").is_ok());
        assert!(parse_timestamp("2024-01-02 10:11:12").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn canonical_text() {
        assert_eq!(text_of(&Bson::Double(5.0)).as_deref(), Some("5.0"));
        assert_eq!(text_of(&Bson::Double(5.99)).as_deref(), Some("5.99"));
        assert_eq!(text_of(&Bson::Boolean(true)).as_deref(), Some("true"));
        assert_eq!(text_of(&Bson::Null), None);
        assert_eq!(number_of(&Bson::String(" 1.5 ".into())), Some(1.5));
    }

    #[test]
    fn doubles_render_with_fifteen_significant_digits() {
        let cases = [
            (0.1 + 0.2, "0.3"),
            (1.99, "1.99"),
            (-2.5, "-2.5"),
            (0.0, "0.0"),
            (100.0, "100.0"),
            (123456789012345.0, "123456789012345.0"),
            (1e15, "1.0e+15"),
            (1.5e-7, "1.5e-07"),
            (0.000123, "0.000123"),
            (2.0 / 3.0, "0.666666666666667"),
            (1e300, "1.0e+300"),
            (f64::INFINITY, "Inf"),
            (f64::NEG_INFINITY, "-Inf"),
        ];
        for (number, expected) in cases {
            assert_eq!(text_of(&Bson::Double(number)).as_deref(), Some(expected), "{number:e}");
        }
    }

    #[test]
    fn normalize_applies_defaults_and_rejects_unknown_fields() {
        let def = inventory();

        let created = normalize_payload(
            &def,
            doc! { "id": "ignored", "sku": "A-1", "weight": 2 },
            WriteKind::Create,
        )
        .unwrap();
        assert_eq!(created, doc! { "sku": "A-1", "weight": 2.0, "count": 0 });

        let unknown = normalize_payload(&def, doc! { "colour": "red" }, WriteKind::Create);
        assert!(matches!(unknown, Err(StoreError::InvalidRecord(_))));

        let immutable = normalize_payload(&def, doc! { "sku": "B-2" }, WriteKind::Update);
        assert!(matches!(immutable, Err(StoreError::InvalidRecord(_))));

        let update = normalize_payload(&def, doc! { "active": "false" }, WriteKind::Update).unwrap();
        assert_eq!(update, doc! { "active": false });
    }

    #[test]
    fn projection_keeps_requested_fields() {
        let record = Record::new(Uuid::new(), doc! { "sku": "A-1", "count": 3, "weight": 1.0 });
        let projected = record.clone().project(&["count".to_string()]);

        assert_eq!(projected.data, doc! { "count": 3 });
        assert_eq!(projected.id, record.id);
        assert_eq!(projected.value_of("id"), Bson::String(record.id.to_string()));
    }
}
