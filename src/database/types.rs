//! SQL Server type mapping between result rows, bound parameters and JSON.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tiberius::Row;
use uuid::Uuid;

/// A value read from a result row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Decimal(Decimal),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
}

impl SqlValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Convert into the JSON shape returned to clients.
    ///
    /// Decimals are rendered as strings to keep their precision; binary
    /// data as a `0x`-prefixed hex string.
    pub fn into_json(self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(v) => Value::Bool(v),
            SqlValue::I16(v) => Value::from(v),
            SqlValue::I32(v) => Value::from(v),
            SqlValue::I64(v) => Value::from(v),
            SqlValue::F32(v) => Value::from(f64::from(v)),
            SqlValue::F64(v) => Value::from(v),
            SqlValue::String(v) => Value::String(v),
            SqlValue::Bytes(v) => {
                let hex: String = v.iter().map(|b| format!("{:02X}", b)).collect();
                Value::String(format!("0x{}", hex))
            }
            SqlValue::Decimal(v) => Value::String(v.to_string()),
            SqlValue::Uuid(v) => Value::String(v.to_string()),
            SqlValue::Date(v) => Value::String(v.to_string()),
            SqlValue::Time(v) => Value::String(v.to_string()),
            SqlValue::DateTime(v) => Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            SqlValue::DateTimeUtc(v) => Value::String(v.to_rfc3339()),
        }
    }
}

/// A value bound as a query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
}

impl SqlParam {
    /// Convert a JSON value supplied by the client.
    ///
    /// Arrays and objects are bound as their JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlParam::Null,
            Value::Bool(b) => SqlParam::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlParam::I64(i),
                None => n
                    .as_f64()
                    .map(SqlParam::F64)
                    .unwrap_or_else(|| SqlParam::String(n.to_string())),
            },
            Value::String(s) => SqlParam::String(s.clone()),
            other => SqlParam::String(other.to_string()),
        }
    }

    /// Whether this parameter is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlParam::Null)
    }

    /// Bind onto a tiberius query in order.
    pub fn bind_to(&self, query: &mut tiberius::Query<'_>) {
        match self {
            SqlParam::Null => query.bind(Option::<String>::None),
            SqlParam::Bool(v) => query.bind(*v),
            SqlParam::I64(v) => query.bind(*v),
            SqlParam::F64(v) => query.bind(*v),
            SqlParam::String(v) => query.bind(v.clone()),
        }
    }
}

/// Type mapper for converting SQL Server types to Rust types.
pub struct TypeMapper;

impl TypeMapper {
    /// Extract a value from a Tiberius row column.
    pub fn extract_column(row: &Row, idx: usize) -> SqlValue {
        if row.columns().get(idx).is_none() {
            return SqlValue::Null;
        }

        // Strings (most common)
        if let Some(v) = row.try_get::<&str, _>(idx).ok().flatten() {
            return SqlValue::String(v.to_string());
        }

        if let Some(v) = row.try_get::<i32, _>(idx).ok().flatten() {
            return SqlValue::I32(v);
        }
        if let Some(v) = row.try_get::<i64, _>(idx).ok().flatten() {
            return SqlValue::I64(v);
        }
        if let Some(v) = row.try_get::<i16, _>(idx).ok().flatten() {
            return SqlValue::I16(v);
        }
        // TINYINT is unsigned in SQL Server
        if let Some(v) = row.try_get::<u8, _>(idx).ok().flatten() {
            return SqlValue::I16(i16::from(v));
        }

        if let Some(v) = row.try_get::<f64, _>(idx).ok().flatten() {
            return SqlValue::F64(v);
        }
        if let Some(v) = row.try_get::<f32, _>(idx).ok().flatten() {
            return SqlValue::F32(v);
        }

        if let Some(v) = row.try_get::<Decimal, _>(idx).ok().flatten() {
            return SqlValue::Decimal(v);
        }

        if let Some(v) = row.try_get::<bool, _>(idx).ok().flatten() {
            return SqlValue::Bool(v);
        }

        if let Some(v) = row.try_get::<Uuid, _>(idx).ok().flatten() {
            return SqlValue::Uuid(v);
        }

        if let Some(v) = row.try_get::<DateTime<Utc>, _>(idx).ok().flatten() {
            return SqlValue::DateTimeUtc(v);
        }
        if let Some(v) = row.try_get::<NaiveDateTime, _>(idx).ok().flatten() {
            return SqlValue::DateTime(v);
        }
        if let Some(v) = row.try_get::<NaiveDate, _>(idx).ok().flatten() {
            return SqlValue::Date(v);
        }
        if let Some(v) = row.try_get::<NaiveTime, _>(idx).ok().flatten() {
            return SqlValue::Time(v);
        }

        if let Some(v) = row.try_get::<&[u8], _>(idx).ok().flatten() {
            return SqlValue::Bytes(v.to_vec());
        }

        // NULL or a type without a mapping
        SqlValue::Null
    }

    /// Convert a whole row into a JSON object keyed by column name.
    pub fn row_to_json(row: &Row) -> serde_json::Map<String, Value> {
        row.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                (
                    col.name().to_string(),
                    Self::extract_column(row, idx).into_json(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sql_value_to_json() {
        assert_eq!(SqlValue::Null.into_json(), Value::Null);
        assert_eq!(SqlValue::I32(42).into_json(), json!(42));
        assert_eq!(SqlValue::String("hello".into()).into_json(), json!("hello"));
        assert_eq!(SqlValue::Bool(true).into_json(), json!(true));
        assert_eq!(
            SqlValue::Bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]).into_json(),
            json!("0xDEADBEEF")
        );
        assert_eq!(
            SqlValue::Decimal(Decimal::new(12345, 2)).into_json(),
            json!("123.45")
        );
    }

    #[test]
    fn test_sql_value_is_null() {
        assert!(SqlValue::Null.is_null());
        assert!(!SqlValue::I32(0).is_null());
    }

    #[test]
    fn test_param_from_json() {
        assert_eq!(SqlParam::from_json(&json!(null)), SqlParam::Null);
        assert_eq!(SqlParam::from_json(&json!(7)), SqlParam::I64(7));
        assert_eq!(SqlParam::from_json(&json!(1.5)), SqlParam::F64(1.5));
        assert_eq!(SqlParam::from_json(&json!(false)), SqlParam::Bool(false));
        assert_eq!(
            SqlParam::from_json(&json!("Ada")),
            SqlParam::String("Ada".into())
        );
        assert_eq!(
            SqlParam::from_json(&json!(["a", 1])),
            SqlParam::String(r#"["a",1]"#.into())
        );
        assert!(SqlParam::from_json(&json!(null)).is_null());
    }
}
