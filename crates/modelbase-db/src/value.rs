//! Engine-neutral statement parameters and result rows.

use chrono::{DateTime, Utc};
use modelbase_core::catalog::ColumnType;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};

/// A statement parameter or result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Text.
    Text(String),
    /// Binary.
    Bytes(Vec<u8>),
    /// Structured value.
    Json(serde_json::Value),
    /// Point in time.
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Convert a JSON seed value, guided by the target column type.
    pub fn from_json(value: &serde_json::Value, column_type: Option<ColumnType>) -> Self {
        use serde_json::Value as Json;

        match (value, column_type) {
            (Json::Null, _) => Value::Null,
            (other, Some(ColumnType::Json)) => Value::Json(other.clone()),
            (Json::Bool(b), _) => Value::Bool(*b),
            (Json::Number(n), Some(ColumnType::Real | ColumnType::Double)) => {
                Value::Float(n.as_f64().unwrap_or_default())
            }
            (Json::Number(n), _) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            (Json::String(s), Some(ColumnType::Timestamp)) => DateTime::parse_from_rfc3339(s)
                .map(|ts| Value::Timestamp(ts.with_timezone(&Utc)))
                .unwrap_or_else(|_| Value::Text(s.clone())),
            (Json::String(s), _) => Value::Text(s.clone()),
            (other, _) => Value::Json(other.clone()),
        }
    }

    /// Whether this is SQL null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer value, if any.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Float value, if any.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Text value, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean value. SQLite stores booleans as integers.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::Json(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Value::Null => Ok(ToSqlOutput::Owned(SqlValue::Null)),
            Value::Bool(b) => Ok(ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b)))),
            Value::Int(i) => Ok(ToSqlOutput::Owned(SqlValue::Integer(*i))),
            Value::Float(f) => Ok(ToSqlOutput::Owned(SqlValue::Real(*f))),
            Value::Text(s) => Ok(ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes()))),
            Value::Bytes(b) => Ok(ToSqlOutput::Borrowed(ValueRef::Blob(&b[..]))),
            Value::Json(j) => j.to_sql(),
            Value::Timestamp(ts) => ts.to_sql(),
        }
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Int(i),
            ValueRef::Real(f) => Value::Float(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
        }
    }
}

/// A result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row from column names and values of equal length.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of a named column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Integer value of a named column.
    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(Value::as_i64)
    }

    /// Text value of a named column.
    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_str)
    }

    /// Consume the row into its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_follows_column_type() {
        assert_eq!(Value::from_json(&json!(null), None), Value::Null);
        assert_eq!(Value::from_json(&json!(3), None), Value::Int(3));
        assert_eq!(
            Value::from_json(&json!(3), Some(ColumnType::Double)),
            Value::Float(3.0)
        );
        assert_eq!(
            Value::from_json(&json!("x"), Some(ColumnType::Json)),
            Value::Json(json!("x"))
        );
        assert_eq!(
            Value::from_json(&json!({"a": 1}), None),
            Value::Json(json!({"a": 1}))
        );

        let ts = Value::from_json(&json!("2024-05-01T10:00:00Z"), Some(ColumnType::Timestamp));
        assert!(matches!(ts, Value::Timestamp(_)));
        let not_ts = Value::from_json(&json!("yesterday"), Some(ColumnType::Timestamp));
        assert_eq!(not_ts, Value::Text("yesterday".into()));
    }

    #[test]
    fn test_row_access() {
        let row = Row::new(
            vec!["id".into(), "n".into(), "flag".into()],
            vec![Value::from("a"), Value::from(2i64), Value::Int(1)],
        );
        assert_eq!(row.get_str("id"), Some("a"));
        assert_eq!(row.get_i64("n"), Some(2));
        assert_eq!(row.get("flag").and_then(Value::as_bool), Some(true));
        assert!(row.get("missing").is_none());
    }

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
    }
}
