//! Conversions between sqlx rows and engine-neutral values.

use crate::error::{Error, Result};
use crate::value::{Row, Value};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

/// Bind engine-neutral values to a sqlx query, in order.
macro_rules! bind_values {
    ($query:expr, $params:expr) => {{
        let mut query = $query;
        for value in $params {
            query = match value {
                $crate::value::Value::Null => query.bind(None::<String>),
                $crate::value::Value::Bool(b) => query.bind(*b),
                $crate::value::Value::Int(i) => query.bind(*i),
                $crate::value::Value::Float(f) => query.bind(*f),
                $crate::value::Value::Text(s) => query.bind(s.clone()),
                $crate::value::Value::Bytes(b) => query.bind(b.clone()),
                $crate::value::Value::Json(j) => query.bind(sqlx::types::Json(j.clone())),
                $crate::value::Value::Timestamp(ts) => query.bind(*ts),
            };
        }
        query
    }};
}

pub(crate) use bind_values;

/// Decode a PostgreSQL row by column type name.
pub(crate) fn pg_row(row: &PgRow) -> Result<Row> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for (i, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());
        if row.try_get_raw(i)?.is_null() {
            values.push(Value::Null);
            continue;
        }
        let value = match column.type_info().name() {
            "BOOL" => Value::Bool(row.try_get(i)?),
            "INT2" => Value::Int(i64::from(row.try_get::<i16, _>(i)?)),
            "INT4" => Value::Int(i64::from(row.try_get::<i32, _>(i)?)),
            "INT8" => Value::Int(row.try_get(i)?),
            "FLOAT4" => Value::Float(f64::from(row.try_get::<f32, _>(i)?)),
            "FLOAT8" => Value::Float(row.try_get(i)?),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => Value::Text(row.try_get(i)?),
            "BYTEA" => Value::Bytes(row.try_get(i)?),
            "JSON" | "JSONB" => {
                Value::Json(row.try_get::<sqlx::types::Json<serde_json::Value>, _>(i)?.0)
            }
            "TIMESTAMPTZ" => Value::Timestamp(row.try_get::<DateTime<Utc>, _>(i)?),
            "TIMESTAMP" => Value::Timestamp(row.try_get::<NaiveDateTime, _>(i)?.and_utc()),
            other => {
                return Err(Error::Unsupported(format!(
                    "column {} has type {other}; cast it to text in the query",
                    column.name()
                )))
            }
        };
        values.push(value);
    }
    Ok(Row::new(columns, values))
}

/// Decode a SQLite row by the storage class of each value.
pub(crate) fn sqlite_row(row: &SqliteRow) -> Result<Row> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for (i, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());
        let raw = row.try_get_raw(i)?;
        if raw.is_null() {
            values.push(Value::Null);
            continue;
        }
        let class = raw.type_info().name().to_string();
        let value = match class.as_str() {
            "INTEGER" | "BOOLEAN" => Value::Int(row.try_get(i)?),
            "REAL" => Value::Float(row.try_get(i)?),
            "BLOB" => Value::Bytes(row.try_get(i)?),
            _ => Value::Text(row.try_get(i)?),
        };
        values.push(value);
    }
    Ok(Row::new(columns, values))
}
