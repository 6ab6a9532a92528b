//! Converts a dynamically-typed `sqlx` Postgres row into a JSON object, dispatching on the
//! column's reported type name.
//!
//! There is no single canonical way to do this over `sqlx`'s dynamic `query()` API (unlike
//! `query_as!`, which has compile-time column types); this covers the scalar types that appear in
//! PostgREST-style payloads and row-change notifications, falling back to a string render for
//! anything unusual rather than failing the whole row. Shared by the gateway's data controller and
//! the job engine's rule listener so both decode a row identically.

use serde_json::{Map, Value};
use sqlx::postgres::{PgColumn, PgRow};
use sqlx::{Column, Row, TypeInfo};

pub fn row_to_json(row: &PgRow) -> Value {
    let mut object = Map::with_capacity(row.columns().len());
    for column in row.columns() {
        let value = decode_column(row, column);
        object.insert(column.name().to_string(), value);
    }
    Value::Object(object)
}

pub fn decode_column(row: &PgRow, column: &PgColumn) -> Value {
    let index = column.ordinal();
    let type_name = column.type_info().name();
    match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index).ok().flatten().map(Value::Bool).unwrap_or(Value::Null),
        "INT2" => opt_number(row.try_get::<Option<i16>, _>(index), |v| v as i64),
        "INT4" => opt_number(row.try_get::<Option<i32>, _>(index), |v| v as i64),
        "INT8" => opt_number(row.try_get::<Option<i64>, _>(index), |v| v),
        "FLOAT4" => opt_float(row.try_get::<Option<f32>, _>(index), |v| v as f64),
        "FLOAT8" => opt_float(row.try_get::<Option<f64>, _>(index), |v| v),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index).ok().flatten().unwrap_or(Value::Null),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)
            .ok()
            .flatten()
            .map(|u| Value::String(u.to_string()))
            .unwrap_or(Value::Null),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)
            .ok()
            .flatten()
            .map(|t| Value::String(t.to_rfc3339()))
            .unwrap_or(Value::Null),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)
            .ok()
            .flatten()
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn opt_number<T>(result: Result<Option<T>, sqlx::Error>, to_i64: impl Fn(T) -> i64) -> Value {
    result
        .ok()
        .flatten()
        .map(|v| Value::from(to_i64(v)))
        .unwrap_or(Value::Null)
}

fn opt_float<T>(result: Result<Option<T>, sqlx::Error>, to_f64: impl Fn(T) -> f64) -> Value {
    result
        .ok()
        .flatten()
        .and_then(|v| serde_json::Number::from_f64(to_f64(v)))
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
