//! The data controller (§4.5): the operations the request pipeline dispatches to once a tenant,
//! pool, and role have been resolved. Every read/write against project data runs inside a
//! per-request transaction with `SET LOCAL role` applied first, so row-level-security policies
//! see the caller's resolved role rather than the pool's connection-level superuser.

use std::time::Instant;

use cascata_core::query::{
    self, ConflictResolution, Filter, RangeWindow, SelectOptions, Statement,
};
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{Executor, Postgres, Row, Transaction};

use crate::auth::Role;
use crate::error::ApiError;

pub struct SelectResult {
    pub rows: Vec<Value>,
    pub total: Option<i64>,
}

/// Begins a transaction on the caller's pool and applies the resolved role for its lifetime
/// (§4.5 "begins a transaction ... sets role ... so row-level-security policies apply").
pub async fn begin_with_role(
    pool: &sqlx::PgPool,
    role: &Role,
) -> Result<Transaction<'static, Postgres>, ApiError> {
    let mut tx = pool.begin().await.map_err(ApiError::from_sqlx)?;
    let stmt = format!("SET LOCAL role = {}", role.guc_value());
    tx.execute(stmt.as_str()).await.map_err(ApiError::from_sqlx)?;
    Ok(tx)
}

pub async fn select(
    tx: &mut Transaction<'static, Postgres>,
    table: &str,
    filters: &[Filter],
    options: SelectOptions,
    count_exact: bool,
) -> Result<SelectResult, ApiError> {
    let Statement { sql, params } = query::translate_select(table, filters, &options)
        .map_err(|e| ApiError::validation(e.to_string()))?;
    let rows = run_bound(&mut *tx, &sql, &params).await?;
    let rows: Vec<Value> = rows.iter().map(row_to_json).collect();

    let total = if count_exact {
        let Statement { sql, params } =
            query::translate_count(table, filters).map_err(|e| ApiError::validation(e.to_string()))?;
        let count_rows = run_bound(&mut *tx, &sql, &params).await?;
        count_rows
            .first()
            .and_then(|r| r.try_get::<i64, _>(0).ok())
    } else {
        None
    };

    Ok(SelectResult { rows, total })
}

pub async fn insert(
    tx: &mut Transaction<'static, Postgres>,
    table: &str,
    rows: &[Map<String, Value>],
    on_conflict_column: Option<&str>,
    resolution: ConflictResolution,
    return_minimal: bool,
) -> Result<Vec<Value>, ApiError> {
    let Statement { sql, params } =
        query::translate_insert(table, rows, on_conflict_column, resolution, return_minimal)
            .map_err(|e| ApiError::validation(e.to_string()))?;
    let result = run_bound(&mut *tx, &sql, &params).await?;
    Ok(result.iter().map(row_to_json).collect())
}

pub async fn update(
    tx: &mut Transaction<'static, Postgres>,
    table: &str,
    patch: &Map<String, Value>,
    filters: &[Filter],
    return_minimal: bool,
) -> Result<Vec<Value>, ApiError> {
    let Statement { sql, params } = query::translate_update(table, patch, filters, return_minimal)
        .map_err(|e| ApiError::validation(e.to_string()))?;
    let result = run_bound(&mut *tx, &sql, &params).await?;
    Ok(result.iter().map(row_to_json).collect())
}

pub async fn delete(
    tx: &mut Transaction<'static, Postgres>,
    table: &str,
    filters: &[Filter],
    return_minimal: bool,
) -> Result<Vec<Value>, ApiError> {
    let Statement { sql, params } = query::translate_delete(table, filters, return_minimal)
        .map_err(|e| ApiError::validation(e.to_string()))?;
    let result = run_bound(&mut *tx, &sql, &params).await?;
    Ok(result.iter().map(row_to_json).collect())
}

/// `execute_rpc`: calls a `public` function positionally, args supplied as a JSON object whose
/// keys are matched against the function's declared parameter order.
pub async fn execute_rpc(
    tx: &mut Transaction<'static, Postgres>,
    function_name: &str,
    args: &Map<String, Value>,
) -> Result<Vec<Value>, ApiError> {
    let param_names: Vec<String> = sqlx::query_scalar(
        "SELECT p.parameter_name FROM information_schema.parameters p \
         WHERE p.specific_schema = 'public' AND p.specific_name = ( \
           SELECT specific_name FROM information_schema.routines \
           WHERE routine_schema = 'public' AND routine_name = $1 LIMIT 1) \
         ORDER BY p.ordinal_position",
    )
    .bind(function_name)
    .fetch_all(&mut **tx)
    .await
    .map_err(ApiError::from_sqlx)?;

    let placeholders: Vec<String> = (1..=param_names.len()).map(|i| format!("${i}")).collect();
    let quoted = query::quote_ident(function_name);
    let sql = format!("SELECT * FROM {quoted}({})", placeholders.join(", "));

    let mut query_builder = sqlx::query(&sql);
    for name in &param_names {
        query_builder = query_builder.bind(args.get(name).cloned().unwrap_or(Value::Null));
    }
    let rows = query_builder.fetch_all(&mut **tx).await.map_err(ApiError::from_sqlx)?;
    Ok(rows.iter().map(row_to_json).collect())
}

pub struct RawQueryResult {
    pub rows: Vec<Value>,
    pub row_count: u64,
    pub command: String,
    pub duration_ms: u128,
}

/// `run_raw_query` (§4.5): service-role only, enforced by the caller before this is reached.
/// Database errors surface as `{error, code, position}` rather than a generic 500.
pub async fn run_raw_query(
    tx: &mut Transaction<'static, Postgres>,
    sql: &str,
) -> Result<RawQueryResult, ApiError> {
    let started = Instant::now();
    let result = sqlx::query(sql).fetch_all(&mut **tx).await;
    let duration_ms = started.elapsed().as_millis();

    match result {
        Ok(rows) => {
            let command = sql
                .trim_start()
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_uppercase();
            Ok(RawQueryResult {
                row_count: rows.len() as u64,
                rows: rows.iter().map(row_to_json).collect(),
                command,
                duration_ms,
            })
        }
        Err(sqlx::Error::Database(db_err)) => {
            let position = db_err
                .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
                .and_then(|e| e.position())
                .map(|p| match p {
                    sqlx::postgres::PgErrorPosition::Original(n) => n as i64,
                    sqlx::postgres::PgErrorPosition::Internal { position, .. } => position as i64,
                });
            Err(ApiError::raw_sql(
                db_err.message().to_string(),
                db_err.code().map(|c| c.to_string()),
                position,
            ))
        }
        Err(e) => Err(ApiError::from_sqlx(e)),
    }
}

pub async fn list_tables(tx: &mut Transaction<'static, Postgres>) -> Result<Vec<Value>, ApiError> {
    let rows = sqlx::query(
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = 'public' AND table_name NOT LIKE '\\_deleted\\_%' ESCAPE '\\' \
         ORDER BY table_name",
    )
    .fetch_all(&mut **tx)
    .await
    .map_err(ApiError::from_sqlx)?;
    Ok(rows.iter().map(row_to_json).collect())
}

pub async fn get_columns(
    tx: &mut Transaction<'static, Postgres>,
    table: &str,
) -> Result<Vec<Value>, ApiError> {
    let rows = sqlx::query(
        "SELECT column_name, data_type, is_nullable, column_default FROM information_schema.columns \
         WHERE table_schema = 'public' AND table_name = $1 ORDER BY ordinal_position",
    )
    .bind(table)
    .fetch_all(&mut **tx)
    .await
    .map_err(ApiError::from_sqlx)?;
    Ok(rows.iter().map(row_to_json).collect())
}

pub async fn list_functions(tx: &mut Transaction<'static, Postgres>) -> Result<Vec<Value>, ApiError> {
    let rows = sqlx::query(
        "SELECT routine_name, data_type AS return_type FROM information_schema.routines \
         WHERE routine_schema = 'public' AND routine_type = 'FUNCTION' ORDER BY routine_name",
    )
    .fetch_all(&mut **tx)
    .await
    .map_err(ApiError::from_sqlx)?;
    Ok(rows.iter().map(row_to_json).collect())
}

pub async fn list_triggers(tx: &mut Transaction<'static, Postgres>) -> Result<Vec<Value>, ApiError> {
    let rows = sqlx::query(
        "SELECT trigger_name, event_manipulation, event_object_table AS table_name \
         FROM information_schema.triggers WHERE trigger_schema = 'public' ORDER BY trigger_name",
    )
    .fetch_all(&mut **tx)
    .await
    .map_err(ApiError::from_sqlx)?;
    Ok(rows.iter().map(row_to_json).collect())
}

pub async fn get_function_definition(
    tx: &mut Transaction<'static, Postgres>,
    name: &str,
) -> Result<Option<String>, ApiError> {
    sqlx::query_scalar(
        "SELECT pg_get_functiondef(p.oid) FROM pg_proc p \
         JOIN pg_namespace n ON n.oid = p.pronamespace \
         WHERE n.nspname = 'public' AND p.proname = $1 LIMIT 1",
    )
    .bind(name)
    .fetch_optional(&mut **tx)
    .await
    .map_err(ApiError::from_sqlx)
}

pub async fn create_table(
    tx: &mut Transaction<'static, Postgres>,
    table: &str,
    columns_ddl: &str,
) -> Result<(), ApiError> {
    let quoted = query::quote_ident(table);
    let sql = format!("CREATE TABLE {quoted} ({columns_ddl})");
    tx.execute(sql.as_str()).await.map_err(ApiError::from_sqlx)?;

    // Every table created through the platform is wired into the realtime change feed (§4.6
    // "Producer"); `cascata_notify_change` itself is provisioned once per tenant database
    // (see cascata-admin's tenant-template migration), not per table.
    let trigger_sql = crate::realtime::change_trigger_sql(table, "public");
    tx.execute(trigger_sql.as_str())
        .await
        .map_err(ApiError::from_sqlx)?;
    Ok(())
}

/// Soft-delete renames `T` to `_deleted_{unix_ms}_T`; a hard delete issues `DROP TABLE ...
/// CASCADE|RESTRICT` (§4.5).
pub async fn delete_table(
    tx: &mut Transaction<'static, Postgres>,
    table: &str,
    hard: bool,
    cascade: bool,
) -> Result<(), ApiError> {
    let quoted = query::quote_ident(table);
    if hard {
        let mode = if cascade { "CASCADE" } else { "RESTRICT" };
        let sql = format!("DROP TABLE {quoted} {mode}");
        tx.execute(sql.as_str()).await.map_err(ApiError::from_sqlx)?;
    } else {
        let unix_ms = chrono::Utc::now().timestamp_millis();
        let renamed = query::quote_ident(&format!("_deleted_{unix_ms}_{table}"));
        let sql = format!("ALTER TABLE {quoted} RENAME TO {renamed}");
        tx.execute(sql.as_str()).await.map_err(ApiError::from_sqlx)?;
    }
    Ok(())
}

pub async fn list_recycle_bin(
    tx: &mut Transaction<'static, Postgres>,
) -> Result<Vec<Value>, ApiError> {
    let rows = sqlx::query(
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = 'public' AND table_name LIKE '\\_deleted\\_%' ESCAPE '\\' \
         ORDER BY table_name",
    )
    .fetch_all(&mut **tx)
    .await
    .map_err(ApiError::from_sqlx)?;
    Ok(rows.iter().map(row_to_json).collect())
}

/// Strips the `_deleted_{unix_ms}_` prefix and restores the original name.
pub async fn restore_table(
    tx: &mut Transaction<'static, Postgres>,
    deleted_name: &str,
) -> Result<String, ApiError> {
    let original = strip_deleted_prefix(deleted_name)
        .ok_or_else(|| ApiError::validation("not a recycle-bin table name"))?;
    let from = query::quote_ident(deleted_name);
    let to = query::quote_ident(original);
    let sql = format!("ALTER TABLE {from} RENAME TO {to}");
    tx.execute(sql.as_str()).await.map_err(ApiError::from_sqlx)?;
    Ok(original.to_string())
}

fn strip_deleted_prefix(name: &str) -> Option<&str> {
    let rest = name.strip_prefix("_deleted_")?;
    let (_, original) = rest.split_once('_')?;
    Some(original)
}

pub struct Stats {
    pub table_count: i64,
    pub row_estimate: i64,
    pub user_count: Option<i64>,
    pub database_size_pretty: String,
}

pub async fn get_stats(tx: &mut Transaction<'static, Postgres>) -> Result<Stats, ApiError> {
    let table_count: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM information_schema.tables WHERE table_schema = 'public'",
    )
    .fetch_one(&mut **tx)
    .await
    .map_err(ApiError::from_sqlx)?;

    let row_estimate: i64 = sqlx::query_scalar(
        "SELECT coalesce(sum(n_live_tup), 0) FROM pg_stat_user_tables",
    )
    .fetch_one(&mut **tx)
    .await
    .map_err(ApiError::from_sqlx)?;

    let user_count: Option<i64> = sqlx::query_scalar("SELECT count(*) FROM auth_users")
        .fetch_one(&mut **tx)
        .await
        .ok();

    let database_size_pretty: String =
        sqlx::query_scalar("SELECT pg_size_pretty(pg_database_size(current_database()))")
            .fetch_one(&mut **tx)
            .await
            .map_err(ApiError::from_sqlx)?;

    Ok(Stats {
        table_count,
        row_estimate,
        user_count,
        database_size_pretty,
    })
}

pub fn parse_range(value: Option<&str>) -> Result<Option<RangeWindow>, ApiError> {
    match value {
        Some(raw) => Ok(Some(
            query::parse_range_header(raw).map_err(|e| ApiError::validation(e.to_string()))?,
        )),
        None => Ok(None),
    }
}

async fn run_bound(
    tx: &mut Transaction<'static, Postgres>,
    sql: &str,
    params: &[Value],
) -> Result<Vec<PgRow>, ApiError> {
    let mut query_builder = sqlx::query(sql);
    for param in params {
        query_builder = bind_value(query_builder, param);
    }
    query_builder
        .fetch_all(&mut **tx)
        .await
        .map_err(ApiError::from_sqlx)
}

fn bind_value<'q>(
    query_builder: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    match value {
        Value::Null => query_builder.bind(Option::<String>::None),
        Value::Bool(b) => query_builder.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query_builder.bind(i)
            } else {
                query_builder.bind(n.as_f64())
            }
        }
        Value::String(s) => query_builder.bind(s.clone()),
        other => query_builder.bind(other.clone()),
    }
}

/// Converts a Postgres row into a JSON object; see [`cascata_core::pg_row`] for the column-level
/// type dispatch, shared with the job engine's rule listener so both decode a row identically.
fn row_to_json(row: &PgRow) -> Value {
    cascata_core::pg_row::row_to_json(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_recycle_bin_prefix() {
        assert_eq!(strip_deleted_prefix("_deleted_1700000000000_customers"), Some("customers"));
        assert_eq!(strip_deleted_prefix("customers"), None);
    }
}
