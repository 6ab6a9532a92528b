//! Data-plane HTTP handlers (§4.5, §4.6, §4.7 "Producer"/enqueue side, §4.8 enqueue side).
//!
//! Every handler here is reached only after [`crate::pipeline::run`] has resolved a tenant,
//! applied CORS/rate-limiting, and attached a [`RequestContext`]; handlers only need to pick the
//! pool, enforce per-route role requirements the pipeline can't know about (service-role-only
//! raw SQL, for instance), and call into [`crate::data_controller`].

use std::collections::HashMap;

use axum::extract::{Extension, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::Sse;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use cascata_core::jobs::{DbSelector, PushJob, PushNotification, PUSH_QUEUE};
use cascata_core::query::{self, ConflictResolution, Filter, SelectOptions};
use cascata_core::Queue;

use crate::acquire;
use crate::auth::Role;
use crate::data_controller as dc;
use crate::error::ApiError;
use crate::pipeline::RequestContext;
use crate::state::AppState;

fn require_service_role(ctx: &RequestContext) -> Result<(), ApiError> {
    if ctx.role == Role::ServiceRole {
        Ok(())
    } else {
        Err(ApiError::forbidden("service role required"))
    }
}

fn prefer_return_minimal(headers: &HeaderMap) -> bool {
    headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|p| p.trim() == "return=minimal"))
        .unwrap_or(false)
}

fn prefer_count_exact(headers: &HeaderMap) -> bool {
    headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|p| p.trim() == "count=exact"))
        .unwrap_or(false)
}

fn conflict_resolution(headers: &HeaderMap) -> ConflictResolution {
    headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            if v.contains("resolution=merge-duplicates") {
                ConflictResolution::MergeDuplicates
            } else if v.contains("resolution=ignore-duplicates") {
                ConflictResolution::IgnoreDuplicates
            } else {
                ConflictResolution::None
            }
        })
        .unwrap_or(ConflictResolution::None)
}

fn filters_from_query(params: &HashMap<String, String>) -> Vec<Filter> {
    let pairs: Vec<(String, String)> = params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    query::parse_filters(&pairs)
}

fn rows_of(body: Value) -> Result<Vec<Map<String, Value>>, ApiError> {
    match body {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                _ => Err(ApiError::validation("row must be a JSON object")),
            })
            .collect(),
        Value::Object(map) => Ok(vec![map]),
        _ => Err(ApiError::validation("body must be an object or array of objects")),
    }
}

/// `GET /api/data/{slug}/tables`
pub async fn list_tables(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, true).await?;
    let mut tx = dc::begin_with_role(&pool.pool, &ctx.role).await?;
    let tables = dc::list_tables(&mut tx).await?;
    tx.commit().await.map_err(ApiError::from_sqlx)?;
    Ok(Json(tables))
}

/// `GET /api/data/{slug}/tables/{table}/columns`
pub async fn get_columns(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((_slug, table)): Path<(String, String)>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, true).await?;
    let mut tx = dc::begin_with_role(&pool.pool, &ctx.role).await?;
    let columns = dc::get_columns(&mut tx, &table).await?;
    tx.commit().await.map_err(ApiError::from_sqlx)?;
    Ok(Json(columns))
}

/// `GET /api/data/{slug}/functions`
pub async fn list_functions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, true).await?;
    let mut tx = dc::begin_with_role(&pool.pool, &ctx.role).await?;
    let functions = dc::list_functions(&mut tx).await?;
    tx.commit().await.map_err(ApiError::from_sqlx)?;
    Ok(Json(functions))
}

/// `GET /api/data/{slug}/triggers`
pub async fn list_triggers(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, true).await?;
    let mut tx = dc::begin_with_role(&pool.pool, &ctx.role).await?;
    let triggers = dc::list_triggers(&mut tx).await?;
    tx.commit().await.map_err(ApiError::from_sqlx)?;
    Ok(Json(triggers))
}

/// `GET /api/data/{slug}/functions/{name}/definition`
pub async fn function_definition(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((_slug, name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, true).await?;
    let mut tx = dc::begin_with_role(&pool.pool, &ctx.role).await?;
    let definition = dc::get_function_definition(&mut tx, &name).await?;
    tx.commit().await.map_err(ApiError::from_sqlx)?;
    Ok(Json(serde_json::json!({ "definition": definition })))
}

/// `GET /api/data/{slug}/stats`
pub async fn stats(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Value>, ApiError> {
    require_service_role(&ctx)?;
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, true).await?;
    let mut tx = dc::begin_with_role(&pool.pool, &ctx.role).await?;
    let stats = dc::get_stats(&mut tx).await?;
    tx.commit().await.map_err(ApiError::from_sqlx)?;
    Ok(Json(serde_json::json!({
        "table_count": stats.table_count,
        "row_estimate": stats.row_estimate,
        "user_count": stats.user_count,
        "database_size_pretty": stats.database_size_pretty,
    })))
}

/// `GET /api/data/{slug}/openapi.json`: a minimal description, enough for client generators to
/// discover table names; full column-level schema introspection is left to `/tables/{table}/columns`.
pub async fn openapi(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Value>, ApiError> {
    if !ctx.project.metadata.schema_exposure && !ctx.is_verified_admin {
        return Err(ApiError::forbidden("schema exposure is disabled for this project"));
    }
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, true).await?;
    let mut tx = dc::begin_with_role(&pool.pool, &ctx.role).await?;
    let tables = dc::list_tables(&mut tx).await?;
    tx.commit().await.map_err(ApiError::from_sqlx)?;
    let paths: Map<String, Value> = tables
        .iter()
        .filter_map(|t| t.get("table_name").and_then(|v| v.as_str()))
        .map(|name| {
            (
                format!("/{name}"),
                serde_json::json!({ "get": {}, "post": {}, "patch": {}, "delete": {} }),
            )
        })
        .collect();
    Ok(Json(serde_json::json!({
        "openapi": "3.0.0",
        "info": { "title": ctx.project.display_name, "version": "1.0.0" },
        "paths": Value::Object(paths),
    })))
}

#[derive(Deserialize)]
pub struct TableQuery {
    pub select: Option<String>,
    pub order: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub on_conflict: Option<String>,
    #[serde(flatten)]
    pub filters: HashMap<String, String>,
}

/// `GET /api/data/{slug}/{table}`
pub async fn select_rows(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((_slug, table)): Path<(String, String)>,
    Query(query): Query<TableQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let range = dc::parse_range(headers.get("range").and_then(|v| v.to_str().ok()))?;
    let filters = filters_from_query(&query.filters);
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, true).await?;
    let mut tx = dc::begin_with_role(&pool.pool, &ctx.role).await?;
    let result = dc::select(
        &mut tx,
        &table,
        &filters,
        SelectOptions {
            select: query.select.as_deref(),
            order: query.order.as_deref(),
            range,
            explicit_limit: query.limit,
            explicit_offset: query.offset,
        },
        prefer_count_exact(&headers),
    )
    .await?;
    tx.commit().await.map_err(ApiError::from_sqlx)?;
    Ok(Json(serde_json::json!({
        "rows": result.rows,
        "total": result.total,
    })))
}

/// `POST /api/data/{slug}/{table}`
pub async fn insert_rows(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((_slug, table)): Path<(String, String)>,
    Query(query): Query<TableQuery>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let rows = rows_of(body)?;
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, false).await?;
    let mut tx = dc::begin_with_role(&pool.pool, &ctx.role).await?;
    let inserted = dc::insert(
        &mut tx,
        &table,
        &rows,
        query.on_conflict.as_deref(),
        conflict_resolution(&headers),
        prefer_return_minimal(&headers),
    )
    .await?;
    tx.commit().await.map_err(ApiError::from_sqlx)?;
    Ok(Json(inserted))
}

/// `PATCH /api/data/{slug}/{table}`
pub async fn update_rows(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((_slug, table)): Path<(String, String)>,
    Query(query): Query<TableQuery>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let patch = match body {
        Value::Object(map) => map,
        _ => return Err(ApiError::validation("body must be a JSON object")),
    };
    let filters = filters_from_query(&query.filters);
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, false).await?;
    let mut tx = dc::begin_with_role(&pool.pool, &ctx.role).await?;
    let updated = dc::update(&mut tx, &table, &patch, &filters, prefer_return_minimal(&headers)).await?;
    tx.commit().await.map_err(ApiError::from_sqlx)?;
    Ok(Json(updated))
}

/// `DELETE /api/data/{slug}/{table}`
pub async fn delete_rows(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((_slug, table)): Path<(String, String)>,
    Query(query): Query<TableQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<Value>>, ApiError> {
    let filters = filters_from_query(&query.filters);
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, false).await?;
    let mut tx = dc::begin_with_role(&pool.pool, &ctx.role).await?;
    let deleted = dc::delete(&mut tx, &table, &filters, prefer_return_minimal(&headers)).await?;
    tx.commit().await.map_err(ApiError::from_sqlx)?;
    Ok(Json(deleted))
}

#[derive(Deserialize)]
pub struct RpcRequest(#[serde(default)] Map<String, Value>);

/// `POST /api/data/{slug}/rpc/{name}`
pub async fn rpc(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((_slug, name)): Path<(String, String)>,
    Json(RpcRequest(args)): Json<RpcRequest>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, false).await?;
    let mut tx = dc::begin_with_role(&pool.pool, &ctx.role).await?;
    let result = dc::execute_rpc(&mut tx, &name, &args).await?;
    tx.commit().await.map_err(ApiError::from_sqlx)?;
    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct RawQueryRequest {
    pub sql: String,
}

/// `POST /api/data/{slug}/query`: service-role only raw SQL escape hatch (§4.5 `run_raw_query`).
pub async fn raw_query(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<RawQueryRequest>,
) -> Result<Json<Value>, ApiError> {
    require_service_role(&ctx)?;
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, false).await?;
    let mut tx = dc::begin_with_role(&pool.pool, &ctx.role).await?;
    let result = dc::run_raw_query(&mut tx, &body.sql).await?;
    tx.commit().await.map_err(ApiError::from_sqlx)?;
    Ok(Json(serde_json::json!({
        "rows": result.rows,
        "row_count": result.row_count,
        "command": result.command,
        "duration_ms": result.duration_ms,
    })))
}

#[derive(Deserialize)]
pub struct CreateTableRequest {
    pub table: String,
    pub columns_ddl: String,
}

/// `POST /api/data/{slug}/schema/tables`: service-role only DDL.
pub async fn create_table(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<CreateTableRequest>,
) -> Result<axum::http::StatusCode, ApiError> {
    require_service_role(&ctx)?;
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, false).await?;
    let mut tx = dc::begin_with_role(&pool.pool, &ctx.role).await?;
    dc::create_table(&mut tx, &body.table, &body.columns_ddl).await?;
    tx.commit().await.map_err(ApiError::from_sqlx)?;
    Ok(axum::http::StatusCode::CREATED)
}

#[derive(Deserialize)]
pub struct DeleteTableQuery {
    #[serde(default)]
    pub hard: bool,
    #[serde(default)]
    pub cascade: bool,
}

/// `DELETE /api/data/{slug}/schema/tables/{table}`
pub async fn delete_table(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((_slug, table)): Path<(String, String)>,
    Query(query): Query<DeleteTableQuery>,
) -> Result<axum::http::StatusCode, ApiError> {
    require_service_role(&ctx)?;
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, false).await?;
    let mut tx = dc::begin_with_role(&pool.pool, &ctx.role).await?;
    dc::delete_table(&mut tx, &table, query.hard, query.cascade).await?;
    tx.commit().await.map_err(ApiError::from_sqlx)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// `GET /api/data/{slug}/schema/recycle-bin`
pub async fn recycle_bin(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Vec<Value>>, ApiError> {
    require_service_role(&ctx)?;
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, true).await?;
    let mut tx = dc::begin_with_role(&pool.pool, &ctx.role).await?;
    let tables = dc::list_recycle_bin(&mut tx).await?;
    tx.commit().await.map_err(ApiError::from_sqlx)?;
    Ok(Json(tables))
}

/// `POST /api/data/{slug}/schema/recycle-bin/{deleted_name}/restore`
pub async fn restore_table(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((_slug, deleted_name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    require_service_role(&ctx)?;
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, false).await?;
    let mut tx = dc::begin_with_role(&pool.pool, &ctx.role).await?;
    let restored = dc::restore_table(&mut tx, &deleted_name).await?;
    tx.commit().await.map_err(ApiError::from_sqlx)?;
    Ok(Json(serde_json::json!({ "restored": restored })))
}

#[derive(Deserialize)]
pub struct RealtimeQuery {
    pub table: Option<String>,
}

/// `GET /api/data/{slug}/realtime`: upgrades to an SSE stream (§4.6).
pub async fn realtime(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<RealtimeQuery>,
) -> Result<Sse<impl futures_util::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>>, ApiError> {
    let connect_url = acquire::direct_connect_url(&state.config, &ctx.project);
    state
        .realtime
        .subscribe(&ctx.project.slug, &connect_url, query.table)
        .await
        .map_err(|e| ApiError::forbidden(e.to_string()))
}

#[derive(Deserialize)]
pub struct RegisterDeviceRequest {
    pub token: String,
    pub platform: String,
    pub app_version: Option<String>,
}

const USER_DEVICES_TABLE: &str = "cascata_user_devices";
const NOTIFICATION_RULES_TABLE: &str = "cascata_notification_rules";

fn authenticated_user_id(ctx: &RequestContext) -> Result<String, ApiError> {
    ctx.authorisation
        .user_claims
        .as_ref()
        .map(|claims| claims.sub.clone())
        .ok_or_else(|| ApiError::unauthorized("an authenticated user is required"))
}

/// `POST /api/data/{slug}/push/devices`: registers (or reactivates) the caller's device token.
pub async fn register_device(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<RegisterDeviceRequest>,
) -> Result<axum::http::StatusCode, ApiError> {
    let user_id = authenticated_user_id(&ctx)?;
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, false).await?;
    sqlx::query(&format!(
        "INSERT INTO {USER_DEVICES_TABLE} (user_id, token, platform, app_version, is_active) \
         VALUES ($1, $2, $3, $4, true) \
         ON CONFLICT (token) DO UPDATE SET is_active = true, user_id = EXCLUDED.user_id, \
         platform = EXCLUDED.platform, app_version = EXCLUDED.app_version"
    ))
    .bind(&user_id)
    .bind(&body.token)
    .bind(&body.platform)
    .bind(&body.app_version)
    .execute(&pool.pool)
    .await
    .map_err(ApiError::from_sqlx)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct SendPushRequest {
    pub user_id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: Value,
}

/// `POST /api/data/{slug}/push/send`: service-role only, enqueues a [`PushJob`] rather than
/// delivering synchronously (§4.7 "never send synchronously").
pub async fn send_push(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<SendPushRequest>,
) -> Result<axum::http::StatusCode, ApiError> {
    require_service_role(&ctx)?;
    let selector = cascata_core::project::PoolSelector::resolve(&ctx.project, false);
    let job = PushJob {
        project_slug: ctx.project.slug.clone(),
        user_id: body.user_id,
        notification: PushNotification {
            title: body.title,
            body: body.body,
            data: body.data,
        },
        db_selector: DbSelector::from(&selector),
    };
    let payload = serde_json::to_value(&job).map_err(ApiError::internal)?;
    state
        .queue
        .publish(PUSH_QUEUE, payload, Utc::now())
        .await
        .map_err(ApiError::internal)?;
    Ok(axum::http::StatusCode::ACCEPTED)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RuleBody {
    pub table: String,
    pub event: String,
    pub recipient_column: String,
    pub title_template: String,
    pub body_template: String,
    #[serde(default)]
    pub conditions: Value,
    #[serde(default)]
    pub data_payload: Value,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// `GET /api/data/{slug}/push/rules`
pub async fn list_rules(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Vec<Value>>, ApiError> {
    require_service_role(&ctx)?;
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, true).await?;
    let rows = sqlx::query(&format!(
        "SELECT id, table_name, event, recipient_column, title_template, body_template, \
         conditions, data_payload, active FROM {NOTIFICATION_RULES_TABLE} ORDER BY table_name"
    ))
    .fetch_all(&pool.pool)
    .await
    .map_err(ApiError::from_sqlx)?;
    Ok(Json(rows.iter().map(row_to_json_public).collect()))
}

fn row_to_json_public(row: &sqlx::postgres::PgRow) -> Value {
    use sqlx::Row;
    let mut map = Map::new();
    if let Ok(id) = row.try_get::<Uuid, _>("id") {
        map.insert("id".into(), Value::String(id.to_string()));
    }
    for col in ["table_name", "event", "recipient_column", "title_template", "body_template"] {
        if let Ok(v) = row.try_get::<String, _>(col) {
            map.insert(col.to_string(), Value::String(v));
        }
    }
    for col in ["conditions", "data_payload"] {
        if let Ok(v) = row.try_get::<Value, _>(col) {
            map.insert(col.to_string(), v);
        }
    }
    if let Ok(active) = row.try_get::<bool, _>("active") {
        map.insert("active".into(), Value::Bool(active));
    }
    Value::Object(map)
}

/// `POST /api/data/{slug}/push/rules`
pub async fn create_rule(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<RuleBody>,
) -> Result<Json<Value>, ApiError> {
    require_service_role(&ctx)?;
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, false).await?;
    let id = Uuid::new_v4();
    sqlx::query(&format!(
        "INSERT INTO {NOTIFICATION_RULES_TABLE} \
         (id, table_name, event, recipient_column, title_template, body_template, conditions, data_payload, active) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
    ))
    .bind(id)
    .bind(&body.table)
    .bind(&body.event)
    .bind(&body.recipient_column)
    .bind(&body.title_template)
    .bind(&body.body_template)
    .bind(&body.conditions)
    .bind(&body.data_payload)
    .bind(body.active)
    .execute(&pool.pool)
    .await
    .map_err(ApiError::from_sqlx)?;
    Ok(Json(serde_json::json!({ "id": id })))
}

/// `DELETE /api/data/{slug}/push/rules/{id}`
pub async fn delete_rule(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((_slug, id)): Path<(String, Uuid)>,
) -> Result<axum::http::StatusCode, ApiError> {
    require_service_role(&ctx)?;
    let pool = acquire::acquire(&state.pool_registry, &state.config, &ctx.project, false).await?;
    sqlx::query(&format!("DELETE FROM {NOTIFICATION_RULES_TABLE} WHERE id = $1"))
        .bind(id)
        .execute(&pool.pool)
        .await
        .map_err(ApiError::from_sqlx)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn healthz() -> axum::http::StatusCode {
    axum::http::StatusCode::OK
}

/// `GET /readyz`: also verifies the control database is reachable, per §10.6.
pub async fn readyz(State(state): State<AppState>) -> Result<axum::http::StatusCode, ApiError> {
    sqlx::query("SELECT 1")
        .execute(&state.control_pool)
        .await
        .map_err(ApiError::from_sqlx)?;
    Ok(axum::http::StatusCode::OK)
}
