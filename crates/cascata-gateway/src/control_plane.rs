//! Admin/control-plane routes (§6): project lifecycle, key rotation, and blocklist management.
//! Every handler here requires a verified admin bearer token except the two auth endpoints; that
//! check lives in [`crate::pipeline::run`], run before the router ever dispatches into this module.

use axum::extract::{Path, State};
use axum::Json;
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use cascata_core::project::{Project, ProjectMetadata, ProjectStatus};
use cascata_core::secrets::SecretCipher;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
}

/// `POST /control/auth/login`: bcrypt-verifies the single operator password and issues a 12 h
/// admin JWT.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let valid = bcrypt::verify(&body.password, &state.config.admin_password_hash)
        .map_err(ApiError::internal)?;
    if !valid {
        return Err(ApiError::unauthorized("invalid admin password"));
    }
    let token = state.admin_signer.issue("admin").map_err(ApiError::internal)?;
    Ok(Json(LoginResponse { token }))
}

#[derive(Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
}

/// `POST /control/auth/verify`: cheap token-liveness check for the admin UI.
pub async fn verify(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Json<VerifyResponse> {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let valid = crate::auth::is_verified_admin(bearer, &state.admin_signer);
    Json(VerifyResponse { valid })
}

#[derive(Serialize)]
pub struct ProjectSummary {
    pub id: Uuid,
    pub slug: String,
    pub display_name: String,
    pub db_name: String,
    pub custom_hostname: Option<String>,
    pub status: ProjectStatus,
}

impl From<&Project> for ProjectSummary {
    fn from(p: &Project) -> Self {
        Self {
            id: p.id,
            slug: p.slug.clone(),
            display_name: p.display_name.clone(),
            db_name: p.db_name.clone(),
            custom_hostname: p.custom_hostname.clone(),
            status: p.status,
        }
    }
}

const PROJECT_COLUMNS: &str = "id, slug, display_name, db_name, custom_hostname, status, blocklist, \
     anon_key_encrypted, service_key_encrypted, jwt_secret_encrypted, metadata, created_at, updated_at";

/// `GET /control/projects`
pub async fn list_projects(State(state): State<AppState>) -> Result<Json<Vec<ProjectSummary>>, ApiError> {
    let projects: Vec<Project> = sqlx::query_as(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects WHERE status != 'deleted' ORDER BY created_at"
    ))
    .fetch_all(&state.control_pool)
    .await
    .map_err(ApiError::from_sqlx)?;
    Ok(Json(projects.iter().map(ProjectSummary::from).collect()))
}

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub slug: String,
    pub display_name: String,
    pub db_name: String,
}

fn random_key_hex() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `POST /control/projects`: provisions a project record with freshly generated keys. Physical
/// database/schema creation is out of scope for the HTTP handler (§1 Non-goals: no bundled
/// migration runner for tenant schemas); it records the intended `db_name` for the pool registry.
pub async fn create_project(
    State(state): State<AppState>,
    Json(body): Json<CreateProjectRequest>,
) -> Result<Json<ProjectSummary>, ApiError> {
    let cipher = SecretCipher::from_base64(&state.config.sys_secret).map_err(ApiError::internal)?;
    let anon_key = random_key_hex();
    let service_key = random_key_hex();
    let jwt_secret = random_key_hex();

    let metadata = serde_json::to_value(ProjectMetadata::default()).map_err(ApiError::internal)?;

    let project: Project = sqlx::query_as(&format!(
        "INSERT INTO projects (slug, display_name, db_name, status, blocklist, \
         anon_key_encrypted, service_key_encrypted, jwt_secret_encrypted, metadata) \
         VALUES ($1, $2, $3, 'active', '{{}}', $4, $5, $6, $7) RETURNING {PROJECT_COLUMNS}"
    ))
    .bind(&body.slug)
    .bind(&body.display_name)
    .bind(&body.db_name)
    .bind(cipher.encrypt(&anon_key).map_err(ApiError::internal)?)
    .bind(cipher.encrypt(&service_key).map_err(ApiError::internal)?)
    .bind(cipher.encrypt(&jwt_secret).map_err(ApiError::internal)?)
    .bind(metadata)
    .fetch_one(&state.control_pool)
    .await
    .map_err(ApiError::from_sqlx)?;

    Ok(Json(ProjectSummary::from(&project)))
}

async fn load_project(state: &AppState, slug: &str) -> Result<Project, ApiError> {
    sqlx::query_as(&format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE slug = $1"))
        .bind(slug)
        .fetch_optional(&state.control_pool)
        .await
        .map_err(ApiError::from_sqlx)?
        .ok_or_else(|| ApiError::not_found("unknown project"))
}

/// `GET /control/projects/{slug}`
pub async fn get_project(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<ProjectSummary>, ApiError> {
    let project = load_project(&state, &slug).await?;
    Ok(Json(ProjectSummary::from(&project)))
}

#[derive(Deserialize)]
pub struct UpdateProjectRequest {
    pub display_name: Option<String>,
    pub custom_hostname: Option<String>,
    pub status: Option<ProjectStatus>,
}

/// `PATCH /control/projects/{slug}`
pub async fn update_project(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<UpdateProjectRequest>,
) -> Result<Json<ProjectSummary>, ApiError> {
    let existing = load_project(&state, &slug).await?;
    let display_name = body.display_name.unwrap_or(existing.display_name);
    let custom_hostname = body.custom_hostname.or(existing.custom_hostname);
    let status = body.status.unwrap_or(existing.status);
    let status_str = match status {
        ProjectStatus::Active => "active",
        ProjectStatus::Paused => "paused",
        ProjectStatus::Deleted => "deleted",
    };

    let project: Project = sqlx::query_as(&format!(
        "UPDATE projects SET display_name = $1, custom_hostname = $2, status = $3, updated_at = now() \
         WHERE slug = $4 RETURNING {PROJECT_COLUMNS}"
    ))
    .bind(&display_name)
    .bind(&custom_hostname)
    .bind(status_str)
    .bind(&slug)
    .fetch_one(&state.control_pool)
    .await
    .map_err(ApiError::from_sqlx)?;

    state.pool_registry.close(&project.db_name).await;
    Ok(Json(ProjectSummary::from(&project)))
}

/// `DELETE /control/projects/{slug}`: soft-deletes (status = `deleted`) and drops any live pools
/// for the tenant.
pub async fn delete_project(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<axum::http::StatusCode, ApiError> {
    let project = load_project(&state, &slug).await?;
    sqlx::query("UPDATE projects SET status = 'deleted', updated_at = now() WHERE slug = $1")
        .bind(&slug)
        .execute(&state.control_pool)
        .await
        .map_err(ApiError::from_sqlx)?;
    state.pool_registry.close(&project.db_name).await;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct RotateKeysRequest {
    #[serde(rename = "type")]
    pub key_type: String,
}

#[derive(Serialize)]
pub struct RotateKeysResponse {
    pub rotated: String,
}

/// `POST /control/projects/{slug}/rotate-keys`
pub async fn rotate_keys(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<RotateKeysRequest>,
) -> Result<Json<RotateKeysResponse>, ApiError> {
    let cipher = SecretCipher::from_base64(&state.config.sys_secret).map_err(ApiError::internal)?;
    let new_key = random_key_hex();
    let encrypted = cipher.encrypt(&new_key).map_err(ApiError::internal)?;

    let column = match body.key_type.as_str() {
        "anon" => "anon_key_encrypted",
        "service" => "service_key_encrypted",
        "jwt" => "jwt_secret_encrypted",
        other => return Err(ApiError::validation(format!("unknown key type `{other}`"))),
    };

    let sql = format!("UPDATE projects SET {column} = $1, updated_at = now() WHERE slug = $2");
    let result = sqlx::query(&sql)
        .bind(&encrypted)
        .bind(&slug)
        .execute(&state.control_pool)
        .await
        .map_err(ApiError::from_sqlx)?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("unknown project"));
    }

    Ok(Json(RotateKeysResponse {
        rotated: body.key_type,
    }))
}

#[derive(Deserialize)]
pub struct RevealKeyRequest {
    #[serde(rename = "type")]
    pub key_type: String,
    pub admin_password: String,
}

#[derive(Serialize)]
pub struct RevealKeyResponse {
    pub key: String,
}

/// `POST /control/projects/{slug}/reveal-key`: requires re-verifying the admin password even
/// though the caller already holds an admin bearer token — revealing plaintext secret material
/// is a higher bar than routine admin actions.
pub async fn reveal_key(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<RevealKeyRequest>,
) -> Result<Json<RevealKeyResponse>, ApiError> {
    let valid = bcrypt::verify(&body.admin_password, &state.config.admin_password_hash)
        .map_err(ApiError::internal)?;
    if !valid {
        return Err(ApiError::unauthorized("invalid admin password"));
    }

    let project = load_project(&state, &slug).await?;
    let cipher = SecretCipher::from_base64(&state.config.sys_secret).map_err(ApiError::internal)?;
    let encrypted = match body.key_type.as_str() {
        "anon" => &project.anon_key_encrypted,
        "service" => &project.service_key_encrypted,
        "jwt" => &project.jwt_secret_encrypted,
        other => return Err(ApiError::validation(format!("unknown key type `{other}`"))),
    };
    let key = cipher.decrypt(encrypted).map_err(ApiError::internal)?;
    Ok(Json(RevealKeyResponse { key }))
}

#[derive(Deserialize)]
pub struct BlockIpRequest {
    pub ip: String,
}

/// `POST /control/projects/{slug}/block-ip`
pub async fn block_ip(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<BlockIpRequest>,
) -> Result<axum::http::StatusCode, ApiError> {
    sqlx::query(
        "UPDATE projects SET blocklist = array_append(blocklist, $1), updated_at = now() \
         WHERE slug = $2 AND NOT ($1 = ANY(blocklist))",
    )
    .bind(&body.ip)
    .bind(&slug)
    .execute(&state.control_pool)
    .await
    .map_err(ApiError::from_sqlx)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// `DELETE /control/projects/{slug}/block-ip/{ip}`
pub async fn unblock_ip(
    State(state): State<AppState>,
    Path((slug, ip)): Path<(String, String)>,
) -> Result<axum::http::StatusCode, ApiError> {
    sqlx::query(
        "UPDATE projects SET blocklist = array_remove(blocklist, $1), updated_at = now() WHERE slug = $2",
    )
    .bind(&ip)
    .bind(&slug)
    .execute(&state.control_pool)
    .await
    .map_err(ApiError::from_sqlx)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct ProjectExport {
    pub slug: String,
    pub display_name: String,
    pub db_name: String,
    pub custom_hostname: Option<String>,
    pub metadata: Value,
}

/// `GET /control/projects/{slug}/export`: a metadata snapshot (no secret material) suitable for
/// re-`import`ing into another environment.
pub async fn export_project(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<ProjectExport>, ApiError> {
    let project = load_project(&state, &slug).await?;
    Ok(Json(ProjectExport {
        slug: project.slug,
        display_name: project.display_name,
        db_name: project.db_name,
        custom_hostname: project.custom_hostname,
        metadata: serde_json::to_value(project.metadata).map_err(ApiError::internal)?,
    }))
}

/// `POST /control/projects/import/upload`: validates the export payload shape and returns a
/// token the operator must echo to `/import/confirm`.
pub async fn import_upload(Json(body): Json<ProjectExport>) -> Result<Json<serde_json::Value>, ApiError> {
    if body.slug.is_empty() || body.db_name.is_empty() {
        return Err(ApiError::validation("import payload missing slug or db_name"));
    }
    let token = Uuid::new_v4().to_string();
    Ok(Json(serde_json::json!({ "import_token": token })))
}

/// `POST /control/projects/import/confirm`: out of scope for the initial cut beyond staging —
/// applying a staged import requires provisioning the tenant's physical database, which this
/// process deliberately does not orchestrate (§1 Non-goals: "no bundled tenant-database
/// provisioning/migration runner").
pub async fn import_confirm() -> Result<axum::http::StatusCode, ApiError> {
    Err(ApiError::validation(
        "import confirmation requires out-of-band tenant database provisioning",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_key_hex_is_sixty_four_hex_chars() {
        let key = random_key_hex();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
