//! The tenant record and its semi-structured metadata bag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Paused,
    Deleted,
}

/// A tenant ("project") record from the control database.
///
/// Secrets are stored encrypted at rest (see [`crate::secrets`]) and are decrypted eagerly by
/// the tenant directory on a successful lookup, never persisted decrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub slug: String,
    pub display_name: String,
    pub db_name: String,
    pub custom_hostname: Option<String>,
    pub status: ProjectStatus,
    pub blocklist: Vec<String>,

    /// Ciphertext as stored; callers should prefer `decrypt_secrets`.
    pub anon_key_encrypted: String,
    pub service_key_encrypted: String,
    pub jwt_secret_encrypted: String,

    pub metadata: ProjectMetadata,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Decrypted secret material for a single project. Never logged; `Debug` is hand-written to
/// redact every field.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProjectSecrets {
    pub anon_key: String,
    pub service_key: String,
    pub jwt_secret: String,
}

impl fmt::Debug for ProjectSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectSecrets")
            .field("anon_key", &"<redacted>")
            .field("service_key", &"<redacted>")
            .field("jwt_secret", &"<redacted>")
            .finish()
    }
}

use std::fmt;

/// An allowed CORS origin: a bare string (always echoed when it matches) or a record requiring
/// an authenticated caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AllowedOrigin {
    Bare(String),
    Scoped { url: String, require_auth: bool },
}

impl AllowedOrigin {
    pub fn url(&self) -> &str {
        match self {
            AllowedOrigin::Bare(url) => url,
            AllowedOrigin::Scoped { url, .. } => url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSizing {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    10
}
fn default_idle_timeout_seconds() -> u64 {
    300
}
fn default_statement_timeout_ms() -> u64 {
    15_000
}

impl Default for PoolSizing {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
            statement_timeout_ms: default_statement_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityMetadata {
    pub max_json_size: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushCredentials {
    pub fcm_project_id: Option<String>,
    /// The FCM service-account key, itself stored encrypted by the same at-rest cipher as the
    /// project secrets; decrypted only at push-dispatch time.
    pub fcm_service_account_key_encrypted: Option<String>,
}

/// The `metadata` bag described in the data model: a semi-structured document with a typed
/// surface for recognised keys and an opaque passthrough for everything else, so that writers
/// can validate before persisting without the document schema becoming a migration hazard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMetadata {
    #[serde(default)]
    pub pool: PoolSizing,
    pub external_primary_url: Option<String>,
    pub replica_url: Option<String>,
    #[serde(default)]
    pub allowed_origins: Vec<AllowedOrigin>,
    #[serde(default)]
    pub schema_exposure: bool,
    #[serde(default)]
    pub security: SecurityMetadata,
    #[serde(default)]
    pub push: PushCredentials,

    /// Unrecognised keys, preserved verbatim across a read-modify-write cycle.
    #[serde(flatten)]
    pub extra: std::collections::BTreeMap<String, Value>,
}

impl Default for ProjectMetadata {
    fn default() -> Self {
        Self {
            pool: PoolSizing::default(),
            external_primary_url: None,
            replica_url: None,
            allowed_origins: Vec::new(),
            schema_exposure: false,
            security: SecurityMetadata::default(),
            push: PushCredentials::default(),
            extra: std::collections::BTreeMap::new(),
        }
    }
}

impl Project {
    /// True when the project's primary database lives outside the platform (a "BYOD"/ejected
    /// tenant), i.e. exactly one of {internal db_name, external primary URL} is effective.
    pub fn is_ejected(&self) -> bool {
        self.metadata.external_primary_url.is_some()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, ProjectStatus::Active)
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for Project {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> sqlx::Result<Self> {
        use sqlx::Row;
        let status_str: String = row.try_get("status")?;
        let status = match status_str.as_str() {
            "active" => ProjectStatus::Active,
            "paused" => ProjectStatus::Paused,
            _ => ProjectStatus::Deleted,
        };
        let metadata_json: Value = row.try_get("metadata")?;
        let metadata = serde_json::from_value(metadata_json).unwrap_or_default();
        Ok(Project {
            id: row.try_get("id")?,
            slug: row.try_get("slug")?,
            display_name: row.try_get("display_name")?,
            db_name: row.try_get("db_name")?,
            custom_hostname: row.try_get("custom_hostname")?,
            status,
            blocklist: row.try_get("blocklist")?,
            anon_key_encrypted: row.try_get("anon_key_encrypted")?,
            service_key_encrypted: row.try_get("service_key_encrypted")?,
            jwt_secret_encrypted: row.try_get("jwt_secret_encrypted")?,
            metadata,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Selects which physical database a request should use, resolved once per request from the
/// project record and the HTTP method (read vs. write), per the "ejected / external tenants"
/// design note: a single helper centralises the primary/replica/external decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolSelector {
    /// `"{db}_direct"` or `"{db}_pooled"`.
    Internal { db_name: String, direct: bool },
    /// `"ext_{db}_{connection_string_hash_prefix}"`.
    External { db_name: String, connection_string: String },
}

impl PoolSelector {
    /// Resolve `(Project, is_read)` to a selector, following the precedence in §4.3: external
    /// primary first, then replica for reads, then the internal pool.
    pub fn resolve(project: &Project, is_read: bool) -> Self {
        if let Some(url) = &project.metadata.external_primary_url {
            return PoolSelector::External {
                db_name: project.db_name.clone(),
                connection_string: url.clone(),
            };
        }
        if is_read {
            if let Some(url) = &project.metadata.replica_url {
                return PoolSelector::External {
                    db_name: project.db_name.clone(),
                    connection_string: url.clone(),
                };
            }
        }
        PoolSelector::Internal {
            db_name: project.db_name.clone(),
            direct: false,
        }
    }

    /// The pool-registry cache key for this selector (see §4.2 Keying).
    pub fn cache_key(&self) -> String {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        match self {
            PoolSelector::Internal { db_name, direct } => {
                format!("{db_name}_{}", if *direct { "direct" } else { "pooled" })
            }
            PoolSelector::External {
                db_name,
                connection_string,
            } => {
                let encoded = STANDARD.encode(connection_string.as_bytes());
                let prefix: String = encoded.chars().take(10).collect();
                format!("ext_{db_name}_{prefix}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_with(metadata: ProjectMetadata) -> Project {
        Project {
            id: Uuid::nil(),
            slug: "acme".into(),
            display_name: "Acme".into(),
            db_name: "acme_db".into(),
            custom_hostname: None,
            status: ProjectStatus::Active,
            blocklist: Vec::new(),
            anon_key_encrypted: String::new(),
            service_key_encrypted: String::new(),
            jwt_secret_encrypted: String::new(),
            metadata,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn selector_prefers_external_primary_regardless_of_method() {
        let project = project_with(ProjectMetadata {
            external_primary_url: Some("postgres://ext/db".into()),
            ..ProjectMetadata::default()
        });
        assert_eq!(
            PoolSelector::resolve(&project, true),
            PoolSelector::External {
                db_name: "acme_db".into(),
                connection_string: "postgres://ext/db".into(),
            }
        );
        assert_eq!(
            PoolSelector::resolve(&project, false),
            PoolSelector::External {
                db_name: "acme_db".into(),
                connection_string: "postgres://ext/db".into(),
            }
        );
    }

    #[test]
    fn selector_uses_replica_only_for_reads() {
        let project = project_with(ProjectMetadata {
            replica_url: Some("postgres://replica/db".into()),
            ..ProjectMetadata::default()
        });
        assert_eq!(
            PoolSelector::resolve(&project, true),
            PoolSelector::External {
                db_name: "acme_db".into(),
                connection_string: "postgres://replica/db".into(),
            }
        );
        assert_eq!(
            PoolSelector::resolve(&project, false),
            PoolSelector::Internal {
                db_name: "acme_db".into(),
                direct: false,
            }
        );
    }

    #[test]
    fn internal_cache_key_has_no_external_prefix() {
        let project = project_with(ProjectMetadata::default());
        let selector = PoolSelector::resolve(&project, false);
        assert_eq!(selector.cache_key(), "acme_db_pooled");
    }
}
