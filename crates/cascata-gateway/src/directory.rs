//! The tenant directory (§4.1): resolves a request to a `Project`, enforcing domain-locking and
//! the panic shield before the caller ever reaches authorisation.

use cascata_core::project::{Project, ProjectSecrets};
use cascata_core::secrets::SecretCipher;
use sqlx::PgPool;
use std::net::IpAddr;

use crate::error::ApiError;
use crate::panic_shield::PanicShield;

pub enum Resolution {
    Project {
        project: Project,
        secrets: ProjectSecrets,
    },
    ControlPlaneBypass,
}

const ADMIN_PATH_PREFIXES: &[&str] = &["/api/control/"];

pub fn is_control_path(path: &str) -> bool {
    ADMIN_PATH_PREFIXES.iter().any(|p| path.starts_with(p))
}

/// Extracts `{slug}` from a `/api/data/{slug}/...` path.
pub fn slug_from_data_path(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/api/data/")?;
    rest.split('/').next().filter(|s| !s.is_empty())
}

fn is_loopback_or_link_local(host: &str) -> bool {
    let host = host.split(':').next().unwrap_or(host);
    if host == "localhost" {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_loopback() || v4.is_link_local(),
        Ok(IpAddr::V6(v6)) => v6.is_loopback(),
        Err(_) => false,
    }
}

pub struct TenantDirectory {
    control_pool: PgPool,
    cipher: SecretCipher,
}

impl TenantDirectory {
    pub fn new(control_pool: PgPool, cipher: SecretCipher) -> Self {
        Self {
            control_pool,
            cipher,
        }
    }

    async fn load_by_slug(&self, slug: &str) -> Result<Option<Project>, ApiError> {
        sqlx::query_as::<_, Project>(
            "SELECT id, slug, display_name, db_name, custom_hostname, status, blocklist, \
             anon_key_encrypted, service_key_encrypted, jwt_secret_encrypted, metadata, \
             created_at, updated_at FROM projects WHERE slug = $1 AND status != 'deleted'",
        )
        .bind(slug)
        .fetch_optional(&self.control_pool)
        .await
        .map_err(ApiError::from_sqlx)
    }

    async fn load_by_hostname(&self, host: &str) -> Result<Option<Project>, ApiError> {
        sqlx::query_as::<_, Project>(
            "SELECT id, slug, display_name, db_name, custom_hostname, status, blocklist, \
             anon_key_encrypted, service_key_encrypted, jwt_secret_encrypted, metadata, \
             created_at, updated_at FROM projects WHERE custom_hostname = $1 AND status != 'deleted'",
        )
        .bind(host)
        .fetch_optional(&self.control_pool)
        .await
        .map_err(ApiError::from_sqlx)
    }

    fn decrypt(&self, project: &Project) -> Result<ProjectSecrets, ApiError> {
        Ok(ProjectSecrets {
            anon_key: self
                .cipher
                .decrypt(&project.anon_key_encrypted)
                .map_err(ApiError::internal)?,
            service_key: self
                .cipher
                .decrypt(&project.service_key_encrypted)
                .map_err(ApiError::internal)?,
            jwt_secret: self
                .cipher
                .decrypt(&project.jwt_secret_encrypted)
                .map_err(ApiError::internal)?,
        })
    }

    /// Implements the algorithm in §4.1: admin-path bypass, hostname lookup, slug-path lookup,
    /// domain-locking enforcement, and the panic shield.
    pub async fn resolve(
        &self,
        host: &str,
        url_path: &str,
        panic_shield: &PanicShield,
        is_verified_admin: bool,
    ) -> Result<Resolution, ApiError> {
        if is_control_path(url_path) {
            return Ok(Resolution::ControlPlaneBypass);
        }

        let host_is_dev = is_loopback_or_link_local(host);
        let mut resolved_via_host = false;
        let mut project = if !host_is_dev {
            let found = self.load_by_hostname(host).await?;
            resolved_via_host = found.is_some();
            found
        } else {
            None
        };

        if project.is_none() {
            let slug = slug_from_data_path(url_path)
                .ok_or_else(|| ApiError::not_found("no tenant in request path"))?;
            project = self.load_by_slug(slug).await?;
        }

        let project = project.ok_or_else(|| ApiError::not_found("unknown tenant"))?;

        // Domain-locking: a project with a custom hostname must be reached through it, not the
        // slug path, unless the caller is a verified admin or on a development loopback host.
        if project.custom_hostname.is_some()
            && !resolved_via_host
            && !is_verified_admin
            && !host_is_dev
        {
            return Err(ApiError::forbidden("domain-locking: use the custom hostname"));
        }

        if !is_verified_admin && panic_shield.is_panicked(&project.slug).await {
            return Err(ApiError::locked_down("project is locked down"));
        }

        let secrets = self.decrypt(&project)?;
        Ok(Resolution::Project { project, secrets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_paths_bypass_tenant_resolution() {
        assert!(is_control_path("/api/control/projects/acme"));
        assert!(!is_control_path("/api/data/acme/customers"));
    }

    #[test]
    fn slug_extraction_matches_data_path_shape() {
        assert_eq!(slug_from_data_path("/api/data/acme/customers"), Some("acme"));
        assert_eq!(slug_from_data_path("/api/data/acme"), Some("acme"));
        assert_eq!(slug_from_data_path("/api/control/projects"), None);
    }

    #[test]
    fn loopback_and_link_local_hosts_are_development_posture() {
        assert!(is_loopback_or_link_local("localhost"));
        assert!(is_loopback_or_link_local("127.0.0.1"));
        assert!(is_loopback_or_link_local("169.254.1.1"));
        assert!(!is_loopback_or_link_local("acme.example.com"));
    }
}
