//! Dynamic per-project CORS (§4.3 "dynamic CORS"): unlike `tower_http::cors::CorsLayer`, which
//! is configured once at startup, the allowed origin set lives in `project.metadata.allowed_origins`
//! and can differ per tenant, so the decision is made by hand against the resolved project rather
//! than a static layer.

use axum::http::{HeaderMap, HeaderValue};

use cascata_core::project::{AllowedOrigin, Project};

use crate::auth::Role;

const ALLOWED_METHODS: &str = "GET, POST, PATCH, DELETE, OPTIONS";
const ALLOWED_HEADERS: &str = "authorization, apikey, content-type, prefer, range, x-client-info";
const EXPOSED_HEADERS: &str = "content-range, x-total-count";

/// Picks the `Access-Control-Allow-Origin` value for this request, or `None` if the origin is not
/// permitted. An empty `allowed_origins` list only ever echoes loopback origins, matching the
/// directory's development posture for hostname resolution.
pub fn allowed_origin<'a>(project: &'a Project, origin: &'a str, role: Option<&Role>) -> Option<&'a str> {
    if project.metadata.allowed_origins.is_empty() {
        return is_loopback_origin(origin).then_some(origin);
    }
    project
        .metadata
        .allowed_origins
        .iter()
        .find(|allowed| allowed.url() == origin)
        .and_then(|allowed| match allowed {
            AllowedOrigin::Bare(_) => Some(origin),
            AllowedOrigin::Scoped { require_auth, .. } => {
                let authenticated = role.map(|r| !matches!(r, Role::Anon)).unwrap_or(false);
                (!require_auth || authenticated).then_some(origin)
            }
        })
}

fn is_loopback_origin(origin: &str) -> bool {
    let host = origin
        .split("://")
        .nth(1)
        .unwrap_or(origin)
        .split(['/', ':'])
        .next()
        .unwrap_or("");
    host == "localhost" || host == "127.0.0.1" || host == "::1"
}

/// Applies the CORS response headers in place once an origin has been approved.
pub fn apply_headers(headers: &mut HeaderMap, origin: &str) {
    if let Ok(value) = HeaderValue::from_str(origin) {
        headers.insert("access-control-allow-origin", value);
    }
    headers.insert("access-control-allow-credentials", HeaderValue::from_static("true"));
    headers.insert("access-control-allow-methods", HeaderValue::from_static(ALLOWED_METHODS));
    headers.insert("access-control-allow-headers", HeaderValue::from_static(ALLOWED_HEADERS));
    headers.insert("access-control-expose-headers", HeaderValue::from_static(EXPOSED_HEADERS));
    headers.insert("vary", HeaderValue::from_static("origin"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascata_core::project::ProjectMetadata;
    use cascata_core::project::ProjectStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn project_with(allowed_origins: Vec<AllowedOrigin>) -> Project {
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
            metadata: ProjectMetadata {
                allowed_origins,
                ..ProjectMetadata::default()
            },
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn empty_allow_list_only_echoes_loopback() {
        let project = project_with(Vec::new());
        assert_eq!(allowed_origin(&project, "http://localhost:3000", None), Some("http://localhost:3000"));
        assert_eq!(allowed_origin(&project, "https://evil.example", None), None);
    }

    #[test]
    fn bare_origin_is_always_echoed() {
        let project = project_with(vec![AllowedOrigin::Bare("https://app.acme.com".into())]);
        assert_eq!(
            allowed_origin(&project, "https://app.acme.com", None),
            Some("https://app.acme.com")
        );
    }

    #[test]
    fn scoped_origin_requires_authenticated_role() {
        let project = project_with(vec![AllowedOrigin::Scoped {
            url: "https://partner.example".into(),
            require_auth: true,
        }]);
        assert_eq!(allowed_origin(&project, "https://partner.example", Some(&Role::Anon)), None);
        assert_eq!(
            allowed_origin(&project, "https://partner.example", Some(&Role::Authenticated)),
            Some("https://partner.example")
        );
    }
}
