//! The authorisation state machine (§4.3.1): resolves `(bearer, apikey, Project, path)` to a
//! role. First match wins — in particular the admin and service-key checks must run before the
//! JWT verification attempt, since a malformed bearer that happens to equal a key string should
//! never be handed to the JWT decoder.

use cascata_core::jwt::{verify_tenant_token, AdminSigner, TenantUserClaims};
use cascata_core::project::{Project, ProjectSecrets};

use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    ServiceRole,
    Anon,
    Authenticated,
}

impl Role {
    /// The RLS GUC value for `SET LOCAL role = <role>`.
    pub fn guc_value(&self) -> &'static str {
        match self {
            Role::ServiceRole => "service_role",
            Role::Anon => "anon",
            Role::Authenticated => "authenticated",
        }
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::ServiceRole)
    }
}

#[derive(Debug, Clone)]
pub struct Authorisation {
    pub role: Role,
    pub user_claims: Option<TenantUserClaims>,
}

/// Paths that accept anonymous access even without a key, because they *are* the auth flow
/// (OAuth callback, passwordless, refresh, challenge, ...).
const AUTH_FLOW_ALLOW_LIST: &[&str] = &[
    "/auth/callback",
    "/auth/passwordless",
    "/auth/refresh",
    "/auth/challenge",
];

pub struct AuthInputs<'a> {
    pub bearer: Option<&'a str>,
    pub apikey: Option<&'a str>,
    pub path: &'a str,
    pub is_verified_admin: bool,
}

pub fn authorise(
    inputs: &AuthInputs<'_>,
    _project: &Project,
    secrets: &ProjectSecrets,
) -> Result<Authorisation, ApiError> {
    if inputs.is_verified_admin {
        return Ok(Authorisation {
            role: Role::ServiceRole,
            user_claims: None,
        });
    }

    if let Some(bearer) = inputs.bearer {
        if constant_time_eq(bearer, &secrets.service_key) {
            return Ok(Authorisation {
                role: Role::ServiceRole,
                user_claims: None,
            });
        }
        if constant_time_eq(bearer, &secrets.anon_key) {
            return Ok(Authorisation {
                role: Role::Anon,
                user_claims: None,
            });
        }
    }

    if let Some(apikey) = inputs.apikey {
        if constant_time_eq(apikey, &secrets.service_key) {
            return Ok(Authorisation {
                role: Role::ServiceRole,
                user_claims: None,
            });
        }
    }

    if let Some(bearer) = inputs.bearer {
        if let Ok(claims) = verify_tenant_token(bearer, &secrets.jwt_secret) {
            return Ok(Authorisation {
                role: Role::Authenticated,
                user_claims: Some(claims),
            });
        }
    }

    if let Some(apikey) = inputs.apikey {
        if constant_time_eq(apikey, &secrets.anon_key) {
            return Ok(Authorisation {
                role: Role::Anon,
                user_claims: None,
            });
        }
    }

    if AUTH_FLOW_ALLOW_LIST.iter().any(|p| inputs.path.starts_with(p)) {
        return Ok(Authorisation {
            role: Role::Anon,
            user_claims: None,
        });
    }

    Err(ApiError::unauthorized("missing or invalid credentials"))
}

/// True if `header` proves the caller is an admin under the process-wide admin secret.
pub fn is_verified_admin(bearer: Option<&str>, admin_signer: &AdminSigner) -> bool {
    bearer
        .map(|token| admin_signer.verify(token).is_ok())
        .unwrap_or(false)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascata_core::project::{ProjectMetadata, ProjectStatus};
    use chrono::Utc;
    use uuid::Uuid;

    fn project() -> Project {
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
            metadata: ProjectMetadata::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn secrets() -> ProjectSecrets {
        ProjectSecrets {
            anon_key: "anon-123".into(),
            service_key: "service-456".into(),
            jwt_secret: "jwt-secret".into(),
        }
    }

    #[test]
    fn admin_verification_wins_first() {
        let inputs = AuthInputs {
            bearer: None,
            apikey: None,
            path: "/api/data/acme/customers",
            is_verified_admin: true,
        };
        let auth = authorise(&inputs, &project(), &secrets()).unwrap();
        assert_eq!(auth.role, Role::ServiceRole);
    }

    #[test]
    fn bearer_service_key_grants_service_role() {
        let inputs = AuthInputs {
            bearer: Some("service-456"),
            apikey: None,
            path: "/api/data/acme/customers",
            is_verified_admin: false,
        };
        let auth = authorise(&inputs, &project(), &secrets()).unwrap();
        assert_eq!(auth.role, Role::ServiceRole);
    }

    #[test]
    fn bearer_anon_key_grants_anon_role() {
        let inputs = AuthInputs {
            bearer: Some("anon-123"),
            apikey: None,
            path: "/api/data/acme/customers",
            is_verified_admin: false,
        };
        let auth = authorise(&inputs, &project(), &secrets()).unwrap();
        assert_eq!(auth.role, Role::Anon);
    }

    #[test]
    fn auth_flow_allow_list_grants_anon_without_any_key() {
        let inputs = AuthInputs {
            bearer: None,
            apikey: None,
            path: "/auth/refresh",
            is_verified_admin: false,
        };
        let auth = authorise(&inputs, &project(), &secrets()).unwrap();
        assert_eq!(auth.role, Role::Anon);
    }

    #[test]
    fn no_matching_credential_is_unauthorized() {
        let inputs = AuthInputs {
            bearer: Some("garbage"),
            apikey: None,
            path: "/api/data/acme/customers",
            is_verified_admin: false,
        };
        assert!(authorise(&inputs, &project(), &secrets()).is_err());
    }
}
