//! Admin and tenant JWT issuance/verification.
//!
//! Both token kinds are `HS256`. Admin tokens are signed under the process-wide
//! `SYSTEM_JWT_SECRET` with a single key; tenant user tokens are signed under the project's own
//! `jwt_secret`, decrypted per-request by the tenant directory. Key rotation for the admin
//! secret follows the current/next overlap window used throughout this stack: a token signed
//! under either key verifies, so operators can rotate without invalidating sessions mid-flight.

use chrono::Utc;
use jsonwebtoken::{
    decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminClaims {
    pub role: String,
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

/// Issues and verifies the `HS256` admin bearer token described in §6 ("Admin tokens"): claims
/// `{role:"admin", sub, exp}`, 12 h default lifetime.
pub struct AdminSigner {
    current_kid: String,
    next_kid: Option<String>,
    ttl: Duration,
    current_encoding_key: EncodingKey,
    current_decoding_key: DecodingKey,
    next_decoding_key: Option<DecodingKey>,
}

impl AdminSigner {
    pub fn new(
        secret: &str,
        current_kid: String,
        next: Option<(String, String)>,
        ttl: Duration,
    ) -> Self {
        let (next_kid, next_decoding_key) = match next {
            Some((kid, secret)) => (Some(kid), Some(DecodingKey::from_secret(secret.as_bytes()))),
            None => (None, None),
        };
        Self {
            current_kid,
            next_kid,
            ttl,
            current_encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            current_decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            next_decoding_key,
        }
    }

    pub fn issue(&self, sub: &str) -> Result<String> {
        let now = Utc::now().timestamp();
        let iat: usize = now.try_into().unwrap_or(0);
        let exp: usize = (now + i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX))
            .try_into()
            .unwrap_or(usize::MAX);

        let claims = AdminClaims {
            role: "admin".into(),
            sub: sub.to_string(),
            exp,
            iat,
        };

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.current_kid.clone());
        let token = encode(&header, &claims, &self.current_encoding_key)
            .map_err(|e| Error::from(anyhow::Error::from(e)))?;
        Ok(token)
    }

    /// Verifies the token and returns the claims when it proves the caller is an admin.
    pub fn verify(&self, token: &str) -> Result<AdminClaims> {
        let header = decode_header(token).map_err(|e| Error::from(anyhow::Error::from(e)))?;
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| Error::msg("missing jwt kid"))?;

        let decoding_key = if kid == self.current_kid {
            &self.current_decoding_key
        } else if self.next_kid.as_deref() == Some(kid) {
            self.next_decoding_key
                .as_ref()
                .ok_or_else(|| Error::msg("next admin jwt key not configured"))?
        } else {
            return Err(Error::msg("invalid admin jwt kid"));
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        let data = decode::<AdminClaims>(token, decoding_key, &validation)
            .map_err(|e| Error::from(anyhow::Error::from(e)))?;
        if data.claims.role != "admin" {
            return Err(Error::msg("token does not carry the admin role"));
        }
        Ok(data.claims)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantUserClaims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Verifies a tenant user JWT against the project's own `jwt_secret` (§4.3.1: `bearer verifies
/// under project.jwt_secret → authenticated`). Tenant tokens are never issued by this process —
/// they arrive from whatever auth provider the tenant wired up — so only `verify` is exposed.
pub fn verify_tenant_token(token: &str, jwt_secret: &str) -> Result<TenantUserClaims> {
    let decoding_key = DecodingKey::from_secret(jwt_secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    validation.validate_aud = false;
    let data = decode::<TenantUserClaims>(token, &decoding_key, &validation)
        .map_err(|e| Error::from(anyhow::Error::from(e)))?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> AdminSigner {
        AdminSigner::new(
            "test-secret",
            "k1".into(),
            Some(("k2".into(), "next-secret".into())),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn issue_then_verify_round_trips() {
        let signer = signer();
        let token = signer.issue("operator@example.com").unwrap();
        let claims = signer.verify(&token).unwrap();
        assert_eq!(claims.role, "admin");
        assert_eq!(claims.sub, "operator@example.com");
    }

    #[test]
    fn verify_accepts_next_key_during_rotation() {
        let signer = signer();
        let rotated = AdminSigner::new("next-secret", "k2".into(), None, Duration::from_secs(3600));
        let token = rotated.issue("operator@example.com").unwrap();
        assert!(signer.verify(&token).is_ok());
    }

    #[test]
    fn verify_rejects_unknown_kid() {
        let signer = signer();
        let other = AdminSigner::new("other-secret", "k3".into(), None, Duration::from_secs(3600));
        let token = other.issue("operator@example.com").unwrap();
        assert!(signer.verify(&token).is_err());
    }

    #[test]
    fn tenant_token_verifies_under_project_secret() {
        let claims = TenantUserClaims {
            sub: "user-1".into(),
            exp: (Utc::now().timestamp() + 3600) as usize,
            iat: Utc::now().timestamp() as usize,
            role: Some("authenticated".into()),
            extra: serde_json::Map::new(),
        };
        let header = Header::new(Algorithm::HS256);
        let token = encode(
            &header,
            &claims,
            &EncodingKey::from_secret(b"tenant-secret"),
        )
        .unwrap();
        let verified = verify_tenant_token(&token, "tenant-secret").unwrap();
        assert_eq!(verified.sub, "user-1");
        assert!(verify_tenant_token(&token, "wrong-secret").is_err());
    }
}
