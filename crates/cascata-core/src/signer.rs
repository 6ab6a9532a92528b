//! Webhook HMAC signing and the FCM OAuth assertion minted from a service-account key.
//!
//! Both are pure, I/O-free crypto operations so they live beside the rest of the shared core;
//! the surrounding HTTP exchange (POSTing to the tenant endpoint, exchanging the assertion for a
//! bearer token at `oauth2.googleapis.com/token`) lives in the job workers that actually need a
//! network stack.

use chrono::Utc;
use hmac::{Hmac, Mac};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// `hex(HMAC-SHA256(secret, body))`, the `X-Cascata-Signature` header value (§6 "Webhook wire").
pub fn hmac_sign_hex(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| Error::msg(e.to_string()))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Minimal shape of a Google service-account JSON key, enough to mint the self-signed assertion
/// described in §4.7 ("Exchange a JWT (RS256 signed with the project's FCM service-account key,
/// `scope = firebase.messaging`, `aud = oauth2.googleapis.com/token`, 1-hour expiry)").
#[derive(Debug, Clone, Deserialize)]
pub struct FcmServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
}

#[derive(Debug, Serialize)]
struct FcmAssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: usize,
    exp: usize,
}

/// Mints the RS256 self-signed JWT that is later exchanged for a short-lived FCM OAuth bearer.
pub fn mint_fcm_assertion(key: &FcmServiceAccountKey) -> Result<String> {
    let now = Utc::now().timestamp();
    let claims = FcmAssertionClaims {
        iss: key.client_email.clone(),
        scope: "https://www.googleapis.com/auth/firebase.messaging".into(),
        aud: "https://oauth2.googleapis.com/token".into(),
        iat: now as usize,
        exp: (now + 3600) as usize,
    };

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| Error::from(anyhow::Error::from(e)))?;
    encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|e| Error::from(anyhow::Error::from(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_signature_is_deterministic_hex() {
        let a = hmac_sign_hex("secret", b"{\"hello\":\"world\"}").unwrap();
        let b = hmac_sign_hex("secret", b"{\"hello\":\"world\"}").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hmac_signature_changes_with_secret() {
        let a = hmac_sign_hex("secret-a", b"payload").unwrap();
        let b = hmac_sign_hex("secret-b", b"payload").unwrap();
        assert_ne!(a, b);
    }
}
