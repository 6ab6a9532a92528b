//! Symmetric at-rest encryption for project secrets (anon key, service key, jwt secret, and the
//! FCM service-account key) under the process-wide `SYS_SECRET`.
//!
//! Format: `base64(nonce || ciphertext || tag)` with a random 96-bit nonce per encryption and
//! AES-256-GCM as the AEAD.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;

use crate::{Error, Result};

const NONCE_LEN: usize = 12;

/// The process-wide symmetric key (`SYS_SECRET`), base64-encoded 32 bytes.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl SecretCipher {
    pub fn from_base64(key_b64: &str) -> Result<Self> {
        let key_bytes = STANDARD
            .decode(key_b64)
            .map_err(|e| Error::msg(format!("invalid SYS_SECRET encoding: {e}")))?;
        if key_bytes.len() != 32 {
            return Err(Error::msg(format!(
                "SYS_SECRET must decode to 32 bytes, got {}",
                key_bytes.len()
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&key_bytes);
        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| Error::msg(format!("invalid encryption key: {e}")))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::msg(format!("secret encryption failed: {e}")))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(&combined))
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| Error::msg(format!("invalid encryption key: {e}")))?;

        let combined = STANDARD
            .decode(encrypted)
            .map_err(|e| Error::msg(format!("invalid ciphertext encoding: {e}")))?;
        if combined.len() < NONCE_LEN {
            return Err(Error::msg("ciphertext too short"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| Error::msg(format!("secret decryption failed: {e}")))?;

        String::from_utf8(plaintext).map_err(|e| Error::msg(format!("invalid secret encoding: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> SecretCipher {
        let key = [7u8; 32];
        SecretCipher::from_base64(&STANDARD.encode(key)).unwrap()
    }

    #[test]
    fn round_trips_a_secret() {
        let cipher = test_cipher();
        let ciphertext = cipher.encrypt("anon-key-plaintext").unwrap();
        assert_ne!(ciphertext, "anon-key-plaintext");
        assert_eq!(cipher.decrypt(&ciphertext).unwrap(), "anon-key-plaintext");
    }

    #[test]
    fn each_encryption_uses_a_fresh_nonce() {
        let cipher = test_cipher();
        let a = cipher.encrypt("same-plaintext").unwrap();
        let b = cipher.encrypt("same-plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_keys_of_the_wrong_length() {
        assert!(SecretCipher::from_base64(&STANDARD.encode([1u8; 16])).is_err());
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let cipher = test_cipher();
        let mut ciphertext = STANDARD.decode(cipher.encrypt("secret").unwrap()).unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        assert!(cipher.decrypt(&STANDARD.encode(ciphertext)).is_err());
    }
}
