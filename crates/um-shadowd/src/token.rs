//! Opaque pagination tokens for shadow listing.
//!
//! A token is AES-256-GCM over `offset:thingName` with a random nonce,
//! base64url-encoded. Decoding checks that the thing baked into the
//! token matches the requesting thing, so a token cannot be replayed
//! against another thing's listing.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

use um_protocol::errors::ShadowError;

const NONCE_LEN: usize = 12;

fn invalid_token() -> ShadowError {
    ShadowError::InvalidArguments("Invalid nextToken".into())
}

/// Encrypts and decrypts listing continuation tokens.
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Cipher with a random per-process key. Tokens do not survive a
    /// restart, which is fine for pagination.
    pub fn new() -> Self {
        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self::from_key(&key)
    }

    pub fn from_key(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    pub fn encode(&self, thing_name: &str, offset: u32) -> Result<String, ShadowError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let plaintext = format!("{offset}:{thing_name}");
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| ShadowError::Service("failed to seal nextToken".into()))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(combined))
    }

    /// Decode a token, requiring it to belong to `thing_name`.
    pub fn decode(&self, token: &str, thing_name: &str) -> Result<u32, ShadowError> {
        let combined = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid_token())?;
        if combined.len() <= NONCE_LEN {
            return Err(invalid_token());
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| invalid_token())?;
        let plaintext = String::from_utf8(plaintext).map_err(|_| invalid_token())?;

        let (offset, token_thing) = plaintext.split_once(':').ok_or_else(invalid_token)?;
        if token_thing != thing_name {
            return Err(invalid_token());
        }
        offset.parse().map_err(|_| invalid_token())
    }
}

impl Default for TokenCipher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let cipher = TokenCipher::new();
        let token = cipher.encode("gw-01", 25).unwrap();
        assert_eq!(cipher.decode(&token, "gw-01").unwrap(), 25);
    }

    #[test]
    fn token_is_opaque() {
        let cipher = TokenCipher::new();
        let token = cipher.encode("gw-01", 25).unwrap();
        assert!(!token.contains("gw-01"));
    }

    #[test]
    fn wrong_thing_rejected() {
        let cipher = TokenCipher::new();
        let token = cipher.encode("gw-01", 25).unwrap();
        let err = cipher.decode(&token, "gw-02").unwrap_err();
        assert_eq!(err, ShadowError::InvalidArguments("Invalid nextToken".into()));
    }

    #[test]
    fn garbage_rejected() {
        let cipher = TokenCipher::new();
        assert!(cipher.decode("not-a-token", "gw-01").is_err());
        assert!(cipher.decode("", "gw-01").is_err());
        assert!(cipher.decode("AAAA", "gw-01").is_err());
    }

    #[test]
    fn tokens_from_another_key_rejected() {
        let a = TokenCipher::new();
        let b = TokenCipher::new();
        let token = a.encode("gw-01", 10).unwrap();
        assert!(b.decode(&token, "gw-01").is_err());
    }
}
