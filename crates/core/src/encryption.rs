//! At-rest encryption for Reddit account secrets.
//!
//! Account rows store `client_secret` and `password` AES-256-GCM
//! encrypted under a master key supplied at process start. Scraper rows
//! never carry credentials, only an account handle.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as base64_engine, Engine};
use rand::Rng;
use std::env;

/// AES-256-GCM cipher for credential fields.
/// Ciphertext format: base64(nonce || ciphertext), 12-byte nonce.
#[derive(Clone)]
pub struct CredentialCipher {
    master_key: [u8; 32],
}

impl CredentialCipher {
    pub fn from_env() -> Result<Self> {
        let key_hex = env::var("ENCRYPTION_MASTER_KEY")
            .map_err(|_| anyhow!("ENCRYPTION_MASTER_KEY environment variable not set"))?;

        let key_bytes = hex::decode(&key_hex)
            .map_err(|_| anyhow!("ENCRYPTION_MASTER_KEY must be a 64-char hex string"))?;

        if key_bytes.len() != 32 {
            return Err(anyhow!(
                "ENCRYPTION_MASTER_KEY must be exactly 32 bytes (64 hex chars), got {}",
                key_bytes.len()
            ));
        }

        let mut master_key = [0u8; 32];
        master_key.copy_from_slice(&key_bytes);
        Ok(Self { master_key })
    }

    /// Generate a fresh random master key (initial setup / rotation).
    pub fn generate_master_key() -> String {
        let mut rng = rand::rng();
        let key: [u8; 32] = rng.random();
        hex::encode(key)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.master_key));

        let mut rng = rand::rng();
        let mut nonce_bytes = [0u8; 12];
        rng.fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("encryption failed: {}", e))?;

        let mut payload = nonce_bytes.to_vec();
        payload.extend_from_slice(&ciphertext);
        Ok(base64_engine.encode(&payload))
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.master_key));

        let payload = base64_engine
            .decode(encrypted)
            .map_err(|e| anyhow!("failed to decode base64: {}", e))?;

        if payload.len() < 12 {
            return Err(anyhow!("ciphertext shorter than its 12-byte nonce"));
        }

        let (nonce_bytes, ciphertext) = payload.split_at(12);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| anyhow!("decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| anyhow!("decrypted data is not UTF-8: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> CredentialCipher {
        let mut master_key = [0u8; 32];
        master_key[0] = 42;
        CredentialCipher { master_key }
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let cipher = test_cipher();
        let secret = "correct-horse-battery-staple";
        let encrypted = cipher.encrypt(secret).unwrap();
        assert_ne!(encrypted, secret);
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), secret);
    }

    #[test]
    fn nonces_differ_between_encryptions() {
        let cipher = test_cipher();
        let a = cipher.encrypt("secret").unwrap();
        let b = cipher.encrypt("secret").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_truncated_ciphertext() {
        let cipher = test_cipher();
        assert!(cipher.decrypt("AAAA").is_err());
        assert!(cipher.decrypt("not base64 at all!!").is_err());
    }

    #[test]
    fn generated_key_is_valid_hex() {
        let key = CredentialCipher::generate_master_key();
        assert_eq!(key.len(), 64);
        assert_eq!(hex::decode(&key).unwrap().len(), 32);
    }
}
