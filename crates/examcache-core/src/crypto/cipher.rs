use std::sync::Arc;

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use tracing::{debug, warn};

use super::KeyStore;

/// Nonce length (bytes) - 96 bits
pub const NONCE_LEN: usize = 12;

/// Poly1305 tag length (bytes)
pub const TAG_LEN: usize = 16;

/// Encrypts short secrets (bearer tokens) under a key that never leaves the key store.
#[derive(Clone)]
pub struct TokenCipher {
    keys: Arc<dyn KeyStore>,
}

impl TokenCipher {
    pub fn new(keys: Arc<dyn KeyStore>) -> Self {
        Self { keys }
    }

    /// Encrypt `plaintext` with a fresh random nonce, creating the key on first use.
    /// Returns base64(nonce || ciphertext || tag).
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let key = self.keys.load_or_create()?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(blob))
    }

    /// Decrypt a blob produced by `encrypt`.
    ///
    /// Returns `None` for anything that does not decrypt cleanly under the
    /// current key: bad base64, a blob too short to hold nonce and tag, a tag
    /// mismatch, non-UTF-8 plaintext, or no key at all. Never creates a key.
    pub fn decrypt(&self, blob: &str) -> Option<String> {
        let bytes = match STANDARD.decode(blob) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, "Ciphertext is not valid base64");
                return None;
            }
        };
        if bytes.len() < NONCE_LEN + TAG_LEN {
            debug!(len = bytes.len(), "Ciphertext too short");
            return None;
        }

        let key = match self.keys.load() {
            Ok(Some(key)) => key,
            Ok(None) => {
                debug!("No token key present, ciphertext is unreadable");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Failed to load token key");
                return None;
            }
        };

        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = match cipher.decrypt(Nonce::from_slice(nonce), ciphertext) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                debug!("Ciphertext failed authentication");
                return None;
            }
        };
        String::from_utf8(plaintext).ok()
    }

    /// Destroy the key. Everything encrypted so far becomes undecryptable.
    pub fn delete_key(&self) -> Result<()> {
        self.keys.delete()
    }
}
