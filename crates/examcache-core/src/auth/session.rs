use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::crypto::TokenCipher;
use crate::utils::{remove_if_exists, write_atomic};

/// Session file name in the data directory
const SESSION_FILE: &str = "session.json";

/// Lifetime granted to a token on login or registration.
/// The backend issues week-long tokens and does not report an expiry itself.
pub const SESSION_TTL_DAYS: i64 = 7;

/// What is persisted for a logged-in user. The token itself is only ever
/// stored encrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub encrypted_token: String,
    pub expires_at_ms: i64,
    pub user_id: String,
    pub phone: String,
}

impl SessionRecord {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at_ms
    }

    pub fn time_until_expiry(&self, now_ms: i64) -> Duration {
        Duration::milliseconds(self.expires_at_ms - now_ms)
    }
}

/// Encrypted bearer-token storage with expiry.
pub struct TokenStore {
    data_dir: PathBuf,
    cipher: TokenCipher,
    clock: Arc<dyn Clock>,
}

impl TokenStore {
    pub fn new(data_dir: PathBuf, cipher: TokenCipher, clock: Arc<dyn Clock>) -> Self {
        Self {
            data_dir,
            cipher,
            clock,
        }
    }

    /// Expiry for a session created now.
    pub fn default_expiry_ms(&self) -> i64 {
        self.clock.now_ms() + Duration::days(SESSION_TTL_DAYS).num_milliseconds()
    }

    /// Encrypt and persist a session, replacing any previous one in a single write.
    pub fn save_session(
        &self,
        token: &str,
        expires_at_ms: i64,
        user_id: &str,
        phone: &str,
    ) -> Result<()> {
        let record = SessionRecord {
            encrypted_token: self.cipher.encrypt(token)?,
            expires_at_ms,
            user_id: user_id.to_string(),
            phone: phone.to_string(),
        };
        let contents = serde_json::to_vec_pretty(&record)?;
        write_atomic(&self.session_path(), &contents).context("Failed to save session")?;
        debug!(user_id = %record.user_id, expires_at_ms, "Session saved");
        Ok(())
    }

    /// The bearer token, if a non-expired session exists and decrypts.
    /// An expired session is purged on the way out.
    pub fn get_token(&self) -> Option<String> {
        let record = self.load_record()?;
        if record.is_expired(self.clock.now_ms()) {
            info!(user_id = %record.user_id, "Session expired, clearing");
            if let Err(e) = self.clear() {
                warn!(error = %e, "Failed to clear expired session");
            }
            return None;
        }
        let token = self.cipher.decrypt(&record.encrypted_token);
        if token.is_none() {
            warn!("Stored token could not be decrypted");
        }
        token
    }

    /// Whether a non-expired session exists. Only looks at the expiry; does not decrypt.
    pub fn is_valid(&self) -> bool {
        self.load_record()
            .map(|r| !r.is_expired(self.clock.now_ms()))
            .unwrap_or(false)
    }

    /// The stored session if it has not expired.
    pub fn session(&self) -> Option<SessionRecord> {
        self.load_record()
            .filter(|r| !r.is_expired(self.clock.now_ms()))
    }

    pub fn user_id(&self) -> Option<String> {
        self.session().map(|r| r.user_id)
    }

    pub fn phone(&self) -> Option<String> {
        self.session().map(|r| r.phone)
    }

    /// Delete the session and destroy the token key. Safe to call repeatedly.
    pub fn clear(&self) -> Result<()> {
        let removed = remove_if_exists(&self.session_path())?;
        self.cipher.delete_key()?;
        if removed {
            info!("Session cleared");
        }
        Ok(())
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn load_record(&self) -> Option<SessionRecord> {
        let path = self.session_path();
        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read session file");
                return None;
            }
        };
        match serde_json::from_slice(&contents) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Failed to parse session file, treating as logged out");
                None
            }
        }
    }

    fn session_path(&self) -> PathBuf {
        self.data_dir.join(SESSION_FILE)
    }
}
