//! Application configuration management.
//!
//! Holds the backend URL, request timeout, where local state lives, and which
//! key store protects the session token. Stored at
//! `~/.config/examcache/config.json`; a missing file means defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::utils::write_atomic;

/// Application name used for config/data directory paths
const APP_NAME: &str = "examcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default backend
const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// HTTP request timeout in seconds.
/// 30s allows for slow report generation while failing fast enough to fall back to cache.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Environment variable overriding `api_base_url`
pub const ENV_API_URL: &str = "EXAMCACHE_API_URL";

/// Environment variable carrying the passphrase for the passphrase key store
pub const ENV_KEY_PASSPHRASE: &str = "EXAMCACHE_KEY_PASSPHRASE";

/// Where the token encryption key is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyStoreKind {
    /// OS keychain
    #[default]
    Keyring,
    /// Argon2-derived from a passphrase plus an on-disk salt
    Passphrase,
    /// Process memory only; sessions do not survive a restart
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    /// Overrides the platform data directory
    pub data_dir: Option<PathBuf>,
    pub key_store: KeyStoreKind,
    /// When set, logs also go to a daily file here
    pub log_dir: Option<PathBuf>,
    pub last_phone: Option<String>,
    /// Never written to disk; supplied through the environment
    #[serde(skip)]
    pub key_passphrase: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            data_dir: None,
            key_store: KeyStoreKind::default(),
            log_dir: None,
            last_phone: None,
            key_passphrase: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        write_atomic(path, contents.as_bytes())
    }

    /// Apply `EXAMCACHE_API_URL` and `EXAMCACHE_KEY_PASSPHRASE` from the environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(ENV_API_URL).ok(),
            std::env::var(ENV_KEY_PASSPHRASE).ok(),
        );
    }

    pub fn apply_overrides(&mut self, api_url: Option<String>, passphrase: Option<String>) {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url;
        }
        if let Some(passphrase) = passphrase.filter(|p| !p.is_empty()) {
            self.key_passphrase = Some(passphrase);
        }
    }

    /// Record `phone` as the last one used. Only that field changes in the
    /// saved file; overrides applied to an in-memory copy are not persisted.
    pub fn remember_phone(phone: &str) -> Result<()> {
        Self::remember_phone_at(&Self::config_path()?, phone)
    }

    pub fn remember_phone_at(path: &Path, phone: &str) -> Result<()> {
        let mut stored = Self::load_from(path)?;
        stored.last_phone = Some(phone.to_string());
        stored.save_to(path)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }
}
