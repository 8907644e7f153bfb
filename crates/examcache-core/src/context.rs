//! The explicitly constructed owner of every component.
//!
//! Build one `ExamContext` at start-up with `init`, hand references to the
//! code that needs them, and call `shutdown` on the way out. Nothing in the
//! crate is a global.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use reqwest::Client;
use tokio::sync::broadcast;
use tracing::info;

use crate::api::{ApiClient, AuthorizedClient};
use crate::auth::{SessionEvent, SessionEvents, TokenStore};
use crate::cache::{FileReportStore, ReportCache};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, KeyStoreKind, ENV_KEY_PASSPHRASE};
use crate::crypto::{KeyStore, KeyringKeyStore, MemoryKeyStore, PassphraseKeyStore, TokenCipher};
use crate::upload::UploadQueue;

/// Salt file for the passphrase key store, in the data directory
const KEY_SALT_FILE: &str = "token.key";

pub struct ExamContext {
    config: Config,
    data_dir: PathBuf,
    clock: Arc<dyn Clock>,
    tokens: Arc<TokenStore>,
    events: SessionEvents,
    api: ApiClient,
    reports: ReportCache<ApiClient>,
    uploads: UploadQueue<ApiClient>,
}

impl ExamContext {
    /// Build a context on the system clock with the key store named in `config`.
    pub fn init(config: Config) -> Result<Self> {
        let data_dir = config.data_dir()?;
        let keys: Arc<dyn KeyStore> = match config.key_store {
            KeyStoreKind::Keyring => Arc::new(KeyringKeyStore::new()?),
            KeyStoreKind::Passphrase => {
                let passphrase = config.key_passphrase.clone().ok_or_else(|| {
                    anyhow::anyhow!(
                        "Passphrase key store selected but {} is not set",
                        ENV_KEY_PASSPHRASE
                    )
                })?;
                Arc::new(PassphraseKeyStore::new(data_dir.join(KEY_SALT_FILE), passphrase))
            }
            KeyStoreKind::Memory => Arc::new(MemoryKeyStore::new()),
        };
        Self::with_parts(config, Arc::new(SystemClock), keys)
    }

    /// Build a context from explicit parts.
    pub fn with_parts(config: Config, clock: Arc<dyn Clock>, keys: Arc<dyn KeyStore>) -> Result<Self> {
        let data_dir = config.data_dir()?;
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let tokens = Arc::new(TokenStore::new(
            data_dir.clone(),
            TokenCipher::new(keys),
            clock.clone(),
        ));
        let events = SessionEvents::new();

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        let http = AuthorizedClient::new(client, tokens.clone(), events.clone());
        let api = ApiClient::new(http, &config.api_base_url)?;

        let store = Arc::new(FileReportStore::new(&data_dir)?);
        let reports = ReportCache::new(api.clone(), store, clock.clone());
        let uploads = UploadQueue::new(api.clone(), &data_dir, clock.clone())?;

        info!(data_dir = %data_dir.display(), api = %config.api_base_url, "Context initialised");
        Ok(Self {
            config,
            data_dir,
            clock,
            tokens,
            events,
            api,
            reports,
            uploads,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn reports(&self) -> &ReportCache<ApiClient> {
        &self.reports
    }

    pub fn uploads(&self) -> &UploadQueue<ApiClient> {
        &self.uploads
    }

    /// Listen for "session expired" (a 401 from the backend).
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Delete an exam on the server, then its cached report.
    pub async fn delete_exam(&self, exam_id: &str) -> Result<()> {
        self.api
            .delete_exam(exam_id)
            .await
            .with_context(|| format!("Failed to delete exam {}", exam_id))?;
        self.reports.remove_report(exam_id)?;
        info!(exam_id, "Exam deleted");
        Ok(())
    }

    /// Tear down: sweep expired reports and release everything.
    pub fn shutdown(self) -> Result<()> {
        let removed = self.reports.clear_expired_cache()?;
        info!(removed, "Context shut down");
        Ok(())
    }
}
