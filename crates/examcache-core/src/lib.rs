//! Core library for examcache.
//!
//! Provides the local half of the exam-report client:
//!
//! - `crypto`: token cipher over a pluggable key store
//! - `auth`: encrypted session store and session-expired broadcast
//! - `api`: authenticated HTTP client for the exam backend
//! - `cache`: report cache with stale-copy fallback
//! - `upload`: persistent exam upload queue with retry
//! - `context`: explicitly constructed owner of all of the above

pub mod api;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod crypto;
pub mod upload;
pub mod utils;

pub use api::{
    ApiClient, ApiError, AuthUser, AuthorizedClient, ExamDetail, ExamHistory, ExamStatusInfo, ExamUpload,
    ReportMeta,
};
pub use auth::{SessionEvent, SessionEvents, TokenStore};
pub use cache::{CachedReport, FileReportStore, ReportCache, ReportSource, ReportStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, KeyStoreKind};
pub use context::ExamContext;
pub use crypto::{KeyStore, KeyringKeyStore, MemoryKeyStore, PassphraseKeyStore, TokenCipher};
pub use upload::{ExamUploader, UploadJob, UploadQueue, UploadRun, UploadState, MAX_UPLOAD_ATTEMPTS};
