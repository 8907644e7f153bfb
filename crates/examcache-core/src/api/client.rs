//! API client for the exam backend.
//!
//! This module provides the `ApiClient` struct for logging in, uploading and
//! looking up exams, fetching report locations and bodies, and deleting exams. All calls to the backend
//! go through `AuthorizedClient`, so they carry the stored bearer token.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::cache::ReportSource;
use crate::upload::ExamUploader;

use super::models::{
    AuthResponse, AuthUser, ExamDetail, ExamHistory, ExamStatusInfo, ExamUpload, LoginRequest,
    RegisterRequest, ReportMeta, SendCodeRequest, SendCodeResponse,
};
use super::{ApiError, AuthorizedClient};

// ============================================================================
// Constants
// ============================================================================

/// Path prefix of every backend endpoint
const API_PREFIX: &str = "api/v1/";

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Multipart field carrying the exam image
const UPLOAD_FIELD: &str = "file";

/// The backend rejects images above 10 MiB
const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Largest history page the backend serves
const MAX_HISTORY_LIMIT: u32 = 100;

#[derive(Clone)]
pub struct ApiClient {
    http: AuthorizedClient,
    base_url: Url,
    initial_backoff: Duration,
}

impl ApiClient {
    /// Create a client for the backend at `base_url` (scheme and host, optionally a path).
    pub fn new(http: AuthorizedClient, base_url: &str) -> Result<Self> {
        let root = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&root)
            .and_then(|u| u.join(API_PREFIX))
            .with_context(|| format!("Invalid API base URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("API base URL cannot carry a path: {}", base_url);
        }
        Ok(Self {
            http,
            base_url,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// Override the first rate-limit backoff step (doubles on each retry).
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn http(&self) -> &AuthorizedClient {
        &self.http
    }

    // ===== Authentication =====

    /// Log in with phone and password, persisting the session for seven days.
    pub async fn login(&self, phone: &str, password: &str) -> Result<AuthUser> {
        let url = self.endpoint(&["auth", "login"]);
        let auth: AuthResponse = self
            .send_json(Method::POST, url, &LoginRequest { phone, password })
            .await
            .context("Login failed")?;
        self.store_session(auth)
    }

    /// Register a new account and sign it in.
    pub async fn register(
        &self,
        phone: &str,
        password: &str,
        verification_code: &str,
    ) -> Result<AuthUser> {
        let url = self.endpoint(&["auth", "register"]);
        let body = RegisterRequest {
            phone,
            password,
            verification_code,
        };
        let auth: AuthResponse = self
            .send_json(Method::POST, url, &body)
            .await
            .context("Registration failed")?;
        self.store_session(auth)
    }

    /// Ask the backend to text a verification code. Returns its validity in seconds.
    pub async fn send_verification_code(&self, phone: &str) -> Result<u32> {
        let url = self.endpoint(&["auth", "send-code"]);
        let response: SendCodeResponse = self
            .send_json(Method::POST, url, &SendCodeRequest { phone })
            .await
            .context("Failed to request verification code")?;
        Ok(response.expires_in)
    }

    /// Forget the session and its key.
    pub fn logout(&self) -> Result<()> {
        self.http.tokens().clear()
    }

    fn store_session(&self, auth: AuthResponse) -> Result<AuthUser> {
        let tokens = self.http.tokens();
        tokens.save_session(
            &auth.token,
            tokens.default_expiry_ms(),
            &auth.user_id,
            &auth.phone,
        )?;
        info!(user_id = %auth.user_id, "Signed in");
        Ok(AuthUser {
            user_id: auth.user_id,
            phone: auth.phone,
            role: auth.role,
        })
    }

    // ===== Exams =====

    /// Upload an exam image for grading. One attempt; retrying is up to the caller
    /// (see `UploadQueue`).
    pub async fn upload_exam(&self, image: &Path) -> Result<ExamUpload, ApiError> {
        let size = tokio::fs::metadata(image)
            .await
            .map_err(|e| ApiError::InvalidRequest(format!("Cannot read {}: {}", image.display(), e)))?
            .len();
        if size > MAX_UPLOAD_BYTES {
            return Err(ApiError::InvalidRequest(format!(
                "{} is {} bytes, the limit is {}",
                image.display(),
                size,
                MAX_UPLOAD_BYTES
            )));
        }
        let bytes = tokio::fs::read(image)
            .await
            .map_err(|e| ApiError::InvalidRequest(format!("Cannot read {}: {}", image.display(), e)))?;
        let file_name = image
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("exam.jpg")
            .to_string();
        let mime = image_mime(image);

        let url = self.endpoint(&["exams", "upload"]);
        debug!(image = %image.display(), size, "Uploading exam");
        let response = self
            .try_execute(|| {
                let part = Part::bytes(bytes.clone())
                    .file_name(file_name.clone())
                    .mime_str(mime)?;
                let form = Form::new()
                    .part(UPLOAD_FIELD, part)
                    .text("device_info", concat!("examcache/", env!("CARGO_PKG_VERSION")));
                Ok(self.http.request(Method::POST, url.as_str()).multipart(form))
            })
            .await?;
        let upload: ExamUpload = Self::parse_json(response).await?;
        info!(exam_id = %upload.exam_id, "Exam uploaded");
        Ok(upload)
    }

    /// Where an uploaded exam is in the grading pipeline.
    pub async fn fetch_exam_status(&self, exam_id: &str) -> Result<ExamStatusInfo, ApiError> {
        self.get_json(self.endpoint(&["exams", exam_id, "status"])).await
    }

    pub async fn fetch_exam_detail(&self, exam_id: &str) -> Result<ExamDetail, ApiError> {
        self.get_json(self.endpoint(&["exams", exam_id])).await
    }

    /// A page of the user's exams, newest first. `limit` is capped at 100.
    pub async fn fetch_exam_history(&self, skip: u32, limit: u32) -> Result<ExamHistory, ApiError> {
        let mut url = self.endpoint(&["exams", "history"]);
        url.query_pairs_mut()
            .append_pair("skip", &skip.to_string())
            .append_pair("limit", &limit.min(MAX_HISTORY_LIMIT).to_string());
        self.get_json(url).await
    }

    // ===== Reports =====

    /// Where the report for `exam_id` can be downloaded.
    pub async fn fetch_report_meta(&self, exam_id: &str) -> Result<ReportMeta, ApiError> {
        self.get_json(self.endpoint(&["reports", exam_id])).await
    }

    /// Download a report body. Relative URLs resolve against the backend host.
    /// The request is sent without credentials since report links may point
    /// at a third-party storage host.
    pub async fn fetch_html(&self, url: &str) -> Result<String, ApiError> {
        let url = self
            .base_url
            .join(url)
            .map_err(|e| ApiError::InvalidResponse(format!("Bad report URL {}: {}", url, e)))?;
        debug!(url = %url, "Fetching report body");

        let response = self.http.plain().get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }
        let html = response.text().await?;
        if html.is_empty() {
            return Err(ApiError::InvalidResponse("Empty report body".to_string()));
        }
        Ok(html)
    }

    /// Delete an exam on the server.
    pub async fn delete_exam(&self, exam_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["exams", exam_id]);
        self.execute(|| self.http.request(Method::DELETE, url.as_str()))
            .await?;
        Ok(())
    }

    // ===== Plumbing =====

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // `new` rejected cannot-be-a-base URLs, so this always succeeds
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let response = self
            .execute(|| self.http.request(Method::GET, url.as_str()))
            .await?;
        Self::parse_json(response).await
    }

    async fn send_json<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        method: Method,
        url: Url,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self
            .execute(|| self.http.request(method.clone(), url.as_str()).json(body))
            .await?;
        Self::parse_json(response).await
    }

    /// Send through the authorizing decorator, retrying 429 with exponential
    /// backoff. Non-success statuses become `ApiError`.
    async fn execute(&self, build: impl Fn() -> RequestBuilder) -> Result<Response, ApiError> {
        self.try_execute(|| Ok(build())).await
    }

    /// `execute` for requests whose construction can fail.
    async fn try_execute(
        &self,
        build: impl Fn() -> Result<RequestBuilder, ApiError>,
    ) -> Result<Response, ApiError> {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let response = self.http.send(build()?).await?;
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            if status == StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(url = %response.url(), retry = retries, backoff_ms = backoff.as_millis() as u64, "Rate limited, backing off");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                continue;
            }
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let url = response.url().clone();
        response.json().await.map_err(|e| {
            if e.is_decode() {
                ApiError::InvalidResponse(format!("Failed to parse JSON from {}: {}", url, e))
            } else {
                ApiError::from(e)
            }
        })
    }
}

/// Content type for an exam image, from its extension.
fn image_mime(image: &Path) -> &'static str {
    let ext = image
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("heic") => "image/heic",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl ReportSource for ApiClient {
    async fn fetch_report_meta(&self, exam_id: &str) -> Result<ReportMeta, ApiError> {
        ApiClient::fetch_report_meta(self, exam_id).await
    }

    async fn fetch_html(&self, url: &str) -> Result<String, ApiError> {
        ApiClient::fetch_html(self, url).await
    }
}

#[async_trait]
impl ExamUploader for ApiClient {
    async fn upload_exam(&self, image: &Path) -> Result<ExamUpload, ApiError> {
        ApiClient::upload_exam(self, image).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::auth::{SessionEvents, TokenStore};
    use crate::clock::SystemClock;
    use crate::crypto::{MemoryKeyStore, TokenCipher};
    use tempfile::TempDir;

    fn api(dir: &TempDir, base: &str) -> ApiClient {
        let tokens = TokenStore::new(
            dir.path().to_path_buf(),
            TokenCipher::new(Arc::new(MemoryKeyStore::new())),
            Arc::new(SystemClock),
        );
        let http = AuthorizedClient::new(reqwest::Client::new(), Arc::new(tokens), SessionEvents::new());
        ApiClient::new(http, base).expect("valid base url")
    }

    #[test]
    fn test_endpoint_joins_prefix_and_escapes_segments() {
        let dir = TempDir::new().expect("temp dir");

        let client = api(&dir, "https://exam.example.com");
        assert_eq!(
            client.endpoint(&["reports", "exam123"]).as_str(),
            "https://exam.example.com/api/v1/reports/exam123"
        );
        assert_eq!(
            client.endpoint(&["reports", "a/b c"]).as_str(),
            "https://exam.example.com/api/v1/reports/a%2Fb%20c"
        );

        // A base with its own path and trailing slash
        let client = api(&dir, "https://example.com/exam-ai/");
        assert_eq!(
            client.endpoint(&["auth", "login"]).as_str(),
            "https://example.com/exam-ai/api/v1/auth/login"
        );
    }

    #[test]
    fn test_image_mime() {
        assert_eq!(image_mime(Path::new("scan.JPG")), "image/jpeg");
        assert_eq!(image_mime(Path::new("/tmp/exam.png")), "image/png");
        assert_eq!(image_mime(Path::new("IMG_0001.heic")), "image/heic");
        assert_eq!(image_mime(Path::new("notes")), "application/octet-stream");
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let tokens = TokenStore::new(
            dir.path().to_path_buf(),
            TokenCipher::new(Arc::new(MemoryKeyStore::new())),
            Arc::new(SystemClock),
        );
        let http = AuthorizedClient::new(reqwest::Client::new(), Arc::new(tokens), SessionEvents::new());
        assert!(ApiClient::new(http, "not a url").is_err());
    }
}
