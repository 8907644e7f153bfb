//! Wire types for the exam backend. Field names are snake_case on the wire.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub phone: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub phone: &'a str,
    pub password: &'a str,
    pub verification_code: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct SendCodeRequest<'a> {
    pub phone: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SendCodeResponse {
    pub expires_in: u32,
}

/// Body of both the login and the register response.
#[derive(Debug, Deserialize)]
pub(crate) struct AuthResponse {
    pub user_id: String,
    pub phone: String,
    #[serde(default)]
    pub role: Option<String>,
    pub token: String,
}

/// The signed-in user, as returned to callers. The token stays in the token store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: String,
    pub phone: String,
    pub role: Option<String>,
}

/// Where a generated report can be downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMeta {
    pub html_url: String,
    #[serde(default)]
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub generated_at: Option<String>,
}

/// Receipt for an uploaded exam image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamUpload {
    pub exam_id: String,
    pub status: String,
    /// Expected processing time in seconds
    #[serde(default)]
    pub estimated_time: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Processing progress of an uploaded exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamStatusInfo {
    pub exam_id: String,
    pub status: String,
    /// 0-100
    pub progress: u32,
    #[serde(default)]
    pub current_step: Option<String>,
    /// Seconds left, when the server can tell
    #[serde(default, alias = "estimated_time")]
    pub estimated_remaining_time: Option<u32>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl ExamStatusInfo {
    pub fn is_completed(&self) -> bool {
        self.status == "COMPLETED"
    }

    /// Any of the `*_FAILED` pipeline states.
    pub fn is_failed(&self) -> bool {
        self.status.ends_with("FAILED")
    }
}

/// One exam as the backend describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamDetail {
    pub exam_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub original_image_url: Option<String>,
    #[serde(default)]
    pub processed_image_url: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub total_score: Option<i64>,
    #[serde(default)]
    pub exam_type: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub report_id: Option<String>,
}

/// A page of the signed-in user's exams, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamHistory {
    pub exams: Vec<ExamDetail>,
    /// All of the user's exams, not just this page
    pub total: u32,
}
