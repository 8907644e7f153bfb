//! REST API client module for the exam backend.
//!
//! This module provides:
//! - `AuthorizedClient`: attaches the stored bearer token to each request and
//!   invalidates the session when the server answers 401
//! - `ApiClient`: typed calls for auth, exam upload and lookup, reports, and
//!   exam deletion
//!
//! Every request carries an explicit timeout; a timeout is reported as
//! `ApiError::Timeout` and handled like any other network failure.

pub mod authorized;
pub mod client;
pub mod error;
pub mod models;

pub use authorized::AuthorizedClient;
pub use client::ApiClient;
pub use error::ApiError;
pub use models::{AuthUser, ExamDetail, ExamHistory, ExamStatusInfo, ExamUpload, ReportMeta};
