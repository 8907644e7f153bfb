//! Local report cache for offline viewing.
//!
//! This module provides:
//! - `ReportStore` / `FileReportStore`: one JSON file per exam under `reports/`
//! - `ReportCache`: cache-first reads with a rolling 7-day expiry, falling
//!   back to any cached copy (even an expired one) when the server cannot
//!   be reached

pub mod report;
pub mod store;

pub use report::{ReportCache, ReportSource, REPORT_TTL_DAYS};
pub use store::{CachedReport, FileReportStore, ReportStore};
