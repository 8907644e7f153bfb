use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use tracing::{debug, info, warn};

use crate::api::{ApiError, ReportMeta};
use crate::clock::Clock;

use super::{CachedReport, ReportStore};

/// How long a fetched report is served without asking the server again.
pub const REPORT_TTL_DAYS: i64 = 7;

/// Remote side of the report cache.
#[async_trait]
pub trait ReportSource: Send + Sync {
    /// `GET /reports/{exam_id}`: where the rendered report lives.
    async fn fetch_report_meta(&self, exam_id: &str) -> Result<ReportMeta, ApiError>;

    /// Plain `GET` of a report body.
    async fn fetch_html(&self, url: &str) -> Result<String, ApiError>;
}

/// Cache-first access to exam reports.
///
/// Reads serve a fresh cached copy without touching the network. When the
/// network is needed and fails, any cached copy is served instead, however
/// old; callers are not told the copy may be stale.
pub struct ReportCache<S> {
    source: S,
    store: Arc<dyn ReportStore>,
    clock: Arc<dyn Clock>,
}

impl<S: ReportSource> ReportCache<S> {
    pub fn new(source: S, store: Arc<dyn ReportStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            store,
            clock,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Report HTML for `exam_id`.
    ///
    /// Unless `force_refresh` is set, a cached entry that has not expired is
    /// returned directly. Otherwise the report is downloaded and cached for
    /// another seven days. If the download fails, the cached entry is returned
    /// even when expired; the error surfaces only when nothing is cached.
    pub async fn get_report_content(
        &self,
        exam_id: &str,
        force_refresh: bool,
    ) -> Result<String, ApiError> {
        if !force_refresh {
            match self.cached_report(exam_id) {
                Ok(Some(report)) if !report.is_expired(self.clock.now_ms()) => {
                    debug!(exam_id, "Serving report from cache");
                    return Ok(report.html_content);
                }
                Ok(Some(_)) => debug!(exam_id, "Cached report expired, refreshing"),
                Ok(None) => debug!(exam_id, "Report not cached, fetching"),
                Err(e) => warn!(exam_id, error = %e, "Failed to read report cache, fetching"),
            }
        }

        let error = match self.fetch_remote(exam_id).await {
            Ok(html) => {
                if let Err(e) = self.cache_report(exam_id, &html) {
                    warn!(exam_id, error = %e, "Failed to cache fetched report");
                }
                return Ok(html);
            }
            Err(e) => e,
        };

        match self.cached_report(exam_id) {
            Ok(Some(report)) => {
                warn!(
                    exam_id,
                    error = %error,
                    cached = %report.age_display(self.clock.now_ms()),
                    "Report fetch failed, serving cached copy"
                );
                Ok(report.html_content)
            }
            Ok(None) => Err(error),
            Err(e) => {
                warn!(exam_id, error = %e, "Failed to read report cache for fallback");
                Err(error)
            }
        }
    }

    /// Store `html` for `exam_id`, expiring seven days from now.
    pub fn cache_report(&self, exam_id: &str, html: &str) -> Result<()> {
        let report = CachedReport::new(
            exam_id,
            html,
            self.clock.now_ms(),
            Duration::days(REPORT_TTL_DAYS),
        );
        self.store.put(&report)?;
        debug!(exam_id, expires_at_ms = report.expires_at_ms, "Report cached");
        Ok(())
    }

    /// Whether a non-expired copy is cached. Storage errors count as "no".
    pub fn is_report_cached(&self, exam_id: &str) -> bool {
        match self.cached_report(exam_id) {
            Ok(Some(report)) => !report.is_expired(self.clock.now_ms()),
            Ok(None) => false,
            Err(e) => {
                debug!(exam_id, error = %e, "Failed to read report cache");
                false
            }
        }
    }

    /// The cached entry for `exam_id`, expired or not.
    pub fn cached_report(&self, exam_id: &str) -> Result<Option<CachedReport>> {
        // An entry recorded under another id is not ours, whatever the store returned
        Ok(self.store.get(exam_id)?.filter(|r| r.exam_id == exam_id))
    }

    /// Drop the cached copy of one report (after its exam is deleted).
    pub fn remove_report(&self, exam_id: &str) -> Result<()> {
        if self.store.remove(exam_id)? {
            debug!(exam_id, "Removed cached report");
        }
        Ok(())
    }

    /// Delete every entry whose expiry is at or before now. Returns how many went.
    pub fn clear_expired_cache(&self) -> Result<usize> {
        let removed = self.store.remove_expired(self.clock.now_ms())?;
        if removed > 0 {
            info!(removed, "Cleared expired reports");
        }
        Ok(removed)
    }

    /// Delete every cached report. Returns how many went.
    pub fn clear_all_cache(&self) -> Result<usize> {
        let removed = self.store.clear()?;
        info!(removed, "Cleared report cache");
        Ok(removed)
    }

    async fn fetch_remote(&self, exam_id: &str) -> Result<String, ApiError> {
        let meta = self.source.fetch_report_meta(exam_id).await?;
        self.source.fetch_html(&meta.html_url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::cache::FileReportStore;
    use crate::clock::ManualClock;
    use tempfile::TempDir;

    const T: i64 = 1_700_000_000_000;
    const HTML: &str = "<html><body>Cached Report</body></html>";

    /// Scripted remote: counts calls and fails on demand.
    #[derive(Default)]
    struct FakeSource {
        calls: AtomicUsize,
        fail: Mutex<bool>,
        html: Mutex<String>,
    }

    impl FakeSource {
        fn serving(html: &str) -> Self {
            let source = Self::default();
            *source.html.lock().unwrap() = html.to_string();
            source
        }

        fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReportSource for Arc<FakeSource> {
        async fn fetch_report_meta(&self, exam_id: &str) -> Result<ReportMeta, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail.lock().unwrap() {
                return Err(ApiError::ServerError("boom".to_string()));
            }
            Ok(ReportMeta {
                html_url: format!("/reports/{}.html", exam_id),
                pdf_url: None,
                generated_at: None,
            })
        }

        async fn fetch_html(&self, _url: &str) -> Result<String, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.html.lock().unwrap().clone())
        }
    }

    /// Store whose every operation fails.
    struct BrokenStore;

    impl ReportStore for BrokenStore {
        fn get(&self, _: &str) -> Result<Option<CachedReport>> {
            anyhow::bail!("Database error")
        }
        fn put(&self, _: &CachedReport) -> Result<()> {
            anyhow::bail!("Database error")
        }
        fn remove(&self, _: &str) -> Result<bool> {
            anyhow::bail!("Database error")
        }
        fn remove_expired(&self, _: i64) -> Result<usize> {
            anyhow::bail!("Database error")
        }
        fn clear(&self) -> Result<usize> {
            anyhow::bail!("Database error")
        }
    }

    /// Store that answers every lookup with the entry of one fixed exam.
    struct MisfiledStore(CachedReport);

    impl ReportStore for MisfiledStore {
        fn get(&self, _: &str) -> Result<Option<CachedReport>> {
            Ok(Some(self.0.clone()))
        }
        fn put(&self, _: &CachedReport) -> Result<()> {
            Ok(())
        }
        fn remove(&self, _: &str) -> Result<bool> {
            Ok(false)
        }
        fn remove_expired(&self, _: i64) -> Result<usize> {
            Ok(0)
        }
        fn clear(&self) -> Result<usize> {
            Ok(0)
        }
    }

    struct Fixture {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        source: Arc<FakeSource>,
        cache: ReportCache<Arc<FakeSource>>,
    }

    fn fixture(remote_html: &str) -> Fixture {
        let dir = TempDir::new().expect("temp dir");
        let clock = Arc::new(ManualClock::new(T));
        let source = Arc::new(FakeSource::serving(remote_html));
        let store = Arc::new(FileReportStore::new(dir.path()).expect("store"));
        let cache = ReportCache::new(source.clone(), store, clock.clone());
        Fixture {
            _dir: dir,
            clock,
            source,
            cache,
        }
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_network() -> Result<()> {
        let f = fixture("<html>remote</html>");
        f.cache.cache_report("exam123", HTML)?;
        f.clock.advance(Duration::days(1));

        assert_eq!(f.cache.get_report_content("exam123", false).await?, HTML);
        assert_eq!(f.source.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_cache_is_refreshed() -> Result<()> {
        let f = fixture("<html>remote</html>");
        f.cache.cache_report("exam123", HTML)?;
        f.clock.advance(Duration::days(8));

        assert_eq!(f.cache.get_report_content("exam123", false).await?, "<html>remote</html>");
        assert_eq!(f.source.calls(), 2);

        // The refresh restarted the seven-day window
        let entry = f.cache.cached_report("exam123")?.expect("entry");
        assert_eq!(entry.cached_at_ms, f.clock.now_ms());
        assert!(f.cache.is_report_cached("exam123"));
        Ok(())
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_fresh_cache() -> Result<()> {
        let f = fixture("<html>remote</html>");
        f.cache.cache_report("exam123", HTML)?;

        assert_eq!(f.cache.get_report_content("exam123", true).await?, "<html>remote</html>");
        assert_eq!(f.source.calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_failure_falls_back_to_expired_copy() -> Result<()> {
        let f = fixture("<html>remote</html>");
        f.cache.cache_report("exam123", HTML)?;
        f.clock.advance(Duration::days(8));
        f.source.set_failing(true);

        assert_eq!(f.cache.get_report_content("exam123", false).await?, HTML);
        // Fallback does not renew the entry
        assert!(!f.cache.is_report_cached("exam123"));
        Ok(())
    }

    #[tokio::test]
    async fn test_forced_refresh_failure_falls_back() -> Result<()> {
        let f = fixture("<html>remote</html>");
        f.cache.cache_report("exam123", HTML)?;
        f.source.set_failing(true);

        assert_eq!(f.cache.get_report_content("exam123", true).await?, HTML);
        Ok(())
    }

    #[tokio::test]
    async fn test_miss_and_failure_is_an_error() {
        let f = fixture("<html>remote</html>");
        f.source.set_failing(true);

        let result = f.cache.get_report_content("exam123", false).await;
        assert!(matches!(result, Err(ApiError::ServerError(_))));
    }

    #[tokio::test]
    async fn test_miss_fetches_and_caches() -> Result<()> {
        let f = fixture("<html>remote</html>");

        assert_eq!(f.cache.get_report_content("exam9", false).await?, "<html>remote</html>");
        assert!(f.cache.is_report_cached("exam9"));

        // Second read is served locally
        f.cache.get_report_content("exam9", false).await?;
        assert_eq!(f.source.calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_broken_store_still_serves_remote() -> Result<()> {
        let source = Arc::new(FakeSource::serving("<html>remote</html>"));
        let cache = ReportCache::new(source, Arc::new(BrokenStore), Arc::new(ManualClock::new(T)));

        assert_eq!(cache.get_report_content("e", false).await?, "<html>remote</html>");
        assert!(!cache.is_report_cached("e"));
        assert!(cache.cache_report("e", "x").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_entry_for_another_exam_is_never_served() {
        let source = Arc::new(FakeSource::serving("<html>remote</html>"));
        source.set_failing(true);
        let other = CachedReport::new("Exam1", "<html>not yours</html>", T, Duration::days(7));
        let cache = ReportCache::new(
            source.clone(),
            Arc::new(MisfiledStore(other)),
            Arc::new(ManualClock::new(T)),
        );

        assert!(!cache.is_report_cached("exam1"));
        let result = cache.get_report_content("exam1", false).await;
        assert!(matches!(result, Err(ApiError::ServerError(_))));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_exam123_scenario() -> Result<()> {
        let f = fixture("<html>new</html>");
        f.cache.cache_report("exam123", HTML)?;

        f.clock.set(T + Duration::days(1).num_milliseconds());
        assert_eq!(f.cache.get_report_content("exam123", false).await?, HTML);
        assert_eq!(f.source.calls(), 0);

        f.clock.set(T + Duration::days(8).num_milliseconds());
        f.source.set_failing(true);
        assert_eq!(f.cache.get_report_content("exam123", false).await?, HTML);
        Ok(())
    }

    #[test]
    fn test_cache_report_sets_seven_day_expiry() -> Result<()> {
        let f = fixture("");
        f.cache.cache_report("exam123", HTML)?;

        let entry = f.cache.cached_report("exam123")?.expect("entry");
        assert_eq!(entry.cached_at_ms, T);
        assert_eq!(entry.expires_at_ms, T + 7 * 24 * 60 * 60 * 1000);
        Ok(())
    }

    #[test]
    fn test_is_report_cached() -> Result<()> {
        let f = fixture("");
        assert!(!f.cache.is_report_cached("exam123"));

        f.cache.cache_report("exam123", HTML)?;
        assert!(f.cache.is_report_cached("exam123"));

        f.clock.advance(Duration::days(7) + Duration::milliseconds(1));
        assert!(!f.cache.is_report_cached("exam123"));
        Ok(())
    }

    #[test]
    fn test_clear_expired_and_clear_all() -> Result<()> {
        let f = fixture("");
        f.cache.cache_report("old", HTML)?;
        f.clock.advance(Duration::days(6));
        f.cache.cache_report("recent", HTML)?;
        f.clock.advance(Duration::days(2));

        assert_eq!(f.cache.clear_expired_cache()?, 1);
        assert!(f.cache.cached_report("old")?.is_none());
        assert!(f.cache.is_report_cached("recent"));

        assert_eq!(f.cache.clear_all_cache()?, 1);
        assert!(f.cache.cached_report("recent")?.is_none());
        Ok(())
    }

    #[test]
    fn test_remove_report() -> Result<()> {
        let f = fixture("");
        f.cache.cache_report("exam123", HTML)?;
        f.cache.remove_report("exam123")?;
        f.cache.remove_report("exam123")?;
        assert!(f.cache.cached_report("exam123")?.is_none());
        Ok(())
    }
}
