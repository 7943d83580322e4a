use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, Local, Utc};
use docsync_core::{date_prefixes, FailedObjectInfo, ListedEntry, ObjectStore, ScanResult};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Bounded retry schedule for prefix listings.
///
/// After failed attempt `n` (when `n < max_attempts`) the scanner sleeps
/// `n * backoff_step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// Walks date-partitioned prefixes of a bucket looking for objects modified
/// after a watermark.
///
/// Keys are expected to start with `YYYY/MM/DD/`. Every day from the
/// watermark's date to today (both in the configured offset) is listed in
/// ascending order.
pub struct PartitionScanner {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
    offset: FixedOffset,
    interrupt: Option<watch::Receiver<bool>>,
}

enum Backoff {
    Elapsed,
    Interrupted,
}

impl PartitionScanner {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            offset: *Local::now().offset(),
            interrupt: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Offset used to derive calendar days for the prefixes.
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    /// Signal that cuts short a retry backoff. The prefix being retried is
    /// recorded as failed and the scan moves on.
    pub fn with_interrupt(mut self, interrupt: watch::Receiver<bool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Prefixes covering `watermark` through `now`.
    pub fn prefixes(&self, watermark: DateTime<Utc>, now: DateTime<Utc>) -> Vec<String> {
        let start = watermark.with_timezone(&self.offset).date_naive();
        let end = now.with_timezone(&self.offset).date_naive();
        date_prefixes(start, end)
    }

    /// Scan `bucket` for objects modified strictly after `watermark`.
    pub async fn scan(
        &self,
        bucket: &str,
        watermark: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ScanResult {
        let started = Instant::now();
        let prefixes = self.prefixes(watermark, now);
        info!(
            "Scanning bucket={} modified_after={} offset={} prefixes={}",
            bucket,
            watermark,
            self.offset,
            prefixes.len()
        );

        let mut objects = BTreeMap::new();
        let mut seen = HashSet::new();
        let mut failed_prefixes = Vec::new();
        let mut failed_objects = Vec::new();

        for prefix in prefixes {
            let mut attempt = 0;
            loop {
                attempt += 1;
                debug!("Listing prefix {} (attempt {})", prefix, attempt);

                match self.store.list_objects(bucket, &prefix).await {
                    Ok(entries) => {
                        for entry in entries {
                            self.record_entry(
                                &prefix,
                                entry,
                                watermark,
                                now,
                                &mut seen,
                                &mut objects,
                                &mut failed_objects,
                            );
                        }
                        debug!("Prefix {} listed", prefix);
                        break;
                    }
                    Err(e) if attempt >= self.retry.max_attempts => {
                        error!(
                            "Prefix {} still failing after {} attempts, marking as failed: {}",
                            prefix, attempt, e
                        );
                        failed_prefixes.push(prefix.clone());
                        break;
                    }
                    Err(e) => {
                        info!(
                            "Listing prefix {} failed on attempt {}, retrying: {}",
                            prefix, attempt, e
                        );
                        if let Backoff::Interrupted = self.backoff(attempt).await {
                            warn!("Retry wait for prefix {} interrupted, moving on", prefix);
                            failed_prefixes.push(prefix.clone());
                            break;
                        }
                    }
                }
            }
        }

        info!(
            "Scan finished: found={} failed_prefixes={} failed_objects={} elapsed_ms={}",
            objects.len(),
            failed_prefixes.len(),
            failed_objects.len(),
            started.elapsed().as_millis()
        );

        ScanResult::new(objects, failed_prefixes, failed_objects)
    }

    #[allow(clippy::too_many_arguments)]
    fn record_entry(
        &self,
        prefix: &str,
        entry: ListedEntry,
        watermark: DateTime<Utc>,
        now: DateTime<Utc>,
        seen: &mut HashSet<String>,
        objects: &mut BTreeMap<String, DateTime<Utc>>,
        failed_objects: &mut Vec<FailedObjectInfo>,
    ) {
        match entry {
            Ok(summary) => {
                if !seen.insert(summary.key.clone()) {
                    return;
                }
                if summary.last_modified > watermark {
                    objects.insert(summary.key, summary.last_modified);
                }
            }
            Err(e) => {
                warn!(
                    "Skipping object with unreadable metadata (prefix={}, object={}): {}",
                    prefix,
                    e.key_hint.as_deref().unwrap_or("unknown"),
                    e.message
                );
                failed_objects.push(FailedObjectInfo::new(prefix, e.key_hint, e.message, now));
            }
        }
    }

    async fn backoff(&self, attempt: u32) -> Backoff {
        let deadline = tokio::time::Instant::now() + self.retry.backoff(attempt);
        let Some(interrupt) = &self.interrupt else {
            tokio::time::sleep_until(deadline).await;
            return Backoff::Elapsed;
        };

        let mut interrupt = interrupt.clone();
        let raised = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => false,
            raised = interrupt.wait_for(|raised| *raised) => raised.is_ok(),
        };

        if raised {
            return Backoff::Interrupted;
        }
        // Sender dropped before the delay ran out.
        tokio::time::sleep_until(deadline).await;
        Backoff::Elapsed
    }
}

/// Comma-separated list of the prefixes a scan could not list.
pub(crate) fn failed_prefix_summary(result: &ScanResult) -> String {
    format!(
        "{} prefixes could not be listed: {}",
        result.failed_prefixes().len(),
        result.failed_prefixes().join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use docsync_core::ObjectMetadataError;
    use docsync_testkit::MemoryObjectStore;

    const BUCKET: &str = "students";

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_step: Duration::from_millis(1),
        }
    }

    fn scanner(store: &Arc<MemoryObjectStore>) -> PartitionScanner {
        PartitionScanner::new(store.clone())
            .with_retry(fast_retry())
            .with_offset(utc())
    }

    #[test]
    fn test_prefixes_follow_offset() {
        let store = Arc::new(MemoryObjectStore::new());
        let watermark = Utc.with_ymd_and_hms(2025, 9, 4, 20, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 9, 5, 1, 0, 0).unwrap();

        assert_eq!(
            scanner(&store).prefixes(watermark, now),
            vec!["2025/09/04/", "2025/09/05/"]
        );

        let tokyo = PartitionScanner::new(store).with_offset(FixedOffset::east_opt(9 * 3600).unwrap());
        assert_eq!(tokyo.prefixes(watermark, now), vec!["2025/09/05/"]);
    }

    #[test]
    fn test_backoff_grows_linearly() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.backoff(1), Duration::from_secs(1));
        assert_eq!(retry.backoff(2), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_only_objects_after_watermark() {
        let store = Arc::new(MemoryObjectStore::new());
        let watermark = Utc.with_ymd_and_hms(2025, 9, 5, 10, 0, 0).unwrap();
        let now = watermark + TimeDelta::hours(1);
        store.insert(BUCKET, "2025/09/05/old.json", "{}", watermark - TimeDelta::minutes(5));
        store.insert(BUCKET, "2025/09/05/same.json", "{}", watermark);
        store.insert(BUCKET, "2025/09/05/new.json", "{}", watermark + TimeDelta::minutes(5));

        let result = scanner(&store).scan(BUCKET, watermark, now).await;

        assert!(result.is_success());
        assert_eq!(result.objects().keys().collect::<Vec<_>>(), ["2025/09/05/new.json"]);
    }

    #[tokio::test]
    async fn test_overlapping_listings_yield_one_entry_per_key() {
        let store = Arc::new(MemoryObjectStore::new());
        let watermark = Utc.with_ymd_and_hms(2025, 9, 4, 10, 0, 0).unwrap();
        let now = watermark + TimeDelta::days(1);
        let modified = watermark + TimeDelta::minutes(1);
        store.insert(BUCKET, "2025/09/04/a.json", "{}", modified);
        // The same key shows up again under the next day's listing.
        store.add_listing_entry(
            BUCKET,
            "2025/09/05/",
            Ok(docsync_core::ObjectSummary {
                key: "2025/09/04/a.json".to_string(),
                last_modified: modified + TimeDelta::hours(1),
                size_bytes: 2,
            }),
        );

        let result = scanner(&store).scan(BUCKET, watermark, now).await;

        assert_eq!(result.objects().len(), 1);
        assert_eq!(result.objects()["2025/09/04/a.json"], modified);
    }

    #[tokio::test]
    async fn test_unreadable_metadata_is_isolated() {
        let store = Arc::new(MemoryObjectStore::new());
        let watermark = Utc.with_ymd_and_hms(2025, 9, 5, 10, 0, 0).unwrap();
        let now = watermark + TimeDelta::hours(1);
        store.insert(BUCKET, "2025/09/05/a.json", "{}", now);
        store.insert(BUCKET, "2025/09/05/b.json", "{}", now);
        store.add_listing_entry(
            BUCKET,
            "2025/09/05/",
            Err(ObjectMetadataError {
                key_hint: Some("2025/09/05/broken.json".to_string()),
                message: "bad timestamp".to_string(),
            }),
        );

        let result = scanner(&store).scan(BUCKET, watermark, now).await;

        assert!(result.is_success());
        assert_eq!(result.objects().len(), 2);
        assert_eq!(result.failed_objects().len(), 1);
        let failed = &result.failed_objects()[0];
        assert_eq!(failed.prefix(), "2025/09/05/");
        assert_eq!(failed.object_name_hint(), Some("2025/09/05/broken.json"));
        assert_eq!(failed.failure_reason(), docsync_core::METADATA_PARSE_FAILED);
        assert_eq!(failed.observed_at(), now);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let store = Arc::new(MemoryObjectStore::new());
        let watermark = Utc.with_ymd_and_hms(2025, 9, 5, 10, 0, 0).unwrap();
        let now = watermark + TimeDelta::hours(1);
        store.insert(BUCKET, "2025/09/05/a.json", "{}", now);
        store.fail_listing("2025/09/05/", 2);

        let result = scanner(&store).scan(BUCKET, watermark, now).await;

        assert!(result.is_success());
        assert_eq!(result.objects().len(), 1);
        assert_eq!(store.list_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_prefix_is_recorded_once() {
        let store = Arc::new(MemoryObjectStore::new());
        let watermark = Utc.with_ymd_and_hms(2025, 9, 4, 10, 0, 0).unwrap();
        let now = watermark + TimeDelta::days(1);
        store.insert(BUCKET, "2025/09/04/a.json", "{}", watermark + TimeDelta::minutes(1));
        store.insert(BUCKET, "2025/09/05/b.json", "{}", now);
        store.fail_listing_always("2025/09/05/");

        let result = scanner(&store).scan(BUCKET, watermark, now).await;

        assert!(!result.is_success());
        assert_eq!(result.failed_prefixes(), ["2025/09/05/"]);
        assert_eq!(result.objects().keys().collect::<Vec<_>>(), ["2025/09/04/a.json"]);
        assert_eq!(
            store.list_calls(),
            vec!["2025/09/04/", "2025/09/05/", "2025/09/05/", "2025/09/05/"]
        );
    }

    #[tokio::test]
    async fn test_interrupt_abandons_prefix_not_scan() {
        let store = Arc::new(MemoryObjectStore::new());
        let watermark = Utc.with_ymd_and_hms(2025, 9, 4, 10, 0, 0).unwrap();
        let now = watermark + TimeDelta::days(1);
        store.fail_listing_always("2025/09/04/");
        store.insert(BUCKET, "2025/09/05/b.json", "{}", now);

        let (tx, rx) = watch::channel(true);
        let scanner = PartitionScanner::new(store.clone())
            .with_retry(RetryPolicy {
                max_attempts: 3,
                backoff_step: Duration::from_secs(3600),
            })
            .with_offset(utc())
            .with_interrupt(rx);

        let result = scanner.scan(BUCKET, watermark, now).await;
        drop(tx);

        assert_eq!(result.failed_prefixes(), ["2025/09/04/"]);
        assert_eq!(result.objects().keys().collect::<Vec<_>>(), ["2025/09/05/b.json"]);
        assert_eq!(
            store.list_calls(),
            vec!["2025/09/04/", "2025/09/05/"]
        );
    }

    #[tokio::test]
    async fn test_missing_bucket_fails_every_prefix() {
        let store = Arc::new(MemoryObjectStore::new());
        let watermark = Utc.with_ymd_and_hms(2025, 9, 5, 10, 0, 0).unwrap();

        let result = scanner(&store)
            .scan("nope", watermark, watermark + TimeDelta::hours(1))
            .await;

        assert!(result.is_empty());
        assert_eq!(result.failed_prefixes(), ["2025/09/05/"]);
        assert!(failed_prefix_summary(&result).contains("2025/09/05/"));
    }
}
