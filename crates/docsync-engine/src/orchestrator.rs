use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, Local, Utc};
use docsync_core::{
    format_watermark, Clock, DocumentIndex, LockManager, ObjectStore, ParserRegistry,
    SyncStream, SystemClock, WatermarkStore,
};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::artifact::upload_with_generated_key;
use crate::exporter::{CursorExporter, DEFAULT_PAGE_SIZE};
use crate::outcome::{FailureClass, ItemFailure, ItemStage, PassOutcome, PassReport};
use crate::scanner::{failed_prefix_summary, PartitionScanner, RetryPolicy};

pub const DEFAULT_PASS_DEADLINE: Duration = Duration::from_secs(600);

const ARTIFACT_CONTENT_TYPE: &str = "application/json";

/// Tunables shared by both pass directions.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub page_size: usize,
    pub retry: RetryPolicy,
    /// Offset used for date partitions, both when scanning and when naming
    /// export artifacts.
    pub offset: FixedOffset,
    pub pass_deadline: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::default(),
            offset: *Local::now().offset(),
            pass_deadline: DEFAULT_PASS_DEADLINE,
        }
    }
}

/// Backends a pass reads from and writes to.
#[derive(Clone)]
pub struct SyncBackends {
    pub index: Arc<dyn DocumentIndex>,
    pub store: Arc<dyn ObjectStore>,
    pub watermarks: Arc<dyn WatermarkStore>,
    pub locks: Arc<dyn LockManager>,
}

/// Runs sync passes in either direction.
///
/// Each pass holds the lock for its stream from start to finish, so passes of
/// the same stream never overlap. Passes of different streams are
/// independent.
pub struct SyncOrchestrator {
    backends: SyncBackends,
    parsers: ParserRegistry,
    settings: SyncSettings,
    clock: Arc<dyn Clock>,
    interrupt: Option<watch::Receiver<bool>>,
}

type Staged = Result<PassReport, PassOutcome>;

impl SyncOrchestrator {
    pub fn new(backends: SyncBackends, settings: SyncSettings) -> Self {
        Self {
            backends,
            parsers: ParserRegistry::with_defaults(),
            settings,
            clock: Arc::new(SystemClock),
            interrupt: None,
        }
    }

    pub fn with_parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = parsers;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Shutdown signal forwarded to the scanner's retry backoff.
    pub fn with_interrupt(mut self, interrupt: watch::Receiver<bool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn index(&self) -> &Arc<dyn DocumentIndex> {
        &self.backends.index
    }

    pub fn watermarks(&self) -> &Arc<dyn WatermarkStore> {
        &self.backends.watermarks
    }

    /// Index to store: export documents changed since the watermark as one
    /// JSON array artifact in `bucket`.
    #[instrument(skip(self))]
    pub async fn run_export(&self, bucket: &str) -> PassOutcome {
        let stream = SyncStream::IndexExport;
        self.locked(stream, |deadline| async move {
            let now = self.clock.now();
            let watermark = self.backends.watermarks.read(stream, now).await;
            info!(
                "Starting {} pass into bucket {}, watermark {}",
                stream,
                bucket,
                format_watermark(watermark)
            );

            match self
                .before(deadline, stream, self.export_items(bucket, watermark, now))
                .await
            {
                Ok(report) => self.commit(report, watermark).await,
                Err(outcome) => outcome,
            }
        })
        .await
    }

    /// Store to index: upsert every record found in objects of `bucket`
    /// changed since the watermark.
    #[instrument(skip(self))]
    pub async fn run_ingest(&self, bucket: &str) -> PassOutcome {
        let stream = SyncStream::StoreIngest;
        self.locked(stream, |deadline| async move {
            let now = self.clock.now();
            let watermark = self.backends.watermarks.read(stream, now).await;
            info!(
                "Starting {} pass from bucket {}, watermark {}",
                stream,
                bucket,
                format_watermark(watermark)
            );

            match self
                .before(deadline, stream, self.ingest_items(bucket, watermark, now))
                .await
            {
                Ok(report) => self.commit(report, watermark).await,
                Err(outcome) => outcome,
            }
        })
        .await
    }

    /// Run `pass` while holding the stream lock. The lock is released on
    /// every path once the pass has produced its outcome.
    async fn locked<F, Fut>(&self, stream: SyncStream, pass: F) -> PassOutcome
    where
        F: FnOnce(Instant) -> Fut,
        Fut: Future<Output = PassOutcome>,
    {
        let holder = format!("{}-{}", stream, Uuid::new_v4().simple());
        let deadline = Instant::now() + self.settings.pass_deadline;

        match self
            .backends
            .locks
            .acquire(stream.as_str(), &holder, self.settings.pass_deadline)
            .await
        {
            Ok(result) if result.acquired => debug!("Lock for {} taken by {}", stream, holder),
            Ok(_) => {
                info!("Skipping {} pass, another pass holds the lock", stream);
                return PassOutcome::Busy { stream };
            }
            Err(e) => {
                error!("Failed to take lock for {}: {}", stream, e);
                return PassOutcome::hard_failure(stream, FailureClass::Unknown, e);
            }
        }

        let outcome = pass(deadline).await;

        if let Err(e) = self.backends.locks.release(stream.as_str(), &holder).await {
            warn!("Failed to release lock for {}: {}", stream, e);
        }
        info!("{}", outcome);
        outcome
    }

    /// Bound the gather-and-process phase by the pass deadline.
    async fn before(
        &self,
        deadline: Instant,
        stream: SyncStream,
        work: impl Future<Output = Staged>,
    ) -> Staged {
        match tokio::time::timeout_at(deadline, work).await {
            Ok(staged) => staged,
            Err(_) => {
                error!(
                    "{} pass exceeded its {}s deadline, watermark left as is",
                    stream,
                    self.settings.pass_deadline.as_secs_f64()
                );
                Err(PassOutcome::hard_failure(
                    stream,
                    FailureClass::Timeout,
                    format!(
                        "deadline of {}s exceeded",
                        self.settings.pass_deadline.as_secs_f64()
                    ),
                ))
            }
        }
    }

    /// Write `max(prior, stored, candidate)` and settle the outcome.
    async fn commit(&self, mut report: PassReport, prior: DateTime<Utc>) -> PassOutcome {
        let stream = report.stream;
        let stored = self
            .backends
            .watermarks
            .load(stream)
            .await
            .ok()
            .flatten()
            .unwrap_or(prior);
        let next = report.next_watermark.max(prior).max(stored);
        report.next_watermark = next;

        match self.backends.watermarks.write(stream, next).await {
            Ok(()) => {
                report.watermark_committed = true;
                info!("Watermark for {} advanced to {}", stream, format_watermark(next));
            }
            Err(e) => {
                error!(
                    "Failed to write watermark for {} ({}), keeping the previous value",
                    stream, e
                );
            }
        }

        PassOutcome::from_report(report)
    }

    async fn export_items(&self, bucket: &str, watermark: DateTime<Utc>, now: DateTime<Utc>) -> Staged {
        let stream = SyncStream::IndexExport;
        let batch = CursorExporter::new(self.backends.index.clone())
            .with_page_size(self.settings.page_size)
            .export(watermark)
            .await
            .map_err(|e| {
                error!("Index query failed: {}", e);
                PassOutcome::hard_failure(stream, FailureClass::QueryFailure, e)
            })?;

        let Some(max_modified) = batch.max_modified() else {
            if !batch.skipped.is_empty() {
                warn!(
                    "No convertible documents, {} hits skipped",
                    batch.skipped.len()
                );
            }
            return Err(PassOutcome::NoIncrementalData {
                stream,
                watermark,
                skipped: batch.skipped.len(),
            });
        };

        let body = serde_json::to_vec(&batch.records)
            .map_err(|e| PassOutcome::hard_failure(stream, FailureClass::Unknown, e))?;
        let today = now.with_timezone(&self.settings.offset).date_naive();

        let key = upload_with_generated_key(
            self.backends.store.as_ref(),
            bucket,
            today,
            "json",
            Bytes::from(body),
            ARTIFACT_CONTENT_TYPE,
        )
        .await
        .map_err(|e| {
            error!("Failed to write export artifact to {}: {}", bucket, e);
            PassOutcome::hard_failure(stream, FailureClass::ArtifactWriteFailure, e)
        })?;
        info!("Saved {} records to {}/{}", batch.records.len(), bucket, key);

        Ok(PassReport {
            stream,
            succeeded: batch.records.len(),
            failures: batch.skipped,
            failed_prefixes: Vec::new(),
            failed_objects: 0,
            artifact_key: Some(key),
            next_watermark: max_modified,
            watermark_committed: false,
        })
    }

    async fn ingest_items(&self, bucket: &str, watermark: DateTime<Utc>, now: DateTime<Utc>) -> Staged {
        let stream = SyncStream::StoreIngest;
        let mut scanner = PartitionScanner::new(self.backends.store.clone())
            .with_retry(self.settings.retry)
            .with_offset(self.settings.offset);
        if let Some(interrupt) = &self.interrupt {
            scanner = scanner.with_interrupt(interrupt.clone());
        }

        let scan = scanner.scan(bucket, watermark, now).await;
        if scan.is_empty() {
            if scan.is_success() {
                if !scan.failed_objects().is_empty() {
                    warn!(
                        "No objects modified after {}, {} entries with unreadable metadata",
                        format_watermark(watermark),
                        scan.failed_objects().len()
                    );
                } else {
                    info!("No objects modified after {}", format_watermark(watermark));
                }
                return Err(PassOutcome::NoIncrementalData {
                    stream,
                    watermark,
                    skipped: scan.failed_objects().len(),
                });
            }
            error!(
                "Scan found nothing and {} prefixes failed, data may be missing",
                scan.failed_prefixes().len()
            );
            return Err(PassOutcome::hard_failure(
                stream,
                FailureClass::PossibleDataLoss,
                failed_prefix_summary(&scan),
            ));
        }
        if !scan.is_success() {
            warn!(
                "Proceeding with partial scan, failed prefixes: {:?}",
                scan.failed_prefixes()
            );
        }

        let mut succeeded = 0;
        let mut failures = Vec::new();
        for key in scan.objects().keys() {
            match self.ingest_object(bucket, key).await {
                Ok(records) => {
                    succeeded += 1;
                    debug!("Ingested {} records from {}", records, key);
                }
                Err(failure) => {
                    warn!(
                        "Failed to ingest {} at {}: {}",
                        failure.key, failure.stage, failure.message
                    );
                    failures.push(failure);
                }
            }
        }

        Ok(PassReport {
            stream,
            succeeded,
            failures,
            failed_prefixes: scan.failed_prefixes().to_vec(),
            failed_objects: scan.failed_objects().len(),
            artifact_key: None,
            next_watermark: scan.latest_modified().unwrap_or(watermark),
            watermark_committed: false,
        })
    }

    /// Read, parse and upsert one object. Returns the number of records.
    async fn ingest_object(&self, bucket: &str, key: &str) -> Result<usize, ItemFailure> {
        let content = match self.backends.store.get_object(bucket, key).await {
            Ok(Some(content)) => content,
            Ok(None) => {
                return Err(ItemFailure::new(
                    key,
                    ItemStage::ContentRead,
                    "object disappeared before it could be read",
                ))
            }
            Err(e) => return Err(ItemFailure::new(key, ItemStage::ContentRead, e)),
        };

        let text = std::str::from_utf8(&content)
            .map_err(|e| ItemFailure::new(key, ItemStage::Parse, format!("not UTF-8: {}", e)))?;
        let records = self
            .parsers
            .parse_object(key, text)
            .map_err(|e| ItemFailure::new(key, ItemStage::Parse, e))?;

        for record in &records {
            self.backends
                .index
                .upsert(record)
                .await
                .map_err(|e| ItemFailure::new(key, ItemStage::Upsert, e))?;
        }
        Ok(records.len())
    }
}
