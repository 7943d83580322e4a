use std::fmt;

use chrono::{DateTime, Utc};
use docsync_core::{format_watermark, SyncStream};
use serde::Serialize;

/// Step at which a single item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStage {
    ContentRead,
    Parse,
    Upsert,
    Convert,
}

impl ItemStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStage::ContentRead => "content_read",
            ItemStage::Parse => "parse",
            ItemStage::Upsert => "upsert",
            ItemStage::Convert => "convert",
        }
    }
}

impl fmt::Display for ItemStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item (object or index hit) that could not be carried across.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub key: String,
    pub stage: ItemStage,
    pub message: String,
}

impl ItemFailure {
    pub fn new(key: impl Into<String>, stage: ItemStage, message: impl fmt::Display) -> Self {
        Self {
            key: key.into(),
            stage,
            message: message.to_string(),
        }
    }
}

/// Class of a pass that stopped without committing anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    QueryFailure,
    ArtifactWriteFailure,
    PossibleDataLoss,
    Timeout,
    Unknown,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureClass::QueryFailure => "query failure",
            FailureClass::ArtifactWriteFailure => "artifact write failure",
            FailureClass::PossibleDataLoss => "possible data loss",
            FailureClass::Timeout => "timeout",
            FailureClass::Unknown => "unknown failure",
        })
    }
}

/// Counts and bookkeeping of a pass that processed at least one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub stream: SyncStream,
    pub succeeded: usize,
    pub failures: Vec<ItemFailure>,
    pub failed_prefixes: Vec<String>,
    pub failed_objects: usize,
    pub artifact_key: Option<String>,
    pub next_watermark: DateTime<Utc>,
    pub watermark_committed: bool,
}

impl PassReport {
    pub fn scan_success(&self) -> bool {
        self.failed_prefixes.is_empty()
    }

    pub fn failed_keys(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.key.as_str()).collect()
    }

    fn is_clean(&self) -> bool {
        self.failures.is_empty()
            && self.failed_prefixes.is_empty()
            && self.failed_objects == 0
            && self.watermark_committed
    }
}

/// Result of one sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PassOutcome {
    /// Nothing changed since the watermark; the watermark is untouched.
    /// `skipped` counts entries passed over because they could not be read.
    NoIncrementalData {
        stream: SyncStream,
        watermark: DateTime<Utc>,
        skipped: usize,
    },
    Success(PassReport),
    /// Some items, prefixes or the watermark write did not go through.
    PartialSuccess(PassReport),
    /// Another pass holds the stream lock.
    Busy { stream: SyncStream },
    /// Aborted before the watermark write.
    HardFailure {
        stream: SyncStream,
        class: FailureClass,
        detail: String,
    },
}

impl PassOutcome {
    pub fn from_report(report: PassReport) -> Self {
        if report.is_clean() {
            PassOutcome::Success(report)
        } else {
            PassOutcome::PartialSuccess(report)
        }
    }

    pub fn hard_failure(stream: SyncStream, class: FailureClass, detail: impl fmt::Display) -> Self {
        PassOutcome::HardFailure {
            stream,
            class,
            detail: detail.to_string(),
        }
    }

    pub fn stream(&self) -> SyncStream {
        match self {
            PassOutcome::NoIncrementalData { stream, .. }
            | PassOutcome::Busy { stream }
            | PassOutcome::HardFailure { stream, .. } => *stream,
            PassOutcome::Success(report) | PassOutcome::PartialSuccess(report) => report.stream,
        }
    }

    /// True for passes that left nothing behind to look at.
    pub fn is_healthy(&self) -> bool {
        matches!(
            self,
            PassOutcome::NoIncrementalData { .. } | PassOutcome::Success(_)
        )
    }

    pub fn report(&self) -> Option<&PassReport> {
        match self {
            PassOutcome::Success(report) | PassOutcome::PartialSuccess(report) => Some(report),
            _ => None,
        }
    }

    /// Human-readable summary. Healthy outcomes never contain the words
    /// "failed" or "error".
    pub fn message(&self) -> String {
        match self {
            PassOutcome::NoIncrementalData {
                stream,
                watermark,
                skipped,
            } => {
                let mut message = format!(
                    "No incremental data for {} since {}",
                    stream,
                    format_watermark(*watermark)
                );
                if *skipped > 0 {
                    message.push_str(&format!(", {} unreadable entries skipped", skipped));
                }
                message
            }
            PassOutcome::Success(report) => format!(
                "{}, next watermark: {}",
                headline(report),
                format_watermark(report.next_watermark)
            ),
            PassOutcome::PartialSuccess(report) => {
                let mut message = headline(report);
                if !report.failures.is_empty() {
                    message.push_str(&format!(
                        ", {} failed [{}]",
                        report.failures.len(),
                        report.failed_keys().join(", ")
                    ));
                }
                if !report.failed_prefixes.is_empty() {
                    message.push_str(&format!(
                        ", {} prefixes failed [{}] and data may be incomplete",
                        report.failed_prefixes.len(),
                        report.failed_prefixes.join(", ")
                    ));
                }
                if report.failed_objects > 0 {
                    message.push_str(&format!(
                        ", {} objects with unreadable metadata",
                        report.failed_objects
                    ));
                }
                if !report.watermark_committed {
                    message.push_str(", watermark write failed");
                }
                message.push_str(&format!(
                    ", next watermark: {}",
                    format_watermark(report.next_watermark)
                ));
                message
            }
            PassOutcome::Busy { stream } => format!("Another {} pass is in progress", stream),
            PassOutcome::HardFailure {
                stream,
                class,
                detail,
            } => format!("{} pass aborted with {}: {}", stream, class, detail),
        }
    }
}

fn headline(report: &PassReport) -> String {
    match (&report.stream, &report.artifact_key) {
        (SyncStream::IndexExport, Some(key)) => {
            format!("Exported {} records to {}", report.succeeded, key)
        }
        (SyncStream::IndexExport, None) => format!("Exported {} records", report.succeeded),
        (SyncStream::StoreIngest, _) => format!("Ingested {} objects", report.succeeded),
    }
}

impl fmt::Display for PassOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}
