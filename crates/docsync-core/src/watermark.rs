use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::StorageError;

/// How far back the first pass of a stream looks when no watermark exists.
pub const BOOTSTRAP_LOOKBACK_SECS: i64 = 60 * 60;

/// Sync directions, each with its own watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStream {
    /// Index → object store.
    IndexExport,
    /// Object store → index.
    StoreIngest,
}

impl SyncStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStream::IndexExport => "index_export",
            SyncStream::StoreIngest => "store_ingest",
        }
    }
}

impl fmt::Display for SyncStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Watermark used when a stream has no readable checkpoint.
pub fn bootstrap_watermark(now: DateTime<Utc>) -> DateTime<Utc> {
    now - TimeDelta::seconds(BOOTSTRAP_LOOKBACK_SECS)
}

/// Text form of a persisted watermark (RFC 3339, full precision, `Z`).
pub fn format_watermark(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse the text form of a persisted watermark.
pub fn parse_watermark(text: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Parse(format!("Invalid watermark {:?}: {}", text.trim(), e)))
}

/// Durable single-value checkpoint per sync stream.
///
/// Implementations only provide raw load/store; `read` layers the
/// bootstrap default on top so that reading never fails.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Returns the backend identifier (e.g., "file").
    fn backend_name(&self) -> &'static str;

    /// Load the stored instant. `Ok(None)` when nothing is stored.
    async fn load(&self, stream: SyncStream) -> Result<Option<DateTime<Utc>>, StorageError>;

    /// Atomically replace the stored instant. On error the previous value
    /// must still be in place.
    async fn write(&self, stream: SyncStream, instant: DateTime<Utc>) -> Result<(), StorageError>;

    /// Forget the stored instant so the next read bootstraps.
    async fn reset(&self, stream: SyncStream) -> Result<(), StorageError>;

    /// Read the watermark, falling back to `now - 1h` when it is missing
    /// or unreadable.
    async fn read(&self, stream: SyncStream, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.load(stream).await {
            Ok(Some(instant)) => instant,
            Ok(None) => {
                let fallback = bootstrap_watermark(now);
                info!(
                    "No watermark stored for {}, starting from {}",
                    stream,
                    format_watermark(fallback)
                );
                fallback
            }
            Err(e) => {
                let fallback = bootstrap_watermark(now);
                warn!(
                    "Failed to read watermark for {} ({}), starting from {}",
                    stream,
                    e,
                    format_watermark(fallback)
                );
                fallback
            }
        }
    }
}
