use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local};
use clap::{Parser, Subcommand, ValueEnum};
use docsync_core::SyncStream;
use docsync_engine::{RetryPolicy, SyncSettings};

/// Configuration for the docsync worker.
#[derive(Parser, Debug, Clone)]
#[command(name = "docsync-worker")]
#[command(about = "Incremental sync between an Elasticsearch index and an S3-compatible object store")]
pub struct Config {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Host to bind the HTTP server to
    #[arg(long, default_value = "0.0.0.0", env = "DOCSYNC_HOST")]
    pub host: String,

    /// Port to bind the HTTP server to
    #[arg(long, default_value = "8080", env = "DOCSYNC_PORT")]
    pub port: u16,

    /// Elasticsearch base URL
    #[arg(long, default_value = "http://localhost:9200", env = "ES_URL")]
    pub es_url: String,

    /// Index holding the student documents
    #[arg(long, default_value = "student", env = "ES_INDEX")]
    pub es_index: String,

    #[arg(long, env = "ES_USERNAME")]
    pub es_username: Option<String>,

    #[arg(long, env = "ES_PASSWORD")]
    pub es_password: Option<String>,

    /// S3-compatible endpoint (MinIO, AWS, R2)
    #[arg(long, default_value = "http://localhost:9000", env = "S3_ENDPOINT")]
    pub s3_endpoint: String,

    #[arg(long, default_value = "us-east-1", env = "S3_REGION")]
    pub s3_region: String,

    #[arg(long, default_value = "minioadmin", env = "S3_ACCESS_KEY_ID")]
    pub s3_access_key_id: String,

    #[arg(long, default_value = "minioadmin", env = "S3_SECRET_ACCESS_KEY")]
    pub s3_secret_access_key: String,

    /// Where watermarks are kept
    #[arg(long, value_enum, default_value = "file", env = "DOCSYNC_WATERMARK_BACKEND")]
    pub watermark_backend: WatermarkBackend,

    /// Directory for watermark files and pass locks
    #[arg(long, env = "DOCSYNC_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Bucket for object watermarks
    #[arg(long, default_value = "docsync-state", env = "DOCSYNC_WATERMARK_BUCKET")]
    pub watermark_bucket: String,

    /// Key prefix for object watermarks
    #[arg(long, default_value = "watermarks", env = "DOCSYNC_WATERMARK_PREFIX")]
    pub watermark_prefix: String,

    /// Documents per export page
    #[arg(long, default_value = "1000", env = "DOCSYNC_PAGE_SIZE")]
    pub page_size: usize,

    /// Listing attempts per date prefix
    #[arg(long, default_value = "3", env = "DOCSYNC_RETRY_ATTEMPTS")]
    pub retry_attempts: u32,

    /// Backoff step between listing attempts (milliseconds)
    #[arg(long, default_value = "1000", env = "DOCSYNC_RETRY_BACKOFF_MS")]
    pub retry_backoff_ms: u64,

    /// Upper bound on a single pass (seconds)
    #[arg(long, default_value = "600", env = "DOCSYNC_PASS_DEADLINE_SECS")]
    pub pass_deadline_secs: u64,

    /// UTC offset for date partitions, e.g. "+08:00" (defaults to local)
    #[arg(long, env = "DOCSYNC_UTC_OFFSET")]
    pub utc_offset: Option<String>,

    /// Bucket the scheduled ingest job reads from
    #[arg(long, env = "DOCSYNC_INGEST_BUCKET")]
    pub ingest_bucket: Option<String>,

    /// Bucket the scheduled export job writes to
    #[arg(long, env = "DOCSYNC_EXPORT_BUCKET")]
    pub export_bucket: Option<String>,

    /// Seconds between scheduled ingest passes (0 disables)
    #[arg(long, default_value = "0", env = "DOCSYNC_INGEST_INTERVAL_SECS")]
    pub ingest_interval_secs: u64,

    /// Seconds between scheduled export passes (0 disables)
    #[arg(long, default_value = "0", env = "DOCSYNC_EXPORT_INTERVAL_SECS")]
    pub export_interval_secs: u64,

    /// Maximum documents returned by GET /getAll
    #[arg(long, default_value = "1000", env = "DOCSYNC_LIST_LIMIT")]
    pub list_limit: usize,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the HTTP surface and run scheduled jobs (default)
    Serve,
    /// Run one object store to index pass
    Ingest {
        /// `bucket=<name>` or a bare bucket name
        params: String,
    },
    /// Run one index to object store pass
    Export {
        /// `bucket=<name>` or a bare bucket name
        params: String,
    },
    /// Forget a stream's watermark so the next pass bootstraps
    ResetWatermark {
        #[arg(value_enum)]
        stream: StreamArg,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkBackend {
    /// One text file per stream under the state directory
    File,
    /// One text object per stream in the watermark bucket
    Object,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamArg {
    IndexExport,
    StoreIngest,
}

impl From<StreamArg> for SyncStream {
    fn from(stream: StreamArg) -> Self {
        match stream {
            StreamArg::IndexExport => SyncStream::IndexExport,
            StreamArg::StoreIngest => SyncStream::StoreIngest,
        }
    }
}

impl Config {
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(docsync_local::default_state_dir)
    }

    pub fn offset(&self) -> anyhow::Result<FixedOffset> {
        match &self.utc_offset {
            Some(text) => parse_offset(text),
            None => Ok(*Local::now().offset()),
        }
    }

    pub fn sync_settings(&self) -> anyhow::Result<SyncSettings> {
        Ok(SyncSettings {
            page_size: self.page_size,
            retry: RetryPolicy {
                max_attempts: self.retry_attempts.max(1),
                backoff_step: Duration::from_millis(self.retry_backoff_ms),
            },
            offset: self.offset()?,
            pass_deadline: Duration::from_secs(self.pass_deadline_secs),
        })
    }
}

/// Parse `Z`, `+HH:MM` or `-HH:MM`.
fn parse_offset(text: &str) -> anyhow::Result<FixedOffset> {
    let probe = format!("2000-01-01T00:00:00{}", text.trim());
    DateTime::parse_from_rfc3339(&probe)
        .map(|dt| *dt.offset())
        .map_err(|e| anyhow::anyhow!("Invalid UTC offset {:?}: {}", text, e))
}
