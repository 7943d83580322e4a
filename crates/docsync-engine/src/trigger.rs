use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use docsync_core::StorageError;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::orchestrator::SyncOrchestrator;
use crate::outcome::PassOutcome;

/// Words that mark a pass message as a failure, matched case-insensitively.
pub const FAILURE_MARKERS: [&str; 2] = ["failed", "error"];

const BUCKET_PARAM: &str = "bucket=";

/// Direction a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Object store to index.
    Ingest,
    /// Index to object store.
    Export,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Ingest => "ingest",
            JobKind::Export => "export",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ingest" => Ok(JobKind::Ingest),
            "export" => Ok(JobKind::Export),
            other => Err(StorageError::InvalidArgument(format!(
                "Unknown job kind {:?}",
                other
            ))),
        }
    }
}

/// Result handed back to whatever triggered the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessResult {
    pub success: bool,
    pub message: String,
}

impl ProcessResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    /// Successful only for a healthy outcome whose message carries no
    /// failure marker.
    pub fn from_outcome(outcome: &PassOutcome) -> Self {
        let message = outcome.message();
        let lowered = message.to_ascii_lowercase();
        let marked = FAILURE_MARKERS.iter().any(|m| lowered.contains(m));
        Self {
            success: outcome.is_healthy() && !marked,
            message,
        }
    }
}

/// Extract the bucket name from a job parameter block.
///
/// Accepts `bucket=<name>` or a bare name. Surrounding whitespace is ignored.
pub fn parse_bucket(params: &str) -> Result<String, StorageError> {
    let params = params.trim();
    if params.is_empty() {
        return Err(StorageError::InvalidArgument(
            "Job parameters must not be empty".to_string(),
        ));
    }

    let bucket = params.strip_prefix(BUCKET_PARAM).unwrap_or(params).trim();
    if bucket.is_empty() {
        return Err(StorageError::InvalidArgument(
            "Bucket name must not be empty".to_string(),
        ));
    }
    Ok(bucket.to_string())
}

/// Runs passes on behalf of external triggers (CLI, HTTP, scheduler).
#[derive(Clone)]
pub struct JobRunner {
    orchestrator: Arc<SyncOrchestrator>,
}

impl JobRunner {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    /// Parse `params`, run one pass of `kind` and map its outcome.
    pub async fn run(&self, kind: JobKind, params: &str) -> ProcessResult {
        let bucket = match parse_bucket(params) {
            Ok(bucket) => bucket,
            Err(e) => {
                warn!("Rejected {} job: {}", kind, e);
                return ProcessResult::failure(e.to_string());
            }
        };

        info!("Running {} job for bucket {}", kind, bucket);
        let outcome = match kind {
            JobKind::Ingest => self.orchestrator.run_ingest(&bucket).await,
            JobKind::Export => self.orchestrator.run_export(&bucket).await,
        };

        let result = ProcessResult::from_outcome(&outcome);
        info!(
            "{} job for bucket {} finished, success={}",
            kind, bucket, result.success
        );
        result
    }
}
