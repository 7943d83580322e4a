//! Sync engine: partition scanner, cursor exporter, pass orchestration and the
//! job trigger surface.
//!
//! A pass in either direction follows the same shape: take the stream lock,
//! read the watermark, gather changed items, process them one by one, write the
//! new watermark, release the lock. Every pass ends in exactly one
//! [`PassOutcome`].

mod artifact;
mod exporter;
mod orchestrator;
mod outcome;
mod scanner;
mod trigger;

pub use artifact::{artifact_key, upload_with_generated_key};
pub use exporter::{CursorExporter, ExportBatch, DEFAULT_PAGE_SIZE};
pub use orchestrator::{SyncBackends, SyncOrchestrator, SyncSettings, DEFAULT_PASS_DEADLINE};
pub use outcome::{FailureClass, ItemFailure, ItemStage, PassOutcome, PassReport};
pub use scanner::{PartitionScanner, RetryPolicy};
pub use trigger::{parse_bucket, JobKind, JobRunner, ProcessResult, FAILURE_MARKERS};
