//! Core traits and types for docsync.
//!
//! docsync keeps a document index and an object store eventually consistent
//! through periodic, watermark-based incremental passes. This crate defines
//! the abstractions shared by the backends and the sync engine:
//! - `DocumentIndex`: point operations and the sorted, cursor-paged range query
//! - `ObjectStore`: date-partitioned listing, get and put of objects
//! - `WatermarkStore`: durable per-stream checkpoints
//! - `LockManager`: single-writer lease per stream
//! - `ScanResult` / `FailedObjectInfo`: the scan failure ledger
//! - `ParserRegistry`: type tag to parsing function mapping

mod clock;
mod error;
mod index;
mod lock;
mod object_store;
mod parse;
mod record;
mod scan;
mod watermark;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::StorageError;
pub use index::{DocumentIndex, IndexHit, RangePageQuery, SortCursor};
pub use lock::{LockAcquireResult, LockManager};
pub use object_store::{
    date_prefix, date_prefixes, ListedEntry, ObjectMetadataError, ObjectStore, ObjectSummary,
};
pub use parse::{parse_csv_records, parse_json_records, type_tag, ParseFn, ParserRegistry};
pub use record::{timestamp, StudentRecord};
pub use scan::{FailedObjectInfo, ScanResult, METADATA_PARSE_FAILED};
pub use watermark::{
    bootstrap_watermark, format_watermark, parse_watermark, SyncStream, WatermarkStore,
    BOOTSTRAP_LOOKBACK_SECS,
};
