use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::error::StorageError;

/// An object returned by a listing, with readable metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size_bytes: u64,
}

/// A listed entry whose metadata could not be read.
///
/// `key_hint` carries whatever part of the entry was still readable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadataError {
    pub key_hint: Option<String>,
    pub message: String,
}

/// One entry of a prefix listing. Individual entries may fail without
/// failing the listing as a whole.
pub type ListedEntry = Result<ObjectSummary, ObjectMetadataError>;

/// Object store abstraction (S3, MinIO, R2, or in-memory).
///
/// Keys are laid out by ingestion date: `YYYY/MM/DD/<name>`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns the backend identifier (e.g., "s3").
    fn backend_name(&self) -> &'static str;

    /// Check whether a bucket exists.
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError>;

    /// Create a bucket.
    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// Recursively list every object under `prefix`.
    ///
    /// An `Err` means the listing itself failed; per-entry metadata
    /// failures are reported inside the returned vector.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ListedEntry>, StorageError>;

    /// Read an object's content. `None` if the key does not exist.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Bytes>, StorageError>;

    /// Write an object from an in-memory buffer.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError>;
}

/// Date partition prefix for a calendar day, e.g. `2025/09/05/`.
pub fn date_prefix(date: NaiveDate) -> String {
    format!("{:04}/{:02}/{:02}/", date.year(), date.month(), date.day())
}

/// Inclusive, ascending list of daily prefixes from `start` to `end`.
///
/// Empty when `start` is after `end`.
pub fn date_prefixes(start: NaiveDate, end: NaiveDate) -> Vec<String> {
    start
        .iter_days()
        .take_while(|day| *day <= end)
        .map(date_prefix)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_prefix_is_zero_padded() {
        let day = NaiveDate::from_ymd_opt(2025, 9, 5).unwrap();
        assert_eq!(date_prefix(day), "2025/09/05/");
    }

    #[test]
    fn test_date_prefixes_cross_month_boundary() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 30).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 2, 2).unwrap();
        assert_eq!(
            date_prefixes(start, end),
            vec!["2025/01/30/", "2025/01/31/", "2025/02/01/", "2025/02/02/"]
        );
    }

    #[test]
    fn test_date_prefixes_single_and_inverted() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        assert_eq!(date_prefixes(day, day), vec!["2025/03/01/"]);
        assert!(date_prefixes(day, day.pred_opt().unwrap()).is_empty());
    }
}
