use std::sync::Arc;

use chrono::{DateTime, Utc};
use docsync_core::{DocumentIndex, IndexHit, RangePageQuery, StorageError, StudentRecord};
use tracing::{debug, info, warn};

use crate::outcome::{ItemFailure, ItemStage};

pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Records gathered by one export run, in `(modified, id)` order.
#[derive(Debug, Default)]
pub struct ExportBatch {
    pub records: Vec<StudentRecord>,
    /// Hits that could not be turned into records.
    pub skipped: Vec<ItemFailure>,
    pub pages: usize,
}

impl ExportBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn max_modified(&self) -> Option<DateTime<Utc>> {
        self.records.iter().map(StudentRecord::modified_at).max()
    }
}

/// Pages through every document modified after a watermark using
/// `search_after` cursors.
pub struct CursorExporter {
    index: Arc<dyn DocumentIndex>,
    page_size: usize,
}

impl CursorExporter {
    pub fn new(index: Arc<dyn DocumentIndex>) -> Self {
        Self {
            index,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fetch all documents modified strictly after `watermark`.
    ///
    /// Stops at the first empty or short page. Any query error aborts the
    /// whole export.
    pub async fn export(&self, watermark: DateTime<Utc>) -> Result<ExportBatch, StorageError> {
        let mut batch = ExportBatch::default();
        let mut query = RangePageQuery {
            modified_after: watermark,
            page_size: self.page_size,
            search_after: None,
        };

        loop {
            let hits = self.index.search_modified_after(&query).await?;
            if hits.is_empty() {
                break;
            }
            batch.pages += 1;
            let fetched = hits.len();
            debug!(
                "Page {} of {}: {} hits",
                batch.pages,
                self.index.index_name(),
                fetched
            );

            let cursor = hits.last().map(|hit| hit.sort.clone()).unwrap_or_default();
            for hit in hits {
                match convert(hit) {
                    Ok(record) => batch.records.push(record),
                    Err(failure) => {
                        warn!("Skipping hit {}: {}", failure.key, failure.message);
                        batch.skipped.push(failure);
                    }
                }
            }

            if fetched < self.page_size {
                break;
            }
            if cursor.is_empty() {
                return Err(StorageError::Query(
                    "Full page returned without sort values, cannot continue".to_string(),
                ));
            }
            query.search_after = Some(cursor);
        }

        info!(
            "Exported {} records from {} in {} pages ({} skipped)",
            batch.records.len(),
            self.index.index_name(),
            batch.pages,
            batch.skipped.len()
        );
        Ok(batch)
    }
}

fn convert(hit: IndexHit) -> Result<StudentRecord, ItemFailure> {
    let Some(source) = hit.source else {
        return Err(ItemFailure::new(hit.id, ItemStage::Convert, "hit has no source"));
    };
    serde_json::from_value::<StudentRecord>(source)
        .map(|record| record.projected())
        .map_err(|e| ItemFailure::new(hit.id, ItemStage::Convert, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use docsync_testkit::{student_at, MemoryIndex};
    use serde_json::json;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 5, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_2500_records_take_three_pages() {
        let index = Arc::new(MemoryIndex::new("student"));
        // Pairs of records share a timestamp so the id tie-breaker matters.
        for i in 0..2500 {
            index.insert(&student_at(&format!("s{:04}", 2499 - i), base(), 1 + (i / 2) as i64));
        }

        let batch = CursorExporter::new(index.clone())
            .export(base())
            .await
            .unwrap();

        assert_eq!(batch.pages, 3);
        assert_eq!(index.search_calls(), 3);
        assert_eq!(batch.records.len(), 2500);

        let keys: Vec<_> = batch
            .records
            .iter()
            .map(|r| (r.update_time, r.id.clone()))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(keys, sorted);
    }

    #[tokio::test]
    async fn test_exact_multiple_ends_on_empty_page() {
        let index = Arc::new(MemoryIndex::new("student"));
        for i in 0..4 {
            index.insert(&student_at(&i.to_string(), base(), 10 + i));
        }

        let batch = CursorExporter::new(index.clone())
            .with_page_size(2)
            .export(base())
            .await
            .unwrap();

        assert_eq!(batch.records.len(), 4);
        assert_eq!(batch.pages, 2);
        assert_eq!(index.search_calls(), 3);
    }

    #[tokio::test]
    async fn test_nothing_newer_is_empty() {
        let index = Arc::new(MemoryIndex::new("student"));
        index.insert(&student_at("old", base(), -1));
        index.insert(&student_at("same", base(), 0));

        let batch = CursorExporter::new(index).export(base()).await.unwrap();

        assert!(batch.is_empty());
        assert_eq!(batch.pages, 0);
        assert!(batch.max_modified().is_none());
    }

    #[tokio::test]
    async fn test_unconvertible_hit_is_skipped() {
        let index = Arc::new(MemoryIndex::new("student"));
        index.insert(&student_at("good", base(), 5));
        index.insert_raw(
            "bad",
            json!({ "id": "bad", "name": ["not", "a", "string"], "updateTime": "2025-09-05T00:00:01Z" }),
        );

        let batch = CursorExporter::new(index).export(base()).await.unwrap();

        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.skipped[0].key, "bad");
        assert_eq!(batch.skipped[0].stage, ItemStage::Convert);
        assert_eq!(batch.max_modified(), Some(base() + TimeDelta::milliseconds(5)));
    }

    #[tokio::test]
    async fn test_query_error_aborts() {
        let index = Arc::new(MemoryIndex::new("student"));
        for i in 0..3 {
            index.insert(&student_at(&i.to_string(), base(), 10 + i));
        }
        index.fail_search_on_call(2);

        let result = CursorExporter::new(index)
            .with_page_size(2)
            .export(base())
            .await;

        assert!(matches!(result, Err(StorageError::Query(_))));
    }

    #[tokio::test]
    async fn test_records_are_projected() {
        let index = Arc::new(MemoryIndex::new("student"));
        let mut record = student_at("1", base(), 5);
        record.create_time = Some(base());
        index.insert(&record);

        let batch = CursorExporter::new(index).export(base()).await.unwrap();

        assert_eq!(batch.records[0].create_time, None);
        assert_eq!(batch.records[0].name.as_deref(), Some("student-1"));
    }
}
