use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use docsync_core::{
    format_watermark, parse_watermark, ObjectStore, StorageError, SyncStream, WatermarkStore,
};
use tracing::{info, instrument};

/// Watermark store keeping one small text object per stream.
///
/// Layout in the bucket:
/// ```text
/// {bucket}/
///   {prefix}/last_sync_{stream}.txt    # RFC 3339 instant
/// ```
///
/// A single object put replaces the value whole, so readers never see a
/// partial write.
pub struct ObjectWatermarkStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
}

impl ObjectWatermarkStore {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, prefix: &str) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// Object key holding a stream's watermark.
    pub fn key(&self, stream: SyncStream) -> String {
        if self.prefix.is_empty() {
            format!("last_sync_{}.txt", stream)
        } else {
            format!("{}/last_sync_{}.txt", self.prefix, stream)
        }
    }
}

#[async_trait]
impl WatermarkStore for ObjectWatermarkStore {
    fn backend_name(&self) -> &'static str {
        "object"
    }

    #[instrument(skip(self), level = "debug")]
    async fn load(&self, stream: SyncStream) -> Result<Option<DateTime<Utc>>, StorageError> {
        let Some(data) = self.store.get_object(&self.bucket, &self.key(stream)).await? else {
            return Ok(None);
        };

        let text = std::str::from_utf8(&data)
            .map_err(|e| StorageError::Parse(format!("Watermark is not UTF-8: {}", e)))?;
        parse_watermark(text).map(Some)
    }

    #[instrument(skip(self), level = "debug")]
    async fn write(&self, stream: SyncStream, instant: DateTime<Utc>) -> Result<(), StorageError> {
        if !self.store.bucket_exists(&self.bucket).await? {
            self.store.create_bucket(&self.bucket).await?;
        }

        let text = format_watermark(instant);
        self.store
            .put_object(
                &self.bucket,
                &self.key(stream),
                Bytes::from(text.clone()),
                "text/plain; charset=utf-8",
            )
            .await?;

        info!("Watermark for {} set to {}", stream, text);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn reset(&self, stream: SyncStream) -> Result<(), StorageError> {
        self.store.delete_object(&self.bucket, &self.key(stream)).await
    }
}
