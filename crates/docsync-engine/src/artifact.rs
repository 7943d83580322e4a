use bytes::Bytes;
use chrono::NaiveDate;
use docsync_core::{date_prefix, ObjectStore, StorageError};
use tracing::{debug, info};
use uuid::Uuid;

/// Fresh object key `YYYY/MM/DD/<uuid>.<ext>` for `date`.
pub fn artifact_key(date: NaiveDate, ext: &str) -> String {
    format!(
        "{}{}.{}",
        date_prefix(date),
        Uuid::new_v4().simple(),
        ext.trim_start_matches('.')
    )
}

/// Put `data` under a generated date-partitioned key, creating the bucket if
/// it does not exist yet. Returns the key.
pub async fn upload_with_generated_key(
    store: &dyn ObjectStore,
    bucket: &str,
    date: NaiveDate,
    ext: &str,
    data: Bytes,
    content_type: &str,
) -> Result<String, StorageError> {
    if !store.bucket_exists(bucket).await? {
        info!("Bucket {} does not exist, creating it", bucket);
        store.create_bucket(bucket).await?;
    }

    let key = artifact_key(date, ext);
    let len = data.len();
    store.put_object(bucket, &key, data, content_type).await?;
    debug!("Uploaded {}/{} ({} bytes)", bucket, key, len);
    Ok(key)
}
