use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docsync_core::{format_watermark, parse_watermark, StorageError, SyncStream, WatermarkStore};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

/// Watermark store keeping one UTF-8 text file per stream.
///
/// Files are stored at `{dir}/last_sync_{stream}.txt` and hold a single
/// RFC 3339 instant. Writes go to a temp file in the same directory and are
/// renamed into place, so a failed write never leaves a torn value.
#[derive(Debug, Clone)]
pub struct FileWatermarkStore {
    dir: PathBuf,
}

impl FileWatermarkStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the watermark file for a stream.
    pub fn path(&self, stream: SyncStream) -> PathBuf {
        self.dir.join(format!("last_sync_{}.txt", stream))
    }

    fn temp_path(&self, stream: SyncStream) -> PathBuf {
        self.dir.join(format!(
            ".last_sync_{}.{}.tmp",
            stream,
            uuid::Uuid::new_v4().simple()
        ))
    }
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    #[instrument(skip(self), level = "debug")]
    async fn load(&self, stream: SyncStream) -> Result<Option<DateTime<Utc>>, StorageError> {
        let path = self.path(stream);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::Io(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let instant = parse_watermark(&text)?;
        debug!("Loaded watermark {} = {}", stream, format_watermark(instant));
        Ok(Some(instant))
    }

    #[instrument(skip(self), level = "debug")]
    async fn write(&self, stream: SyncStream, instant: DateTime<Utc>) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            StorageError::Io(format!(
                "Failed to create watermark dir {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let path = self.path(stream);
        let temp = self.temp_path(stream);
        let text = format_watermark(instant);

        fs::write(&temp, &text).await.map_err(|e| {
            StorageError::Io(format!("Failed to write {}: {}", temp.display(), e))
        })?;

        if let Err(e) = fs::rename(&temp, &path).await {
            if let Err(cleanup) = fs::remove_file(&temp).await {
                warn!("Failed to remove temp file {}: {}", temp.display(), cleanup);
            }
            return Err(StorageError::Io(format!(
                "Failed to replace {}: {}",
                path.display(),
                e
            )));
        }

        info!("Watermark {} updated to {}", stream, text);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn reset(&self, stream: SyncStream) -> Result<(), StorageError> {
        let path = self.path(stream);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Watermark {} reset", stream);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(format!(
                "Failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use tempfile::TempDir;

    fn setup() -> (FileWatermarkStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileWatermarkStore::new(temp_dir.path().join("watermarks"));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_missing_file_reads_bootstrap_default() {
        let (store, _temp) = setup();
        let now = Utc.with_ymd_and_hms(2025, 9, 5, 12, 0, 0).unwrap();

        assert!(store.load(SyncStream::StoreIngest).await.unwrap().is_none());
        assert_eq!(
            store.read(SyncStream::StoreIngest, now).await,
            now - TimeDelta::hours(1)
        );
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (store, _temp) = setup();
        let now = Utc.with_ymd_and_hms(2025, 9, 5, 12, 0, 0).unwrap();
        let instant = Utc.with_ymd_and_hms(2025, 9, 5, 11, 50, 0).unwrap()
            + TimeDelta::microseconds(1234);

        store.write(SyncStream::IndexExport, instant).await.unwrap();

        assert_eq!(store.read(SyncStream::IndexExport, now).await, instant);
        // Streams are independent
        assert!(store.load(SyncStream::StoreIngest).await.unwrap().is_none());

        let on_disk = std::fs::read_to_string(store.path(SyncStream::IndexExport)).unwrap();
        assert_eq!(on_disk, "2025-09-05T11:50:00.001234Z");
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let (store, temp) = setup();
        let t1 = Utc.with_ymd_and_hms(2025, 9, 5, 1, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 9, 5, 2, 0, 0).unwrap();

        store.write(SyncStream::StoreIngest, t1).await.unwrap();
        store.write(SyncStream::StoreIngest, t2).await.unwrap();

        assert_eq!(store.load(SyncStream::StoreIngest).await.unwrap(), Some(t2));
        let entries: Vec<_> = std::fs::read_dir(temp.path().join("watermarks"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["last_sync_store_ingest.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_file_falls_back() {
        let (store, _temp) = setup();
        let now = Utc.with_ymd_and_hms(2025, 9, 5, 12, 0, 0).unwrap();
        std::fs::create_dir_all(store.path(SyncStream::StoreIngest).parent().unwrap()).unwrap();
        std::fs::write(store.path(SyncStream::StoreIngest), "garbage").unwrap();

        assert!(matches!(
            store.load(SyncStream::StoreIngest).await,
            Err(StorageError::Parse(_))
        ));
        assert_eq!(
            store.read(SyncStream::StoreIngest, now).await,
            now - TimeDelta::hours(1)
        );
    }

    #[tokio::test]
    async fn test_failed_write_cleans_up_temp_file() {
        let (store, temp) = setup();
        let t1 = Utc.with_ymd_and_hms(2025, 9, 5, 1, 0, 0).unwrap();
        store.write(SyncStream::StoreIngest, t1).await.unwrap();

        // A non-empty directory squatting on the target path makes the rename fail.
        let target = store.path(SyncStream::IndexExport);
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("keep"), "x").unwrap();

        let err = store.write(SyncStream::IndexExport, t1).await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));

        let leftovers: Vec<_> = std::fs::read_dir(temp.path().join("watermarks"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|name| name.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "leftover temp files: {:?}", leftovers);
        assert_eq!(store.load(SyncStream::StoreIngest).await.unwrap(), Some(t1));
    }

    #[tokio::test]
    async fn test_reset() {
        let (store, _temp) = setup();
        let t1 = Utc.with_ymd_and_hms(2025, 9, 5, 1, 0, 0).unwrap();
        store.write(SyncStream::StoreIngest, t1).await.unwrap();

        store.reset(SyncStream::StoreIngest).await.unwrap();
        assert!(store.load(SyncStream::StoreIngest).await.unwrap().is_none());

        // Resetting twice is fine
        store.reset(SyncStream::StoreIngest).await.unwrap();
    }
}
