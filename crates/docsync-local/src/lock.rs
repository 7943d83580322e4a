use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use docsync_core::{LockAcquireResult, LockManager, StorageError};
use fs2::FileExt;
use tracing::{debug, instrument};

/// File-based pass lock using OS-level exclusive file locking.
///
/// - Opens the lock file and takes a non-blocking exclusive lock (flock on
///   Unix, LockFile on Windows)
/// - Holds the file handle while the lock is held; dropping it releases
/// - A crashed process releases its locks when the OS closes its descriptors
///
/// Lock files are stored at `{base_dir}/locks/{resource_id}.lock`.
#[derive(Debug)]
pub struct FileLock {
    base_dir: PathBuf,
    /// Active lock handles: resource_id -> (holder_id, File)
    handles: Mutex<HashMap<String, (String, File)>>,
}

impl FileLock {
    /// Create a new FileLock with the given base directory.
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn locks_dir(&self) -> PathBuf {
        self.base_dir.join("locks")
    }

    fn lock_path(&self, resource_id: &str) -> PathBuf {
        self.locks_dir().join(format!("{}.lock", resource_id))
    }

    fn handles(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, (String, File)>>, StorageError> {
        self.handles
            .lock()
            .map_err(|_| StorageError::Lock("Lock handle table poisoned".to_string()))
    }
}

#[async_trait]
impl LockManager for FileLock {
    #[instrument(skip(self), level = "debug")]
    async fn acquire(
        &self,
        resource_id: &str,
        holder_id: &str,
        _ttl: Duration, // the OS drops the lock with the process
    ) -> Result<LockAcquireResult, StorageError> {
        {
            let handles = self.handles()?;
            if let Some((existing_holder, _)) = handles.get(resource_id) {
                if existing_holder == holder_id {
                    debug!("Lock on {} already held by {}", resource_id, holder_id);
                    return Ok(LockAcquireResult::acquired());
                }
                debug!(
                    "Lock on {} held by {} (requested by {})",
                    resource_id, existing_holder, holder_id
                );
                return Ok(LockAcquireResult::not_acquired());
            }
        }

        let dir = self.locks_dir();
        std::fs::create_dir_all(&dir).map_err(|e| {
            StorageError::Io(format!("Failed to create locks dir {}: {}", dir.display(), e))
        })?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path(resource_id))
            .map_err(|e| StorageError::Io(format!("Failed to open lock file: {}", e)))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                let mut handles = self.handles()?;
                match handles.entry(resource_id.to_string()) {
                    // Another task in this process won the race between the
                    // check above and the flock.
                    Entry::Occupied(_) => Ok(LockAcquireResult::not_acquired()),
                    Entry::Vacant(slot) => {
                        slot.insert((holder_id.to_string(), file));
                        debug!("Acquired lock on {} for {}", resource_id, holder_id);
                        Ok(LockAcquireResult::acquired())
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!(
                    "Lock on {} held by another process (requested by {})",
                    resource_id, holder_id
                );
                Ok(LockAcquireResult::not_acquired())
            }
            Err(e) => Err(StorageError::Lock(format!("Failed to acquire lock: {}", e))),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn release(&self, resource_id: &str, holder_id: &str) -> Result<(), StorageError> {
        let mut handles = self.handles()?;
        match handles.entry(resource_id.to_string()) {
            Entry::Occupied(entry) => {
                let (existing_holder, _) = entry.get();
                if existing_holder == holder_id {
                    let (_, file) = entry.remove();
                    let _ = fs2::FileExt::unlock(&file);
                    debug!("Released lock on {} by {}", resource_id, holder_id);
                } else {
                    debug!(
                        "Cannot release lock on {}: held by {} not {}",
                        resource_id, existing_holder, holder_id
                    );
                }
            }
            Entry::Vacant(_) => {
                debug!(
                    "Lock on {} not found for release by {}",
                    resource_id, holder_id
                );
            }
        }

        Ok(())
    }
}
