use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;

/// Result of a lock acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockAcquireResult {
    pub acquired: bool,
}

impl LockAcquireResult {
    pub fn acquired() -> Self {
        Self { acquired: true }
    }

    pub fn not_acquired() -> Self {
        Self { acquired: false }
    }
}

/// Lease-style mutual exclusion keyed by resource id.
///
/// Sync passes take the lock on their stream id so at most one pass per
/// stream runs at a time. Acquisition never blocks.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Try to acquire `resource_id` for `holder_id`. Re-acquiring a lock the
    /// holder already owns succeeds.
    async fn acquire(
        &self,
        resource_id: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<LockAcquireResult, StorageError>;

    /// Release a lock. Releasing a lock held by someone else is a no-op.
    async fn release(&self, resource_id: &str, holder_id: &str) -> Result<(), StorageError>;
}
