//! Fixed-interval job scheduling.

use std::time::Duration;

use docsync_engine::{JobKind, JobRunner};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Run `kind` against `bucket` every `every`, starting immediately, until the
/// shutdown signal is raised. A pass in flight finishes before the loop exits.
pub fn spawn_interval_job(
    runner: JobRunner,
    kind: JobKind,
    bucket: String,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Scheduling {} job for bucket {} every {:?}", kind, bucket, every);
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let stop = tokio::select! {
                _ = ticker.tick() => false,
                _ = shutdown.wait_for(|stop| *stop) => true,
            };
            if stop {
                break;
            }

            let result = runner.run(kind, &bucket).await;
            if result.success {
                info!("Scheduled {} job: {}", kind, result.message);
            } else {
                warn!("Scheduled {} job: {}", kind, result.message);
            }
        }
        info!("Stopped {} schedule", kind);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{FixedOffset, TimeDelta, Utc};
    use docsync_engine::{SyncBackends, SyncOrchestrator, SyncSettings};
    use docsync_testkit::{student, MemoryIndex, MemoryLock, MemoryObjectStore, MemoryWatermarkStore};

    #[tokio::test]
    async fn test_schedule_runs_until_shutdown() {
        let index = Arc::new(MemoryIndex::new("student"));
        index.insert(&student("1", Utc::now() - TimeDelta::minutes(1)));
        let store = Arc::new(MemoryObjectStore::new());
        let backends = SyncBackends {
            index: index.clone(),
            store: store.clone(),
            watermarks: Arc::new(MemoryWatermarkStore::new()),
            locks: Arc::new(MemoryLock::new()),
        };
        let settings = SyncSettings {
            offset: FixedOffset::east_opt(0).unwrap(),
            ..SyncSettings::default()
        };
        let runner = JobRunner::new(Arc::new(SyncOrchestrator::new(backends, settings)));

        let (tx, rx) = watch::channel(false);
        let handle = spawn_interval_job(
            runner,
            JobKind::Export,
            "exports".to_string(),
            Duration::from_millis(20),
            rx,
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        // First tick exports, later ticks find nothing new.
        assert_eq!(store.keys("exports").len(), 1);
        assert!(index.search_calls() >= 2);
    }
}
