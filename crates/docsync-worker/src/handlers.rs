//! HTTP handlers.
//!
//! Implements:
//! - POST /save, GET /{id}, GET /getAll, DELETE /{id}, POST /update - single
//!   record CRUD over the index
//! - POST /jobs/{kind} - run one ingest or export pass
//! - GET /health - Health check endpoint

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use docsync_core::{DocumentIndex, StudentRecord};
use docsync_engine::{JobKind, JobRunner, ProcessResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, WorkerError};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub runner: JobRunner,
    pub index: Arc<dyn DocumentIndex>,
    pub list_limit: usize,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    pub index: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct IdResponse {
    pub id: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct DeleteResponse {
    pub id: String,
    pub deleted: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct JobQuery {
    pub bucket: Option<String>,
}

/// GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        index: state.index.index_name().to_string(),
    })
}

/// POST /save - create a document, rejecting existing ids.
pub async fn save_handler(
    State(state): State<AppState>,
    Json(record): Json<StudentRecord>,
) -> Result<Json<IdResponse>> {
    let id = state.index.create(&record).await?;
    info!("Saved student {}", id);
    Ok(Json(IdResponse { id }))
}

/// GET /{id}
pub async fn get_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StudentRecord>> {
    state
        .index
        .get(&id)
        .await?
        .map(Json)
        .ok_or(WorkerError::NotFound(id))
}

/// GET /getAll - bounded by the configured list limit.
pub async fn get_all_handler(State(state): State<AppState>) -> Result<Json<Vec<StudentRecord>>> {
    let records = state.index.list(state.list_limit).await?;
    debug!("Listed {} students", records.len());
    Ok(Json(records))
}

/// DELETE /{id}
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>> {
    if !state.index.delete(&id).await? {
        return Err(WorkerError::NotFound(id));
    }
    info!("Deleted student {}", id);
    Ok(Json(DeleteResponse { id, deleted: true }))
}

/// POST /update - partial update of an existing document.
pub async fn update_handler(
    State(state): State<AppState>,
    Json(record): Json<StudentRecord>,
) -> Result<Json<IdResponse>> {
    let id = state.index.update(&record).await?;
    info!("Updated student {}", id);
    Ok(Json(IdResponse { id }))
}

/// POST /jobs/{kind}
///
/// Parameters come from the raw body (`bucket=<name>` or a bare name) or,
/// when the body is blank, from the `bucket` query parameter.
pub async fn job_handler(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<JobQuery>,
    body: String,
) -> Result<Json<ProcessResult>> {
    let kind: JobKind = kind
        .parse()
        .map_err(|e: docsync_core::StorageError| WorkerError::BadRequest(e.to_string()))?;

    let params = if body.trim().is_empty() {
        query.bucket.unwrap_or_default()
    } else {
        body
    };

    Ok(Json(state.runner.run(kind, &params).await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeDelta, TimeZone, Utc};
    use docsync_engine::{SyncBackends, SyncOrchestrator, SyncSettings};
    use docsync_testkit::{student, MemoryIndex, MemoryLock, MemoryObjectStore, MemoryWatermarkStore};

    fn state(index: Arc<MemoryIndex>, store: Arc<MemoryObjectStore>) -> AppState {
        let backends = SyncBackends {
            index: index.clone(),
            store,
            watermarks: Arc::new(MemoryWatermarkStore::new()),
            locks: Arc::new(MemoryLock::new()),
        };
        let settings = SyncSettings {
            offset: FixedOffset::east_opt(0).unwrap(),
            ..SyncSettings::default()
        };
        AppState {
            runner: JobRunner::new(Arc::new(SyncOrchestrator::new(backends, settings))),
            index,
            list_limit: 2,
        }
    }

    #[tokio::test]
    async fn test_crud_round() {
        let index = Arc::new(MemoryIndex::new("student"));
        let state = state(index.clone(), Arc::new(MemoryObjectStore::new()));
        let t = Utc.with_ymd_and_hms(2025, 9, 5, 10, 0, 0).unwrap();

        let Json(saved) = save_handler(State(state.clone()), Json(student("1", t)))
            .await
            .unwrap();
        assert_eq!(saved.id, "1");

        let duplicate = save_handler(State(state.clone()), Json(student("1", t))).await;
        assert!(duplicate.is_err());

        let mut changed = student("1", t + TimeDelta::minutes(1));
        changed.name = Some("renamed".to_string());
        update_handler(State(state.clone()), Json(changed)).await.unwrap();

        let Json(fetched) = get_handler(State(state.clone()), Path("1".to_string()))
            .await
            .unwrap();
        assert_eq!(fetched.name.as_deref(), Some("renamed"));

        let Json(deleted) = delete_handler(State(state.clone()), Path("1".to_string()))
            .await
            .unwrap();
        assert!(deleted.deleted);
        assert!(matches!(
            get_handler(State(state), Path("1".to_string())).await,
            Err(WorkerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_keeps_fields_absent_from_body() {
        let index = Arc::new(MemoryIndex::new("student"));
        let t = Utc.with_ymd_and_hms(2025, 9, 5, 10, 0, 0).unwrap();
        index.insert(&student("1", t));
        let state = state(index, Arc::new(MemoryObjectStore::new()));

        let patch: StudentRecord = serde_json::from_value(serde_json::json!({
            "id": "1",
            "age": 21,
            "updateTime": "2025-09-05T10:05:00Z"
        }))
        .unwrap();
        update_handler(State(state.clone()), Json(patch)).await.unwrap();

        let Json(fetched) = get_handler(State(state), Path("1".to_string()))
            .await
            .unwrap();
        assert_eq!(fetched.name.as_deref(), Some("student-1"));
        assert_eq!(fetched.sex.as_deref(), Some("F"));
        assert_eq!(fetched.age, Some(21));
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let state = state(
            Arc::new(MemoryIndex::new("student")),
            Arc::new(MemoryObjectStore::new()),
        );
        let result = update_handler(State(state), Json(student("9", Utc::now()))).await;
        assert!(matches!(
            result,
            Err(WorkerError::Storage(docsync_core::StorageError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_get_all_is_bounded() {
        let index = Arc::new(MemoryIndex::new("student"));
        for id in ["1", "2", "3"] {
            index.insert(&student(id, Utc::now()));
        }

        let Json(all) = get_all_handler(State(state(index, Arc::new(MemoryObjectStore::new()))))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_job_handler_reads_query_bucket() {
        let index = Arc::new(MemoryIndex::new("student"));
        let store = Arc::new(MemoryObjectStore::new());
        index.insert(&student("1", Utc::now() - TimeDelta::minutes(1)));

        let Json(result) = job_handler(
            State(state(index, store.clone())),
            Path("export".to_string()),
            Query(JobQuery {
                bucket: Some("exports".to_string()),
            }),
            String::new(),
        )
        .await
        .unwrap();

        assert!(result.success, "{}", result.message);
        assert_eq!(store.keys("exports").len(), 1);
    }

    #[tokio::test]
    async fn test_job_handler_rejects_unknown_kind() {
        let result = job_handler(
            State(state(
                Arc::new(MemoryIndex::new("student")),
                Arc::new(MemoryObjectStore::new()),
            )),
            Path("reindex".to_string()),
            Query(JobQuery::default()),
            "bucket=x".to_string(),
        )
        .await;

        assert!(matches!(result, Err(WorkerError::BadRequest(_))));
    }
}
