//! In-memory backends for engine and backend tests.
//!
//! Every backend is thread-safe and can be shared behind an `Arc`. Fault
//! injection knobs let tests script listing errors, unreadable entries, and
//! failing writes.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use docsync_core::{
    timestamp, DocumentIndex, IndexHit, ListedEntry, LockAcquireResult, LockManager,
    ObjectStore, ObjectSummary, RangePageQuery, StorageError, StudentRecord, SyncStream,
    WatermarkStore,
};
use serde_json::Value;

/// Message carried by injected listing failures.
pub const SIMULATED_NETWORK_ERROR: &str = "simulated network error";

const PROJECTED_FIELDS: [&str; 5] = ["id", "name", "age", "sex", "updateTime"];

// =============================================================================
// Object store
// =============================================================================

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    last_modified: DateTime<Utc>,
}

/// In-memory object store.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    buckets: Mutex<BTreeSet<String>>,
    /// (bucket, key) -> object
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    /// Extra entries returned by listings of (bucket, prefix)
    extra_entries: Mutex<Vec<(String, String, ListedEntry)>>,
    /// prefix -> remaining injected failures
    list_failures: Mutex<HashMap<String, usize>>,
    get_failures: Mutex<HashSet<String>>,
    fail_puts: AtomicBool,
    list_calls: Mutex<Vec<String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object, creating its bucket if needed.
    pub fn insert(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Bytes>,
        last_modified: DateTime<Utc>,
    ) {
        self.buckets.lock().unwrap().insert(bucket.to_string());
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: data.into(),
                content_type: "application/json".to_string(),
                last_modified,
            },
        );
    }

    /// Make listings of `prefix` also return `entry`.
    pub fn add_listing_entry(&self, bucket: &str, prefix: &str, entry: ListedEntry) {
        self.buckets.lock().unwrap().insert(bucket.to_string());
        self.extra_entries
            .lock()
            .unwrap()
            .push((bucket.to_string(), prefix.to_string(), entry));
    }

    /// Fail the next `times` listings of `prefix`.
    pub fn fail_listing(&self, prefix: &str, times: usize) {
        self.list_failures
            .lock()
            .unwrap()
            .insert(prefix.to_string(), times);
    }

    /// Fail every listing of `prefix`.
    pub fn fail_listing_always(&self, prefix: &str) {
        self.fail_listing(prefix, usize::MAX);
    }

    /// Fail reads of `key`.
    pub fn fail_get(&self, key: &str) {
        self.get_failures.lock().unwrap().insert(key.to_string());
    }

    /// Make every put fail.
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Prefixes passed to `list_objects`, in call order.
    pub fn list_calls(&self) -> Vec<String> {
        self.list_calls.lock().unwrap().clone()
    }

    /// Keys stored in a bucket, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Content and content type of a stored object.
    pub fn object(&self, bucket: &str, key: &str) -> Option<(Bytes, String)> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| (o.data.clone(), o.content_type.clone()))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
        Ok(self.buckets.lock().unwrap().contains(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        self.buckets.lock().unwrap().insert(bucket.to_string());
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ListedEntry>, StorageError> {
        self.list_calls.lock().unwrap().push(prefix.to_string());

        {
            let mut failures = self.list_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(prefix) {
                if *remaining > 0 {
                    if *remaining != usize::MAX {
                        *remaining -= 1;
                    }
                    return Err(StorageError::Io(SIMULATED_NETWORK_ERROR.to_string()));
                }
            }
        }

        if !self.buckets.lock().unwrap().contains(bucket) {
            return Err(StorageError::NotFound(format!("bucket {}", bucket)));
        }

        let mut entries: Vec<ListedEntry> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, k), o)| {
                Ok(ObjectSummary {
                    key: k.clone(),
                    last_modified: o.last_modified,
                    size_bytes: o.data.len() as u64,
                })
            })
            .collect();

        entries.extend(
            self.extra_entries
                .lock()
                .unwrap()
                .iter()
                .filter(|(b, p, _)| b == bucket && p == prefix)
                .map(|(_, _, entry)| entry.clone()),
        );

        Ok(entries)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Bytes>, StorageError> {
        if self.get_failures.lock().unwrap().contains(key) {
            return Err(StorageError::Io(format!("simulated read failure for {}", key)));
        }
        Ok(self.object(bucket, key).map(|(data, _)| data))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Io("simulated put failure".to_string()));
        }
        if !self.buckets.lock().unwrap().contains(bucket) {
            return Err(StorageError::NotFound(format!("bucket {}", bucket)));
        }
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

// =============================================================================
// Document index
// =============================================================================

/// In-memory document index with Elasticsearch-like sort and cursor
/// semantics: hits sorted by `(updateTime millis, id)`, sort values
/// `[millis, id]`.
#[derive(Debug)]
pub struct MemoryIndex {
    name: String,
    docs: Mutex<BTreeMap<String, Value>>,
    search_calls: AtomicUsize,
    /// 1-based search call number that fails
    fail_search_call: Mutex<Option<usize>>,
    fail_upserts: Mutex<HashSet<String>>,
}

impl MemoryIndex {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            docs: Mutex::new(BTreeMap::new()),
            search_calls: AtomicUsize::new(0),
            fail_search_call: Mutex::new(None),
            fail_upserts: Mutex::new(HashSet::new()),
        }
    }

    /// Store a record as a document.
    pub fn insert(&self, record: &StudentRecord) {
        let value = serde_json::to_value(record).expect("record serializes");
        self.insert_raw(&record.id, value);
    }

    /// Store an arbitrary document source.
    pub fn insert_raw(&self, id: &str, source: Value) {
        self.docs.lock().unwrap().insert(id.to_string(), source);
    }

    /// Fail the `call`-th search (1-based).
    pub fn fail_search_on_call(&self, call: usize) {
        *self.fail_search_call.lock().unwrap() = Some(call);
    }

    /// Fail upserts of `id`.
    pub fn fail_upsert(&self, id: &str) {
        self.fail_upserts.lock().unwrap().insert(id.to_string());
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn document(&self, id: &str) -> Option<Value> {
        self.docs.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.docs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn modified_millis(source: &Value) -> Option<i64> {
        match source.get("updateTime")? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => timestamp::parse(s).ok().map(|t| t.timestamp_millis()),
            _ => None,
        }
    }

    fn project(source: &Value) -> Value {
        let mut projected = serde_json::Map::new();
        for field in PROJECTED_FIELDS {
            if let Some(v) = source.get(field) {
                projected.insert(field.to_string(), v.clone());
            }
        }
        Value::Object(projected)
    }

    fn decode(id: &str, source: &Value) -> Result<StudentRecord, StorageError> {
        serde_json::from_value(source.clone())
            .map_err(|e| StorageError::Serialization(format!("document {}: {}", id, e)))
    }
}

#[async_trait]
impl DocumentIndex for MemoryIndex {
    fn index_name(&self) -> &str {
        &self.name
    }

    async fn get(&self, id: &str) -> Result<Option<StudentRecord>, StorageError> {
        match self.document(id) {
            Some(source) => Self::decode(id, &source).map(Some),
            None => Ok(None),
        }
    }

    async fn create(&self, record: &StudentRecord) -> Result<String, StorageError> {
        if self.document(&record.id).is_some() {
            return Err(StorageError::InvalidArgument(format!(
                "document {} already exists",
                record.id
            )));
        }
        self.insert(record);
        Ok(record.id.clone())
    }

    async fn upsert(&self, record: &StudentRecord) -> Result<String, StorageError> {
        if self.fail_upserts.lock().unwrap().contains(&record.id) {
            return Err(StorageError::Io(format!(
                "simulated upsert failure for {}",
                record.id
            )));
        }
        self.insert(record);
        Ok(record.id.clone())
    }

    async fn update(&self, record: &StudentRecord) -> Result<String, StorageError> {
        let mut docs = self.docs.lock().unwrap();
        let existing = docs
            .get_mut(&record.id)
            .ok_or_else(|| StorageError::NotFound(format!("document {}", record.id)))?;

        let patch = serde_json::to_value(record)?;
        if let (Value::Object(target), Value::Object(fields)) = (existing, patch) {
            for (k, v) in fields {
                target.insert(k, v);
            }
        }
        Ok(record.id.clone())
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.docs.lock().unwrap().remove(id).is_some())
    }

    async fn list(&self, limit: usize) -> Result<Vec<StudentRecord>, StorageError> {
        let docs = self.docs.lock().unwrap();
        docs.iter()
            .take(limit)
            .map(|(id, source)| Self::decode(id, source))
            .collect()
    }

    async fn search_modified_after(
        &self,
        query: &RangePageQuery,
    ) -> Result<Vec<IndexHit>, StorageError> {
        let call = self.search_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.fail_search_call.lock().unwrap() == Some(call) {
            return Err(StorageError::Query(format!("simulated search failure on call {}", call)));
        }

        let after_millis = query.modified_after.timestamp_millis();
        let cursor = query.search_after.as_ref().and_then(|values| {
            Some((values.first()?.as_i64()?, values.get(1)?.as_str()?.to_string()))
        });

        let docs = self.docs.lock().unwrap();
        let mut matching: Vec<(i64, &String, &Value)> = docs
            .iter()
            .filter_map(|(id, source)| {
                let millis = Self::modified_millis(source)?;
                (millis > after_millis).then_some((millis, id, source))
            })
            .collect();
        matching.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        Ok(matching
            .into_iter()
            .filter(|(millis, id, _)| match &cursor {
                Some((c_millis, c_id)) => (*millis, id.as_str()) > (*c_millis, c_id.as_str()),
                None => true,
            })
            .take(query.page_size)
            .map(|(millis, id, source)| IndexHit {
                id: id.clone(),
                source: Some(Self::project(source)),
                sort: vec![Value::from(millis), Value::from(id.clone())],
            })
            .collect())
    }
}

// =============================================================================
// Watermarks and locks
// =============================================================================

/// In-memory watermark store.
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    values: DashMap<SyncStream, DateTime<Utc>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_watermark(self, stream: SyncStream, instant: DateTime<Utc>) -> Self {
        self.values.insert(stream, instant);
        self
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Stored value, without the bootstrap default.
    pub fn get(&self, stream: SyncStream) -> Option<DateTime<Utc>> {
        self.values.get(&stream).map(|v| *v)
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, stream: SyncStream) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(self.get(stream))
    }

    async fn write(&self, stream: SyncStream, instant: DateTime<Utc>) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io("simulated watermark write failure".to_string()));
        }
        self.values.insert(stream, instant);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reset(&self, stream: SyncStream) -> Result<(), StorageError> {
        self.values.remove(&stream);
        Ok(())
    }
}

/// In-memory lock manager.
#[derive(Debug, Default)]
pub struct MemoryLock {
    /// resource_id -> holder_id
    holders: DashMap<String, String>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holder(&self, resource_id: &str) -> Option<String> {
        self.holders.get(resource_id).map(|h| h.clone())
    }
}

#[async_trait]
impl LockManager for MemoryLock {
    async fn acquire(
        &self,
        resource_id: &str,
        holder_id: &str,
        _ttl: Duration,
    ) -> Result<LockAcquireResult, StorageError> {
        let entry = self
            .holders
            .entry(resource_id.to_string())
            .or_insert_with(|| holder_id.to_string());
        if entry.value() == holder_id {
            Ok(LockAcquireResult::acquired())
        } else {
            Ok(LockAcquireResult::not_acquired())
        }
    }

    async fn release(&self, resource_id: &str, holder_id: &str) -> Result<(), StorageError> {
        self.holders
            .remove_if(resource_id, |_, holder| holder == holder_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_index_pages_follow_cursor() {
        let index = MemoryIndex::new("student");
        let base = Utc.with_ymd_and_hms(2025, 9, 5, 0, 0, 0).unwrap();
        for (id, offset) in [("b", 10), ("a", 10), ("c", 5), ("d", -5)] {
            index.insert(&crate::student_at(id, base, offset));
        }

        let mut query = RangePageQuery {
            modified_after: base,
            page_size: 2,
            search_after: None,
        };
        let first = index.search_modified_after(&query).await.unwrap();
        assert_eq!(first.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), ["c", "a"]);

        query.search_after = Some(first[1].sort.clone());
        let second = index.search_modified_after(&query).await.unwrap();
        assert_eq!(second.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), ["b"]);
        assert_eq!(index.search_calls(), 2);
    }

    #[tokio::test]
    async fn test_listing_failures_are_consumed() {
        let store = MemoryObjectStore::new();
        let t = Utc.with_ymd_and_hms(2025, 9, 5, 0, 0, 0).unwrap();
        store.insert("b", "2025/09/05/x.json", "{}", t);
        store.fail_listing("2025/09/05/", 1);

        assert!(store.list_objects("b", "2025/09/05/").await.is_err());
        assert_eq!(store.list_objects("b", "2025/09/05/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let lock = MemoryLock::new();
        let ttl = Duration::from_secs(1);
        assert!(lock.acquire("s", "a", ttl).await.unwrap().acquired);
        assert!(!lock.acquire("s", "b", ttl).await.unwrap().acquired);
        lock.release("s", "b").await.unwrap();
        assert_eq!(lock.holder("s").as_deref(), Some("a"));
        lock.release("s", "a").await.unwrap();
        assert!(lock.acquire("s", "b", ttl).await.unwrap().acquired);
    }
}
