use async_trait::async_trait;
use chrono::SecondsFormat;
use docsync_core::{
    DocumentIndex, IndexHit, RangePageQuery, StorageError, StudentRecord,
};
use reqwest::{Client as HttpClient, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

/// Field holding each document's modification time.
pub const MODIFIED_FIELD: &str = "updateTime";

/// Fields returned by incremental range queries.
pub const PROJECTED_FIELDS: [&str; 5] = ["id", "name", "age", "sex", "updateTime"];

/// Tie-breaker sort field for documents sharing a modification time.
const ID_SORT_FIELD: &str = "id.keyword";

/// Connection settings for an Elasticsearch cluster.
#[derive(Debug, Clone)]
pub struct ElasticSettings {
    pub url: String,
    pub index: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Elasticsearch REST client bound to a single index.
pub struct ElasticIndex {
    http_client: HttpClient,
    base_url: String,
    index: String,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct GetResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<Value>,
}

#[derive(Deserialize)]
struct WriteResponse {
    #[serde(rename = "_id")]
    id: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Deserialize)]
struct SearchHits {
    hits: Vec<RawHit>,
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source")]
    source: Option<Value>,
    #[serde(default)]
    sort: Vec<Value>,
}

impl ElasticIndex {
    pub fn new(settings: ElasticSettings) -> Self {
        Self {
            http_client: HttpClient::new(),
            base_url: settings.url.trim_end_matches('/').to_string(),
            index: settings.index,
            username: settings.username,
            password: settings.password,
        }
    }

    fn doc_url(&self, endpoint: &str, id: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.base_url,
            self.index,
            endpoint,
            urlencoding::encode(id)
        )
    }

    fn search_url(&self) -> String {
        format!("{}/{}/_search", self.base_url, self.index)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http_client.request(method, url);
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_ref()),
            None => builder,
        }
    }

    async fn read_error(response: reqwest::Response) -> String {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        format!("status {}: {}", status, text)
    }

    async fn write_doc(
        &self,
        method: Method,
        endpoint: &str,
        id: &str,
        body: &Value,
    ) -> Result<reqwest::Response, StorageError> {
        self.request(method, &self.doc_url(endpoint, id))
            .json(body)
            .send()
            .await
            .map_err(|e| StorageError::Io(format!("Index {} request failed: {}", endpoint, e)))
    }

    async fn search(&self, body: &Value) -> Result<Vec<RawHit>, StorageError> {
        let response = self
            .request(Method::POST, &self.search_url())
            .json(body)
            .send()
            .await
            .map_err(|e| StorageError::Query(format!("Index search request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(StorageError::Query(format!(
                "Index search failed with {}",
                Self::read_error(response).await
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Query(format!("Invalid search response: {}", e)))?;
        Ok(parsed.hits.hits)
    }

    /// Body of one incremental range page.
    fn range_page_body(query: &RangePageQuery) -> Value {
        let after = query
            .modified_after
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        let mut body = json!({
            "size": query.page_size,
            "query": {
                "range": {
                    MODIFIED_FIELD: {
                        "gt": after,
                        "format": "strict_date_optional_time||epoch_millis"
                    }
                }
            },
            "sort": [
                { MODIFIED_FIELD: { "order": "asc" } },
                { ID_SORT_FIELD: { "order": "asc" } }
            ],
            "_source": { "includes": PROJECTED_FIELDS }
        });

        if let Some(cursor) = query.search_after.as_ref().filter(|c| !c.is_empty()) {
            body["search_after"] = Value::Array(cursor.clone());
        }
        body
    }
}

#[async_trait]
impl DocumentIndex for ElasticIndex {
    fn index_name(&self) -> &str {
        &self.index
    }

    #[instrument(skip(self), level = "debug")]
    async fn get(&self, id: &str) -> Result<Option<StudentRecord>, StorageError> {
        let response = self
            .request(Method::GET, &self.doc_url("_doc", id))
            .send()
            .await
            .map_err(|e| StorageError::Io(format!("Index GET request failed: {}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("Document not found: {}", id);
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(StorageError::Io(format!(
                "Index GET failed with {}",
                Self::read_error(response).await
            )));
        }

        let parsed: GetResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Serialization(format!("Invalid GET response: {}", e)))?;

        match (parsed.found, parsed.source) {
            (true, Some(source)) => Ok(Some(serde_json::from_value(source)?)),
            _ => Ok(None),
        }
    }

    #[instrument(skip(self, record), level = "debug", fields(id = %record.id))]
    async fn create(&self, record: &StudentRecord) -> Result<String, StorageError> {
        let body = serde_json::to_value(record)?;
        let response = self
            .write_doc(Method::PUT, "_create", &record.id, &body)
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Err(StorageError::InvalidArgument(format!(
                "Document {} already exists",
                record.id
            )));
        }
        if !response.status().is_success() {
            return Err(StorageError::Io(format!(
                "Index create failed with {}",
                Self::read_error(response).await
            )));
        }

        let written: WriteResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Serialization(format!("Invalid create response: {}", e)))?;
        Ok(written.id)
    }

    #[instrument(skip(self, record), level = "debug", fields(id = %record.id))]
    async fn upsert(&self, record: &StudentRecord) -> Result<String, StorageError> {
        let body = serde_json::to_value(record)?;
        let response = self.write_doc(Method::PUT, "_doc", &record.id, &body).await?;

        if !response.status().is_success() {
            return Err(StorageError::Io(format!(
                "Index upsert failed with {}",
                Self::read_error(response).await
            )));
        }

        let written: WriteResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Serialization(format!("Invalid upsert response: {}", e)))?;
        debug!("Upserted document {}", written.id);
        Ok(written.id)
    }

    #[instrument(skip(self, record), level = "debug", fields(id = %record.id))]
    async fn update(&self, record: &StudentRecord) -> Result<String, StorageError> {
        let body = json!({ "doc": serde_json::to_value(record)? });
        let response = self
            .write_doc(Method::POST, "_update", &record.id, &body)
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(format!("Document {}", record.id)));
        }
        if !response.status().is_success() {
            return Err(StorageError::Io(format!(
                "Index update failed with {}",
                Self::read_error(response).await
            )));
        }

        let written: WriteResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Serialization(format!("Invalid update response: {}", e)))?;
        Ok(written.id)
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let response = self
            .request(Method::DELETE, &self.doc_url("_doc", id))
            .send()
            .await
            .map_err(|e| StorageError::Io(format!("Index DELETE request failed: {}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(StorageError::Io(format!(
                "Index DELETE failed with {}",
                Self::read_error(response).await
            )));
        }

        debug!("Deleted document {}", id);
        Ok(true)
    }

    #[instrument(skip(self), level = "debug")]
    async fn list(&self, limit: usize) -> Result<Vec<StudentRecord>, StorageError> {
        let body = json!({ "size": limit, "query": { "match_all": {} } });
        let hits = self.search(&body).await?;

        hits.into_iter()
            .filter_map(|hit| hit.source)
            .map(|source| serde_json::from_value(source).map_err(StorageError::from))
            .collect()
    }

    #[instrument(skip(self), level = "debug")]
    async fn search_modified_after(
        &self,
        query: &RangePageQuery,
    ) -> Result<Vec<IndexHit>, StorageError> {
        let hits = self.search(&Self::range_page_body(query)).await?;
        debug!("Range page returned {} hits", hits.len());

        Ok(hits
            .into_iter()
            .map(|hit| IndexHit {
                id: hit.id,
                source: hit.source,
                sort: hit.sort,
            })
            .collect())
    }
}
