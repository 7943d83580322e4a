use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_s3::config::{BehaviorVersion, Credentials};
use aws_sdk_s3::primitives::{ByteStream, DateTime as S3DateTime};
use aws_sdk_s3::types::Object;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use docsync_core::{ListedEntry, ObjectMetadataError, ObjectStore, ObjectSummary, StorageError};
use tracing::{debug, instrument};

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Build an S3 client with path-style addressing, as MinIO expects.
pub fn build_s3_client(settings: &S3Settings) -> S3Client {
    let credentials = Credentials::new(
        &settings.access_key_id,
        &settings.secret_access_key,
        None,
        None,
        "docsync",
    );

    let config = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .credentials_provider(credentials)
        .region(Region::new(settings.region.clone()))
        .endpoint_url(&settings.endpoint)
        .force_path_style(true)
        .build();

    S3Client::from_conf(config)
}

/// Object store backed by an S3-compatible service.
///
/// Listings are recursive (no delimiter) and follow continuation tokens until
/// the listing is exhausted. An entry with a missing key or an unreadable
/// modification time is reported as an [`ObjectMetadataError`] in place,
/// without failing the rest of the listing.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    fn convert_time(time: &S3DateTime) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(time.secs(), time.subsec_nanos())
    }

    fn listed_entry(obj: Object) -> ListedEntry {
        let Some(key) = obj.key else {
            return Err(ObjectMetadataError {
                key_hint: None,
                message: "listing entry without a key".to_string(),
            });
        };

        let Some(last_modified) = obj.last_modified.as_ref().and_then(Self::convert_time) else {
            return Err(ObjectMetadataError {
                key_hint: Some(key),
                message: "missing or out-of-range last modified time".to_string(),
            });
        };

        Ok(ObjectSummary {
            key,
            last_modified,
            size_bytes: obj.size.unwrap_or(0).max(0) as u64,
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), level = "debug")]
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(StorageError::Io(format!(
                        "S3 head_bucket error: {}",
                        service_error
                    )))
                }
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => {
                debug!("Created bucket {}", bucket);
                Ok(())
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_bucket_already_owned_by_you()
                    || service_error.is_bucket_already_exists()
                {
                    Ok(())
                } else {
                    Err(StorageError::Io(format!(
                        "S3 create_bucket error: {}",
                        service_error
                    )))
                }
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ListedEntry>, StorageError> {
        let mut entries = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let output = request
                .send()
                .await
                .map_err(|e| StorageError::Io(format!("S3 list_objects error: {}", e)))?;

            if let Some(contents) = output.contents {
                entries.extend(contents.into_iter().map(Self::listed_entry));
            }

            if output.is_truncated.unwrap_or(false) {
                continuation_token = output.next_continuation_token;
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        debug!("Listed {} entries under {}/{}", entries.len(), bucket, prefix);
        Ok(entries)
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Bytes>, StorageError> {
        let result = self.client.get_object().bucket(bucket).key(key).send().await;

        match result {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| StorageError::Io(format!("Failed to read S3 object body: {}", e)))?
                    .into_bytes();
                Ok(Some(bytes))
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(StorageError::Io(format!("S3 get_object error: {}", service_error)))
                }
            }
        }
    }

    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let len = data.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::Io(format!("S3 put_object error: {}", e)))?;
        debug!("Put {}/{} ({} bytes)", bucket, key, len);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Io(format!("S3 delete_object error: {}", e)))?;
        Ok(())
    }
}
