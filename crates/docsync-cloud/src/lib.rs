//! Remote backends for docsync.
//!
//! - [`S3ObjectStore`]: any S3-compatible object store (MinIO, AWS, R2),
//!   path-style addressing.
//! - [`ElasticIndex`]: Elasticsearch document index over its REST API.
//! - [`ObjectWatermarkStore`]: watermarks kept as small text objects.

mod elastic;
mod s3;
mod watermark;

pub use elastic::{ElasticIndex, ElasticSettings, MODIFIED_FIELD, PROJECTED_FIELDS};
pub use s3::{build_s3_client, S3ObjectStore, S3Settings};
pub use watermark::ObjectWatermarkStore;
