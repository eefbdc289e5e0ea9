//! Storage collaborators: the source bucket the originals are read from and
//! the destination bucket thumbnails are written to.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use thiserror::Error;

pub mod local;
pub mod s3;

pub use local::LocalObjectStore;
pub use s3::S3ObjectStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Minimal object-store surface used by the dispatcher.
///
/// `delete` must succeed when the key does not exist.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Bytes>;

    async fn put(&self, bucket: &str, key: &str, body: Bytes, content_type: &str)
    -> StoreResult<()>;

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()>;
}
