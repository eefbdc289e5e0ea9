//! LocalObjectStore: buckets on local disk with metadata in SQLite.
//! Payloads are sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`;
//! writes go to a temp file that is renamed into place so readers never see
//! a partially written object.

use super::{ObjectStore, StoreError, StoreResult};
use crate::models::object::ObjectRecord;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MIGRATION_SQL: &str = include_str!("../../../migrations/0001_init.sql");
const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Connect to `database_url` (creating the file if needed), apply the
    /// schema and make sure `base_path` exists.
    pub async fn open(database_url: &str, base_path: impl Into<PathBuf>) -> StoreResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;

        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("file:");
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self::new(Arc::new(pool), base_path);
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("Running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Rejects empty or oversized keys and keys that could escape the bucket
    /// directory.
    fn ensure_key_safe(&self, key: &str) -> StoreResult<()> {
        let invalid = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.split('/').any(|segment| segment == "..")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if invalid {
            return Err(StoreError::InvalidObjectKey(key.to_string()));
        }
        Ok(())
    }

    /// S3-like bucket naming: 3–63 lowercase letters, digits, dots and
    /// hyphens, alphanumeric at both ends, no `..`.
    fn ensure_bucket_name_safe(&self, name: &str) -> StoreResult<()> {
        let reason = if name.len() < BUCKET_NAME_MIN_LEN || name.len() > BUCKET_NAME_MAX_LEN {
            Some("must be between 3 and 63 characters")
        } else if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            Some("allowed characters are lowercase letters, digits, dots, and hyphens")
        } else if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            Some("must start and end with a lowercase letter or digit")
        } else if name.contains("..") {
            Some("cannot contain consecutive dots")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(StoreError::InvalidBucketName {
                name: name.to_string(),
                reason: reason.into(),
            }),
            None => Ok(()),
        }
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// First two bytes of MD5(bucket/key) as hex directory names.
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn validate(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.ensure_bucket_name_safe(bucket)?;
        self.ensure_key_safe(key)
    }

    /// Fetch the metadata row for `bucket/key`.
    pub async fn head(&self, bucket: &str, key: &str) -> StoreResult<ObjectRecord> {
        self.validate(bucket, key)?;
        sqlx::query_as::<_, ObjectRecord>(
            "SELECT id, bucket, key, content_type, size_bytes, etag, last_modified
             FROM objects WHERE bucket = ? AND key = ?",
        )
        .bind(bucket)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => StoreError::Sqlx(other),
        })
    }

    async fn write_payload(&self, file_path: &Path, body: &[u8]) -> StoreResult<()> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(err) = write_synced(&tmp_path, body).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(&tmp_path, file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        Ok(())
    }

    /// Remove empty directories from `start` up to (excluding) `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

async fn write_synced(path: &Path, body: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(body).await?;
    file.flush().await?;
    file.sync_all().await
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Bytes> {
        self.head(bucket, key).await?;

        let file_path = self.object_path(bucket, key);
        match fs::read(&file_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> StoreResult<()> {
        self.validate(bucket, key)?;

        let file_path = self.object_path(bucket, key);
        self.write_payload(&file_path, &body).await?;

        let etag = format!("{:x}", md5::compute(&body));
        let insert_result = sqlx::query(
            r#"
            INSERT INTO objects (id, bucket, key, content_type, size_bytes, etag, last_modified)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket)
        .bind(key)
        .bind(content_type)
        .bind(body.len() as i64)
        .bind(&etag)
        .bind(Utc::now())
        .execute(&*self.db)
        .await;

        match insert_result {
            Ok(_) => {
                debug!("stored {}/{} ({} bytes, etag {})", bucket, key, body.len(), etag);
                Ok(())
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StoreError::Sqlx(err))
            }
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.validate(bucket, key)?;

        let result = sqlx::query("DELETE FROM objects WHERE bucket = ? AND key = ?")
            .bind(bucket)
            .bind(key)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            debug!("{}/{} had no metadata row", bucket, key);
        }

        let file_path = self.object_path(bucket, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(bucket);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn open_store(dir: &Path) -> LocalObjectStore {
        let url = format!("sqlite://{}", dir.join("meta/objects.db").display());
        LocalObjectStore::open(&url, dir.join("objects"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn put_then_get_round_trips_payload_and_metadata() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;

        store
            .put(
                "thumbnails",
                "photos/cat.jpg",
                Bytes::from_static(b"webp-bytes"),
                "image/webp",
            )
            .await
            .unwrap();

        let body = store.get("thumbnails", "photos/cat.jpg").await.unwrap();
        assert_eq!(&body[..], b"webp-bytes");

        let record = store.head("thumbnails", "photos/cat.jpg").await.unwrap();
        assert_eq!(record.content_type.as_deref(), Some("image/webp"));
        assert_eq!(record.size_bytes, 10);
        assert_eq!(record.etag, format!("{:x}", md5::compute(b"webp-bytes")));
    }

    #[tokio::test]
    async fn put_overwrites_existing_object() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;

        store
            .put("thumbnails", "a.png", Bytes::from_static(b"one"), "image/webp")
            .await
            .unwrap();
        store
            .put("thumbnails", "a.png", Bytes::from_static(b"second"), "image/webp")
            .await
            .unwrap();

        assert_eq!(&store.get("thumbnails", "a.png").await.unwrap()[..], b"second");
        assert_eq!(store.head("thumbnails", "a.png").await.unwrap().size_bytes, 6);
    }

    #[tokio::test]
    async fn get_missing_object_is_not_found() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;

        let err = store.get("documents", "missing.pdf").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_prunes_directories() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;

        store
            .put("thumbnails", "x/y.png", Bytes::from_static(b"data"), "image/webp")
            .await
            .unwrap();
        let shard_dir = store
            .object_path("thumbnails", "x/y.png")
            .parent()
            .unwrap()
            .to_path_buf();

        store.delete("thumbnails", "x/y.png").await.unwrap();
        store.delete("thumbnails", "x/y.png").await.unwrap();

        assert!(matches!(
            store.get("thumbnails", "x/y.png").await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(!shard_dir.exists());
    }

    #[tokio::test]
    async fn delete_of_never_written_key_succeeds() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;

        store.delete("thumbnails", "never/existed.webp").await.unwrap();
    }

    #[tokio::test]
    async fn unsafe_keys_and_buckets_are_rejected() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;

        for key in ["", "/abs", "../escape", "a/../../b", "back\\slash"] {
            let err = store
                .put("thumbnails", key, Bytes::new(), "image/webp")
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidObjectKey(_)), "{key}");
        }

        let err = store.delete("Bad_Bucket", "k").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidBucketName { .. }));
    }
}
