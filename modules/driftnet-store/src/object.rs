// Blob storage behind an opaque-key contract. The Postgres backend keeps
// payloads in a bytea column; the in-memory backend serves tests and local
// runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use driftnet_common::{IngestError, Result};

/// Metadata stored alongside every object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub original_filename: String,
    pub user_id: String,
    pub upload_timestamp: DateTime<Utc>,
    pub file_size: u64,
    pub content_md5: String,
    /// Set for PDFs: whether the payload carried the `%PDF` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_header_ok: Option<bool>,
}

impl ObjectMetadata {
    pub fn new(original_filename: &str, user_id: &str, bytes: &[u8]) -> Self {
        let is_pdf = original_filename.to_lowercase().ends_with(".pdf");
        Self {
            original_filename: original_filename.to_string(),
            user_id: user_id.to_string(),
            upload_timestamp: Utc::now(),
            file_size: bytes.len() as u64,
            content_md5: driftnet_common::fingerprint(bytes),
            pdf_header_ok: is_pdf.then(|| bytes.starts_with(b"%PDF")),
        }
    }
}

/// Byte-exact storage of blobs under slash-separated keys.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Postgres-backed object store. Keys are idempotent: a repeated put of the
/// same key overwrites in place.
pub struct PostgresObjectStore {
    pool: PgPool,
    bucket: String,
}

impl PostgresObjectStore {
    pub fn new(pool: PgPool, bucket: &str) -> Self {
        Self {
            pool,
            bucket: bucket.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for PostgresObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<()> {
        let metadata_json =
            serde_json::to_value(metadata).map_err(|e| anyhow::anyhow!("metadata encode: {e}"))?;
        sqlx::query(
            r#"
            INSERT INTO objects (bucket, key, data, content_type, metadata)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (bucket, key)
            DO UPDATE SET data = EXCLUDED.data,
                          content_type = EXCLUDED.content_type,
                          metadata = EXCLUDED.metadata
            "#,
        )
        .bind(&self.bucket)
        .bind(key)
        .bind(bytes)
        .bind(content_type)
        .bind(&metadata_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let row = sqlx::query_scalar::<_, Vec<u8>>(
            r#"SELECT data FROM objects WHERE bucket = $1 AND key = $2"#,
        )
        .bind(&self.bucket)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(IngestError::NotFound)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query(r#"DELETE FROM objects WHERE bucket = $1 AND key = $2"#)
            .bind(&self.bucket)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-memory object store for tests and single-process local runs.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    corrupt_puts: AtomicBool,
}

#[derive(Clone)]
struct StoredObject {
    data: Vec<u8>,
    #[allow(dead_code)]
    content_type: String,
    metadata: ObjectMetadata,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().expect("lock poisoned").contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn metadata(&self, key: &str) -> Option<ObjectMetadata> {
        self.objects
            .lock()
            .expect("lock poisoned")
            .get(key)
            .map(|o| o.metadata.clone())
    }

    /// Test knob: flip the last byte of every stored payload, simulating
    /// the in-flight corruption that read-back verification must catch.
    pub fn set_corrupt_puts(&self, corrupt: bool) {
        self.corrupt_puts.store(corrupt, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<()> {
        let mut data = bytes.to_vec();
        if self.corrupt_puts.load(Ordering::SeqCst) {
            if let Some(last) = data.last_mut() {
                *last ^= 0xff;
            }
        }
        self.objects.lock().expect("lock poisoned").insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .expect("lock poisoned")
            .get(key)
            .map(|o| o.data.clone())
            .ok_or(IngestError::NotFound)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().expect("lock poisoned").remove(key);
        Ok(())
    }
}
