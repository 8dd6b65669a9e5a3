// Document records. The `(user_id, content_hash)` unique index is the
// dedup anchor: re-ingesting identical bytes resolves to one record.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use driftnet_common::{Document, DocumentStatus, DocumentType, Result};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new record. Returns false when a record with the same
    /// `(user_id, content_hash)` already exists, so concurrent ingests of
    /// identical bytes converge on the first writer's document.
    async fn insert(&self, document: &Document) -> Result<bool>;

    async fn get_owned(&self, document_id: Uuid, user_id: &str) -> Result<Option<Document>>;

    async fn find_by_hash(&self, user_id: &str, content_hash: &str) -> Result<Option<Document>>;

    /// Atomic end-of-pipeline update: status, content, extraction outcome,
    /// vector linkage, and `processed_at` in one write.
    async fn finalize(&self, document: &Document) -> Result<()>;

    async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<Document>>;

    async fn list_for_session(&self, session_id: &str) -> Result<Vec<Document>>;

    async fn delete_owned(&self, document_id: Uuid, user_id: &str) -> Result<bool>;

    /// Cascade used by task deletion. Returns the removed documents so the
    /// caller can clean up objects and vector files.
    async fn delete_for_task(&self, task_id: Uuid) -> Result<Vec<Document>>;
}

// --- Postgres ---

pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    document_id: Uuid,
    user_id: String,
    task_id: Option<Uuid>,
    session_id: Option<String>,
    filename: String,
    object_key: String,
    file_size: i64,
    document_type: String,
    content_hash: String,
    status: String,
    content: String,
    page_count: Option<i32>,
    extraction_method: Option<String>,
    vector_store_id: Option<String>,
    vector_file_id: Option<String>,
    last_error: Option<String>,
    metadata: serde_json::Value,
    uploaded_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl DocumentRow {
    fn into_document(self) -> Result<Document> {
        let status = DocumentStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!("corrupt document row: {e}"))?;
        let document_type = DocumentType::from_str(&self.document_type)
            .map_err(|e| anyhow::anyhow!("corrupt document row: {e}"))?;
        Ok(Document {
            document_id: self.document_id,
            user_id: self.user_id,
            task_id: self.task_id,
            session_id: self.session_id,
            filename: self.filename,
            object_key: self.object_key,
            file_size: self.file_size as u64,
            document_type,
            content_hash: self.content_hash,
            status,
            content: self.content,
            page_count: self.page_count.map(|p| p as u32),
            extraction_method: self.extraction_method,
            vector_store_id: self.vector_store_id,
            vector_file_id: self.vector_file_id,
            last_error: self.last_error,
            metadata: self.metadata,
            uploaded_at: self.uploaded_at,
            processed_at: self.processed_at,
        })
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn insert(&self, document: &Document) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO documents
                (document_id, user_id, task_id, session_id, filename, object_key,
                 file_size, document_type, content_hash, status, content,
                 page_count, extraction_method, vector_store_id, vector_file_id,
                 last_error, metadata, uploaded_at, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (user_id, content_hash) DO NOTHING
            "#,
        )
        .bind(document.document_id)
        .bind(&document.user_id)
        .bind(document.task_id)
        .bind(&document.session_id)
        .bind(&document.filename)
        .bind(&document.object_key)
        .bind(document.file_size as i64)
        .bind(document.document_type.to_string())
        .bind(&document.content_hash)
        .bind(document.status.to_string())
        .bind(&document.content)
        .bind(document.page_count.map(|p| p as i32))
        .bind(&document.extraction_method)
        .bind(&document.vector_store_id)
        .bind(&document.vector_file_id)
        .bind(&document.last_error)
        .bind(&document.metadata)
        .bind(document.uploaded_at)
        .bind(document.processed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_owned(&self, document_id: Uuid, user_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"SELECT * FROM documents WHERE document_id = $1 AND user_id = $2"#,
        )
        .bind(document_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DocumentRow::into_document).transpose()
    }

    async fn find_by_hash(&self, user_id: &str, content_hash: &str) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"SELECT * FROM documents WHERE user_id = $1 AND content_hash = $2"#,
        )
        .bind(user_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DocumentRow::into_document).transpose()
    }

    async fn finalize(&self, document: &Document) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET status = $2,
                content = $3,
                page_count = $4,
                extraction_method = $5,
                vector_store_id = $6,
                vector_file_id = $7,
                last_error = $8,
                processed_at = $9
            WHERE document_id = $1
            "#,
        )
        .bind(document.document_id)
        .bind(document.status.to_string())
        .bind(&document.content)
        .bind(document.page_count.map(|p| p as i32))
        .bind(&document.extraction_method)
        .bind(&document.vector_store_id)
        .bind(&document.vector_file_id)
        .bind(&document.last_error)
        .bind(document.processed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"SELECT * FROM documents WHERE task_id = $1 ORDER BY uploaded_at ASC"#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DocumentRow::into_document).collect()
    }

    async fn list_for_session(&self, session_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"SELECT * FROM documents WHERE session_id = $1 ORDER BY uploaded_at ASC"#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DocumentRow::into_document).collect()
    }

    async fn delete_owned(&self, document_id: Uuid, user_id: &str) -> Result<bool> {
        let result =
            sqlx::query(r#"DELETE FROM documents WHERE document_id = $1 AND user_id = $2"#)
                .bind(document_id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_for_task(&self, task_id: Uuid) -> Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"DELETE FROM documents WHERE task_id = $1 RETURNING *"#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DocumentRow::into_document).collect()
    }
}

// --- In-memory ---

#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<Uuid, Document>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert(&self, document: &Document) -> Result<bool> {
        let mut documents = self.documents.lock().expect("lock poisoned");
        let duplicate = documents
            .values()
            .any(|d| d.user_id == document.user_id && d.content_hash == document.content_hash);
        if duplicate {
            return Ok(false);
        }
        documents.insert(document.document_id, document.clone());
        Ok(true)
    }

    async fn get_owned(&self, document_id: Uuid, user_id: &str) -> Result<Option<Document>> {
        Ok(self
            .documents
            .lock()
            .expect("lock poisoned")
            .get(&document_id)
            .filter(|d| d.user_id == user_id)
            .cloned())
    }

    async fn find_by_hash(&self, user_id: &str, content_hash: &str) -> Result<Option<Document>> {
        Ok(self
            .documents
            .lock()
            .expect("lock poisoned")
            .values()
            .find(|d| d.user_id == user_id && d.content_hash == content_hash)
            .cloned())
    }

    async fn finalize(&self, document: &Document) -> Result<()> {
        let mut documents = self.documents.lock().expect("lock poisoned");
        if let Some(stored) = documents.get_mut(&document.document_id) {
            stored.status = document.status;
            stored.content = document.content.clone();
            stored.page_count = document.page_count;
            stored.extraction_method = document.extraction_method.clone();
            stored.vector_store_id = document.vector_store_id.clone();
            stored.vector_file_id = document.vector_file_id.clone();
            stored.last_error = document.last_error.clone();
            stored.processed_at = document.processed_at;
        }
        Ok(())
    }

    async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<Document>> {
        let mut documents: Vec<Document> = self
            .documents
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|d| d.task_id == Some(task_id))
            .cloned()
            .collect();
        documents.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        Ok(documents)
    }

    async fn list_for_session(&self, session_id: &str) -> Result<Vec<Document>> {
        let mut documents: Vec<Document> = self
            .documents
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|d| d.session_id.as_deref() == Some(session_id))
            .cloned()
            .collect();
        documents.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        Ok(documents)
    }

    async fn delete_owned(&self, document_id: Uuid, user_id: &str) -> Result<bool> {
        let mut documents = self.documents.lock().expect("lock poisoned");
        match documents.get(&document_id) {
            Some(d) if d.user_id == user_id => {
                documents.remove(&document_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_for_task(&self, task_id: Uuid) -> Result<Vec<Document>> {
        let mut documents = self.documents.lock().expect("lock poisoned");
        let ids: Vec<Uuid> = documents
            .values()
            .filter(|d| d.task_id == Some(task_id))
            .map(|d| d.document_id)
            .collect();
        Ok(ids
            .into_iter()
            .filter_map(|id| documents.remove(&id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_document(user: &str, hash: &str) -> Document {
        Document {
            document_id: Uuid::new_v4(),
            user_id: user.to_string(),
            task_id: None,
            session_id: None,
            filename: "a.txt".to_string(),
            object_key: "uploaded_documents/u1/a.txt".to_string(),
            file_size: 5,
            document_type: DocumentType::Text,
            content_hash: hash.to_string(),
            status: DocumentStatus::Processing,
            content: String::new(),
            page_count: None,
            extraction_method: None,
            vector_store_id: None,
            vector_file_id: None,
            last_error: None,
            metadata: serde_json::json!({}),
            uploaded_at: Utc::now(),
            processed_at: None,
        }
    }

    #[tokio::test]
    async fn hash_lookup_is_scoped_to_user() {
        let store = MemoryDocumentStore::new();
        store.insert(&make_document("u1", "abc")).await.unwrap();

        assert!(store.find_by_hash("u1", "abc").await.unwrap().is_some());
        assert!(store.find_by_hash("u2", "abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_hash_insert_converges_on_first_writer() {
        let store = MemoryDocumentStore::new();
        let winner = make_document("u1", "abc");
        assert!(store.insert(&winner).await.unwrap());

        // A racing ingest of the same bytes is refused, not errored.
        let loser = make_document("u1", "abc");
        assert!(!store.insert(&loser).await.unwrap());
        assert_eq!(store.len(), 1);
        let stored = store.find_by_hash("u1", "abc").await.unwrap().unwrap();
        assert_eq!(stored.document_id, winner.document_id);

        // Another user with identical bytes still gets a record.
        assert!(store.insert(&make_document("u2", "abc")).await.unwrap());
    }

    #[tokio::test]
    async fn finalize_updates_outcome_fields() {
        let store = MemoryDocumentStore::new();
        let mut document = make_document("u1", "abc");
        store.insert(&document).await.unwrap();

        document.status = DocumentStatus::ProcessedVectorPending;
        document.content = "Hello, world.".to_string();
        document.extraction_method = Some("embedded".to_string());
        document.vector_file_id = Some("vf_1".to_string());
        document.processed_at = Some(Utc::now());
        store.finalize(&document).await.unwrap();

        let stored = store
            .get_owned(document.document_id, "u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, DocumentStatus::ProcessedVectorPending);
        assert_eq!(stored.content, "Hello, world.");
        assert_eq!(stored.vector_file_id.as_deref(), Some("vf_1"));
    }

    #[tokio::test]
    async fn task_cascade_returns_removed_documents() {
        let store = MemoryDocumentStore::new();
        let task_id = Uuid::new_v4();
        let mut a = make_document("u1", "h1");
        a.task_id = Some(task_id);
        let mut b = make_document("u1", "h2");
        b.task_id = Some(task_id);
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();
        store.insert(&make_document("u1", "h3")).await.unwrap();

        let removed = store.delete_for_task(task_id).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(store.len(), 1);
    }
}
