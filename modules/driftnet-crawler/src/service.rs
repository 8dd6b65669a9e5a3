// Ingestion API facade: the stable surface the HTTP layer calls. Owns no
// policy of its own beyond validation, ownership checks, and the
// PENDING-state enqueue handshake.

use std::sync::Arc;

use uuid::Uuid;

use driftnet_common::{
    CrawlMessage, CrawlRequest, CrawlTask, Document, IngestError, Result, TaskStatus,
};
use driftnet_ingest::{DocumentPipeline, VectorIndex};
use driftnet_store::{DocumentStore, TaskStore, VerifiedStore, WorkQueue};

/// Terminal summary of a crawl: the task plus its documents.
#[derive(Debug, Clone)]
pub struct CrawlResults {
    pub task: CrawlTask,
    pub documents: Vec<Document>,
}

pub struct IngestionService {
    tasks: Arc<dyn TaskStore>,
    documents: Arc<dyn DocumentStore>,
    queue: Arc<dyn WorkQueue>,
    objects: Arc<VerifiedStore>,
    vectors: Arc<dyn VectorIndex>,
    pipeline: Arc<DocumentPipeline>,
}

impl IngestionService {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        documents: Arc<dyn DocumentStore>,
        queue: Arc<dyn WorkQueue>,
        objects: Arc<VerifiedStore>,
        vectors: Arc<dyn VectorIndex>,
        pipeline: Arc<DocumentPipeline>,
    ) -> Self {
        Self {
            tasks,
            documents,
            queue,
            objects,
            vectors,
            pipeline,
        }
    }

    /// Validate the request and create a PENDING task record.
    pub async fn create_crawl_task(
        &self,
        user_id: &str,
        request: &CrawlRequest,
    ) -> Result<CrawlTask> {
        request.validate()?;
        let task = CrawlTask::from_request(user_id, request);
        self.tasks.insert(&task).await?;
        tracing::info!(task_id = %task.task_id, user_id, url = %task.url, "Crawl task created");
        Ok(task)
    }

    /// Enqueue a PENDING task for the workers. The PENDING→PENDING CAS
    /// guards against double-starting: it fails for any other state.
    pub async fn start_crawl_task(&self, task_id: Uuid, user_id: &str) -> Result<()> {
        let task = self
            .tasks
            .get_owned(task_id, user_id)
            .await?
            .ok_or(IngestError::NotFound)?;

        if !self
            .tasks
            .transition(task_id, TaskStatus::Pending, TaskStatus::Pending)
            .await?
        {
            return Err(IngestError::IllegalState(format!(
                "task cannot be started from the {} state",
                task.status
            )));
        }

        self.queue
            .enqueue(&CrawlMessage {
                task_id,
                user_id: user_id.to_string(),
            })
            .await?;
        tracing::info!(%task_id, "Crawl task enqueued");
        Ok(())
    }

    /// Cancel from PENDING or RUNNING. Cancelling an already-cancelled
    /// task is a no-op.
    pub async fn cancel_crawl_task(&self, task_id: Uuid, user_id: &str) -> Result<()> {
        let task = self
            .tasks
            .get_owned(task_id, user_id)
            .await?
            .ok_or(IngestError::NotFound)?;

        match task.status {
            TaskStatus::Cancelled => return Ok(()),
            TaskStatus::Completed | TaskStatus::Failed => {
                return Err(IngestError::IllegalState(format!(
                    "task is already {}",
                    task.status
                )));
            }
            TaskStatus::Pending | TaskStatus::Running => {}
        }

        let cancelled = self
            .tasks
            .transition(task_id, TaskStatus::Pending, TaskStatus::Cancelled)
            .await?
            || self
                .tasks
                .transition(task_id, TaskStatus::Running, TaskStatus::Cancelled)
                .await?;
        if cancelled {
            tracing::info!(%task_id, "Crawl task cancelled");
            return Ok(());
        }

        // Lost the race: see what the task became.
        match self.tasks.get_owned(task_id, user_id).await? {
            Some(current) if current.status == TaskStatus::Cancelled => Ok(()),
            Some(current) => Err(IngestError::IllegalState(format!(
                "task is already {}",
                current.status
            ))),
            None => Err(IngestError::NotFound),
        }
    }

    pub async fn get_task_status(&self, task_id: Uuid, user_id: &str) -> Result<CrawlTask> {
        self.tasks
            .get_owned(task_id, user_id)
            .await?
            .ok_or(IngestError::NotFound)
    }

    pub async fn list_user_tasks(
        &self,
        user_id: &str,
        limit: u32,
        skip: u32,
    ) -> Result<Vec<CrawlTask>> {
        self.tasks.list_for_user(user_id, limit, skip).await
    }

    /// Delete a task and cascade to its documents, their stored objects,
    /// and their vector files.
    pub async fn delete_crawl_task(&self, task_id: Uuid, user_id: &str) -> Result<()> {
        let _task = self
            .tasks
            .get_owned(task_id, user_id)
            .await?
            .ok_or(IngestError::NotFound)?;

        let removed = self.documents.delete_for_task(task_id).await?;
        for document in &removed {
            if let Err(e) = self.objects.delete(&document.object_key).await {
                tracing::warn!(key = %document.object_key, error = %e, "Object cleanup failed");
            }
            if let (Some(store_id), Some(file_id)) =
                (&document.vector_store_id, &document.vector_file_id)
            {
                if let Err(e) = self.vectors.delete_file(store_id, file_id).await {
                    tracing::warn!(file_id, error = %e, "Vector file cleanup failed");
                }
            }
        }

        if !self.tasks.delete_owned(task_id, user_id).await? {
            return Err(IngestError::NotFound);
        }
        tracing::info!(%task_id, documents = removed.len(), "Crawl task deleted");
        Ok(())
    }

    /// Task plus its documents, for terminal result inspection.
    pub async fn get_crawl_results(&self, task_id: Uuid, user_id: &str) -> Result<CrawlResults> {
        let task = self
            .tasks
            .get_owned(task_id, user_id)
            .await?
            .ok_or(IngestError::NotFound)?;
        let documents = self.documents.list_for_task(task_id).await?;
        Ok(CrawlResults { task, documents })
    }

    /// Run the document pipeline synchronously for a user upload.
    pub async fn ingest_uploaded_document(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        filename: &str,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> Result<Document> {
        self.pipeline
            .ingest_upload(user_id, session_id, filename, bytes, content_type)
            .await
    }

    /// Index already-extracted text under a crawl task.
    pub async fn ingest_crawled_content(
        &self,
        user_id: &str,
        task_id: Uuid,
        filename: &str,
        text: &str,
        metadata: serde_json::Value,
    ) -> Result<Document> {
        self.pipeline
            .ingest_crawled_text(user_id, task_id, filename, text, metadata)
            .await
    }

    pub async fn get_document(&self, document_id: Uuid, user_id: &str) -> Result<Document> {
        self.documents
            .get_owned(document_id, user_id)
            .await?
            .ok_or(IngestError::NotFound)
    }

    /// Delete one document, its object, and its vector file.
    pub async fn delete_document(&self, document_id: Uuid, user_id: &str) -> Result<()> {
        let document = self
            .documents
            .get_owned(document_id, user_id)
            .await?
            .ok_or(IngestError::NotFound)?;

        if let Err(e) = self.objects.delete(&document.object_key).await {
            tracing::warn!(key = %document.object_key, error = %e, "Object cleanup failed");
        }
        if let (Some(store_id), Some(file_id)) =
            (&document.vector_store_id, &document.vector_file_id)
        {
            if let Err(e) = self.vectors.delete_file(store_id, file_id).await {
                tracing::warn!(file_id, error = %e, "Vector file cleanup failed");
            }
        }
        if !self.documents.delete_owned(document_id, user_id).await? {
            return Err(IngestError::NotFound);
        }
        Ok(())
    }
}
