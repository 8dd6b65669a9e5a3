// Task records and the status CAS primitive. All status transitions go
// through `transition`; a false return means another writer got there
// first and the caller must abort silently.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use driftnet_common::{CrawlTask, FetchPolicy, Result, TaskStatus};

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: &CrawlTask) -> Result<()>;

    /// Fetch without an ownership filter. Worker-internal only.
    async fn get(&self, task_id: Uuid) -> Result<Option<CrawlTask>>;

    /// Fetch filtered by `(task_id, user_id)`; ownership mismatches look
    /// like absence.
    async fn get_owned(&self, task_id: Uuid, user_id: &str) -> Result<Option<CrawlTask>>;

    async fn list_for_user(&self, user_id: &str, limit: u32, skip: u32)
        -> Result<Vec<CrawlTask>>;

    /// Compare-and-set status transition. Sets `started_at` when entering
    /// RUNNING and `completed_at` when entering a terminal state. Returns
    /// false if the task was not in `from`.
    async fn transition(&self, task_id: Uuid, from: TaskStatus, to: TaskStatus) -> Result<bool>;

    /// Write progress counters. Counters never decrease; status is left
    /// untouched so a concurrent cancel is preserved.
    async fn record_progress(
        &self,
        task_id: Uuid,
        pages_crawled: u32,
        documents_downloaded: u32,
    ) -> Result<()>;

    async fn append_error(&self, task_id: Uuid, error: &str) -> Result<()>;

    async fn push_downloaded_key(&self, task_id: Uuid, key: &str) -> Result<()>;

    /// Delete an owned task. Returns false when absent or not owned.
    /// Document cascade is the caller's responsibility.
    async fn delete_owned(&self, task_id: Uuid, user_id: &str) -> Result<bool>;
}

// --- Postgres ---

pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    task_id: Uuid,
    user_id: String,
    url: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    max_documents: i32,
    max_pages: i32,
    max_workers: i32,
    delay_ms: i64,
    total_timeout_secs: i64,
    page_timeout_secs: i64,
    request_timeout_secs: i64,
    min_file_size: i64,
    max_pages_without_documents: i32,
    fetch: serde_json::Value,
    pages_crawled: i32,
    documents_downloaded: i32,
    errors: serde_json::Value,
    downloaded_keys: serde_json::Value,
}

impl TaskRow {
    fn into_task(self) -> Result<CrawlTask> {
        let status = TaskStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!("corrupt task row: {e}"))?;
        let fetch: FetchPolicy = serde_json::from_value(self.fetch)
            .map_err(|e| anyhow::anyhow!("corrupt fetch policy: {e}"))?;
        let errors: Vec<String> = serde_json::from_value(self.errors).unwrap_or_default();
        let downloaded_keys: Vec<String> =
            serde_json::from_value(self.downloaded_keys).unwrap_or_default();
        Ok(CrawlTask {
            task_id: self.task_id,
            user_id: self.user_id,
            url: self.url,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            max_documents: self.max_documents as u32,
            max_pages: self.max_pages as u32,
            max_workers: self.max_workers as u32,
            delay_ms: self.delay_ms as u64,
            total_timeout_secs: self.total_timeout_secs as u64,
            page_timeout_secs: self.page_timeout_secs as u64,
            request_timeout_secs: self.request_timeout_secs as u64,
            min_file_size: self.min_file_size as u64,
            max_pages_without_documents: self.max_pages_without_documents as u32,
            fetch,
            pages_crawled: self.pages_crawled as u32,
            documents_downloaded: self.documents_downloaded as u32,
            errors,
            downloaded_keys,
        })
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn insert(&self, task: &CrawlTask) -> Result<()> {
        let fetch = serde_json::to_value(&task.fetch)
            .map_err(|e| anyhow::anyhow!("fetch policy encode: {e}"))?;
        sqlx::query(
            r#"
            INSERT INTO tasks
                (task_id, user_id, url, status, created_at, updated_at,
                 started_at, completed_at, max_documents, max_pages, max_workers,
                 delay_ms, total_timeout_secs, page_timeout_secs, request_timeout_secs,
                 min_file_size, max_pages_without_documents, fetch,
                 pages_crawled, documents_downloaded, errors, downloaded_keys)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18, $19, $20, '[]', '[]')
            "#,
        )
        .bind(task.task_id)
        .bind(&task.user_id)
        .bind(&task.url)
        .bind(task.status.to_string())
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.max_documents as i32)
        .bind(task.max_pages as i32)
        .bind(task.max_workers as i32)
        .bind(task.delay_ms as i64)
        .bind(task.total_timeout_secs as i64)
        .bind(task.page_timeout_secs as i64)
        .bind(task.request_timeout_secs as i64)
        .bind(task.min_file_size as i64)
        .bind(task.max_pages_without_documents as i32)
        .bind(&fetch)
        .bind(task.pages_crawled as i32)
        .bind(task.documents_downloaded as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<CrawlTask>> {
        let row = sqlx::query_as::<_, TaskRow>(r#"SELECT * FROM tasks WHERE task_id = $1"#)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TaskRow::into_task).transpose()
    }

    async fn get_owned(&self, task_id: Uuid, user_id: &str) -> Result<Option<CrawlTask>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"SELECT * FROM tasks WHERE task_id = $1 AND user_id = $2"#,
        )
        .bind(task_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TaskRow::into_task).transpose()
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        limit: u32,
        skip: u32,
    ) -> Result<Vec<CrawlTask>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT * FROM tasks
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .bind(skip as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    async fn transition(&self, task_id: Uuid, from: TaskStatus, to: TaskStatus) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $3,
                updated_at = now(),
                started_at = CASE WHEN $4 THEN now() ELSE started_at END,
                completed_at = CASE WHEN $5 THEN now() ELSE completed_at END
            WHERE task_id = $1 AND status = $2
            "#,
        )
        .bind(task_id)
        .bind(from.to_string())
        .bind(to.to_string())
        .bind(to == TaskStatus::Running)
        .bind(to.is_terminal())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_progress(
        &self,
        task_id: Uuid,
        pages_crawled: u32,
        documents_downloaded: u32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET pages_crawled = GREATEST(pages_crawled, $2),
                documents_downloaded = GREATEST(documents_downloaded, $3),
                updated_at = now()
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .bind(pages_crawled as i32)
        .bind(documents_downloaded as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_error(&self, task_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET errors = errors || to_jsonb($2::text), updated_at = now()
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn push_downloaded_key(&self, task_id: Uuid, key: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET downloaded_keys = downloaded_keys || to_jsonb($2::text), updated_at = now()
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_owned(&self, task_id: Uuid, user_id: &str) -> Result<bool> {
        let result = sqlx::query(r#"DELETE FROM tasks WHERE task_id = $1 AND user_id = $2"#)
            .bind(task_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

// --- In-memory ---

/// In-memory task store with the same CAS semantics, for tests and local
/// runs.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<Uuid, CrawlTask>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: &CrawlTask) -> Result<()> {
        self.tasks
            .lock()
            .expect("lock poisoned")
            .insert(task.task_id, task.clone());
        Ok(())
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<CrawlTask>> {
        Ok(self
            .tasks
            .lock()
            .expect("lock poisoned")
            .get(&task_id)
            .cloned())
    }

    async fn get_owned(&self, task_id: Uuid, user_id: &str) -> Result<Option<CrawlTask>> {
        Ok(self
            .tasks
            .lock()
            .expect("lock poisoned")
            .get(&task_id)
            .filter(|t| t.user_id == user_id)
            .cloned())
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        limit: u32,
        skip: u32,
    ) -> Result<Vec<CrawlTask>> {
        let mut tasks: Vec<CrawlTask> = self
            .tasks
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect())
    }

    async fn transition(&self, task_id: Uuid, from: TaskStatus, to: TaskStatus) -> Result<bool> {
        let mut tasks = self.tasks.lock().expect("lock poisoned");
        let Some(task) = tasks.get_mut(&task_id) else {
            return Ok(false);
        };
        if task.status != from {
            return Ok(false);
        }
        let now = Utc::now();
        task.status = to;
        task.updated_at = now;
        if to == TaskStatus::Running {
            task.started_at = Some(now);
        }
        if to.is_terminal() {
            task.completed_at = Some(now);
        }
        Ok(true)
    }

    async fn record_progress(
        &self,
        task_id: Uuid,
        pages_crawled: u32,
        documents_downloaded: u32,
    ) -> Result<()> {
        let mut tasks = self.tasks.lock().expect("lock poisoned");
        if let Some(task) = tasks.get_mut(&task_id) {
            task.pages_crawled = task.pages_crawled.max(pages_crawled);
            task.documents_downloaded = task.documents_downloaded.max(documents_downloaded);
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn append_error(&self, task_id: Uuid, error: &str) -> Result<()> {
        let mut tasks = self.tasks.lock().expect("lock poisoned");
        if let Some(task) = tasks.get_mut(&task_id) {
            task.errors.push(error.to_string());
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn push_downloaded_key(&self, task_id: Uuid, key: &str) -> Result<()> {
        let mut tasks = self.tasks.lock().expect("lock poisoned");
        if let Some(task) = tasks.get_mut(&task_id) {
            task.downloaded_keys.push(key.to_string());
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_owned(&self, task_id: Uuid, user_id: &str) -> Result<bool> {
        let mut tasks = self.tasks.lock().expect("lock poisoned");
        match tasks.get(&task_id) {
            Some(t) if t.user_id == user_id => {
                tasks.remove(&task_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftnet_common::CrawlRequest;

    fn make_task(user: &str) -> CrawlTask {
        CrawlTask::from_request(user, &CrawlRequest::new("https://example.com"))
    }

    #[tokio::test]
    async fn cas_transition_succeeds_once() {
        let store = MemoryTaskStore::new();
        let task = make_task("u1");
        store.insert(&task).await.unwrap();

        assert!(store
            .transition(task.task_id, TaskStatus::Pending, TaskStatus::Running)
            .await
            .unwrap());
        // Second writer loses the race.
        assert!(!store
            .transition(task.task_id, TaskStatus::Pending, TaskStatus::Running)
            .await
            .unwrap());

        let stored = store.get(task.task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Running);
        assert!(stored.started_at.is_some());
        assert!(stored.completed_at.is_none());
    }

    #[tokio::test]
    async fn terminal_transition_sets_completed_at() {
        let store = MemoryTaskStore::new();
        let task = make_task("u1");
        store.insert(&task).await.unwrap();
        store
            .transition(task.task_id, TaskStatus::Pending, TaskStatus::Running)
            .await
            .unwrap();
        store
            .transition(task.task_id, TaskStatus::Running, TaskStatus::Completed)
            .await
            .unwrap();

        let stored = store.get(task.task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn progress_never_decreases() {
        let store = MemoryTaskStore::new();
        let task = make_task("u1");
        store.insert(&task).await.unwrap();

        store.record_progress(task.task_id, 5, 2).await.unwrap();
        // A replayed older update must not roll counters back.
        store.record_progress(task.task_id, 3, 1).await.unwrap();

        let stored = store.get(task.task_id).await.unwrap().unwrap();
        assert_eq!(stored.pages_crawled, 5);
        assert_eq!(stored.documents_downloaded, 2);
    }

    #[tokio::test]
    async fn ownership_filters_lookups_and_deletes() {
        let store = MemoryTaskStore::new();
        let task = make_task("u1");
        store.insert(&task).await.unwrap();

        assert!(store.get_owned(task.task_id, "u2").await.unwrap().is_none());
        assert!(!store.delete_owned(task.task_id, "u2").await.unwrap());
        assert!(store.get_owned(task.task_id, "u1").await.unwrap().is_some());
        assert!(store.delete_owned(task.task_id, "u1").await.unwrap());
    }

    #[tokio::test]
    async fn list_orders_newest_first_with_paging() {
        let store = MemoryTaskStore::new();
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut task = make_task("u1");
            task.created_at = Utc::now() + chrono::Duration::seconds(i);
            ids.push(task.task_id);
            store.insert(&task).await.unwrap();
        }
        let page = store.list_for_user("u1", 2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].task_id, ids[2]);

        let rest = store.list_for_user("u1", 2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].task_id, ids[0]);
    }
}
