// The crawl worker: consumes queue messages, drives the task state
// machine, walks same-host pages for document links, and feeds downloads
// into the document pipeline.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use driftnet_common::{CrawlTask, DocumentStatus, IngestError, Result, TaskStatus};
use driftnet_ingest::DocumentPipeline;
use driftnet_store::{QueueMessage, TaskStore, WorkQueue};

use crate::fetcher::{FetchRequest, FetchResponse, Fetcher};
use crate::links::{filename_from_url, is_document_link, partition_links, LinkExtractor};

/// Pages smaller than this fail the content check and promote the fetch
/// tier (login walls and script stubs are tiny).
const MIN_PAGE_BYTES: usize = 64;

pub struct WorkerConfig {
    pub batch_size: u32,
    pub wait: Duration,
    pub allowed_extensions: Vec<String>,
    /// How often the watcher polls for an external cancel.
    pub cancel_poll_interval: Duration,
}

impl WorkerConfig {
    pub fn new(batch_size: u32, wait_seconds: u64, allowed_extensions: Vec<String>) -> Self {
        Self {
            batch_size: batch_size.max(1),
            wait: Duration::from_secs(wait_seconds),
            allowed_extensions,
            cancel_poll_interval: Duration::from_millis(250),
        }
    }
}

pub struct CrawlWorker {
    queue: Arc<dyn WorkQueue>,
    tasks: Arc<dyn TaskStore>,
    pipeline: Arc<DocumentPipeline>,
    fetcher: Arc<dyn Fetcher>,
    links: Arc<dyn LinkExtractor>,
    config: WorkerConfig,
}

impl CrawlWorker {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        tasks: Arc<dyn TaskStore>,
        pipeline: Arc<DocumentPipeline>,
        fetcher: Arc<dyn Fetcher>,
        links: Arc<dyn LinkExtractor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            tasks,
            pipeline,
            fetcher,
            links,
            config,
        }
    }

    /// Poll-and-process forever. Queue hiccups are logged and retried.
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Crawl worker started");
        loop {
            if let Err(e) = self.run_once().await {
                tracing::warn!(error = %e, "Worker poll failed, backing off");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    /// One receive-and-process round. Returns how many messages were
    /// handled.
    pub async fn run_once(&self) -> Result<usize> {
        let messages = self
            .queue
            .receive(self.config.batch_size, self.config.wait)
            .await?;
        let count = messages.len();
        for message in &messages {
            self.handle_message(message).await;
        }
        Ok(count)
    }

    /// Process one message end to end. Never propagates: every outcome is
    /// either a terminal task transition or an intentional abort.
    pub async fn handle_message(&self, message: &QueueMessage) {
        let task_id = message.payload.task_id;

        let task = match self.tasks.get(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                tracing::debug!(%task_id, "Task absent, dropping message");
                self.release(&message.handle).await;
                return;
            }
            Err(e) => {
                // Leave the message for redelivery after the store recovers.
                tracing::warn!(%task_id, error = %e, "Task lookup failed");
                return;
            }
        };

        if task.user_id != message.payload.user_id {
            tracing::warn!(%task_id, "Message user does not own the task, dropping");
            self.release(&message.handle).await;
            return;
        }

        match task.status {
            TaskStatus::Pending => {}
            TaskStatus::Running => {
                // A previous worker died mid-run. The page frontier lived in
                // its memory, so the crawl cannot be resumed faithfully.
                if self
                    .tasks
                    .transition(task_id, TaskStatus::Running, TaskStatus::Failed)
                    .await
                    .unwrap_or(false)
                {
                    let _ = self
                        .tasks
                        .append_error(
                            task_id,
                            "crawl was interrupted by a worker restart and could not be resumed",
                        )
                        .await;
                    tracing::warn!(%task_id, "Recovered crashed task as failed");
                }
                self.release(&message.handle).await;
                return;
            }
            _ => {
                tracing::debug!(%task_id, status = %task.status, "Task already terminal");
                self.release(&message.handle).await;
                return;
            }
        }

        if !self
            .tasks
            .transition(task_id, TaskStatus::Pending, TaskStatus::Running)
            .await
            .unwrap_or(false)
        {
            // Another worker claimed it between our read and the CAS.
            self.release(&message.handle).await;
            return;
        }

        tracing::info!(%task_id, url = %task.url, "Crawl started");

        let cancel = CancellationToken::new();
        let watcher = spawn_cancel_watcher(
            self.tasks.clone(),
            task_id,
            cancel.clone(),
            self.config.cancel_poll_interval,
        );

        let outcome = self.crawl(&task, &cancel).await;
        watcher.abort();

        match outcome {
            Ok(()) => {
                if self
                    .tasks
                    .transition(task_id, TaskStatus::Running, TaskStatus::Completed)
                    .await
                    .unwrap_or(false)
                {
                    tracing::info!(%task_id, "Crawl completed");
                }
            }
            Err(IngestError::Cancelled) => {
                // The cancel request already moved the task to CANCELLED;
                // nothing left but to stop.
                tracing::info!(%task_id, "Crawl stopped by cancellation");
            }
            Err(e) => {
                // Commit the terminal state first; the error entry belongs
                // to this worker's terminal commit, so skip it if another
                // writer (a cancel) got there before us.
                if self
                    .tasks
                    .transition(task_id, TaskStatus::Running, TaskStatus::Failed)
                    .await
                    .unwrap_or(false)
                {
                    let _ = self.tasks.append_error(task_id, &e.to_string()).await;
                }
                tracing::warn!(%task_id, error = %e, "Crawl failed");
            }
        }
        self.release(&message.handle).await;
    }

    async fn release(&self, handle: &str) {
        if let Err(e) = self.queue.delete(handle).await {
            tracing::warn!(handle, error = %e, "Failed to delete queue message");
        }
    }

    async fn crawl(&self, task: &CrawlTask, cancel: &CancellationToken) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(task.total_timeout_secs);
        let page_timeout = Duration::from_secs(task.page_timeout_secs);
        let request_timeout = Duration::from_secs(task.request_timeout_secs);
        let delay = Duration::from_millis(task.delay_ms);

        let mut pages_crawled: u32 = 0;
        let mut document_links: Vec<String> = Vec::new();
        let mut seen_documents: HashSet<String> = HashSet::new();

        if is_document_link(&task.url, &self.config.allowed_extensions) {
            document_links.push(task.url.clone());
        } else {
            let mut frontier: VecDeque<String> = VecDeque::from([task.url.clone()]);
            let mut visited: HashSet<String> = HashSet::from([task.url.clone()]);
            let mut barren_pages: u32 = 0;
            // With a budget of one document there is nothing to gain from
            // walking beyond the seed page.
            let follow_allowed = task.max_documents > 1;

            while let Some(page_url) = frontier.pop_front() {
                if pages_crawled >= task.max_pages {
                    break;
                }
                checkpoint(cancel, deadline, task.total_timeout_secs)?;
                let is_seed = pages_crawled == 0;
                if !is_seed {
                    tokio::time::sleep(delay).await;
                }

                let fetched = tokio::time::timeout(
                    page_timeout,
                    self.fetch_page(&page_url, task, request_timeout, cancel),
                )
                .await;
                let response = match fetched {
                    Ok(Ok(response)) => response,
                    Ok(Err(IngestError::Cancelled)) => return Err(IngestError::Cancelled),
                    Ok(Err(e)) => {
                        // The seed failing fails the task; a deeper page
                        // failing is just an entry in errors[].
                        if is_seed {
                            return Err(e);
                        }
                        tracing::debug!(url = %page_url, error = %e, "Page fetch failed");
                        let _ = self
                            .tasks
                            .append_error(task.task_id, &format!("{page_url}: {e}"))
                            .await;
                        continue;
                    }
                    Err(_) => {
                        let timeout_error = IngestError::Transient(format!(
                            "page {page_url} timed out after {}s",
                            task.page_timeout_secs
                        ));
                        if is_seed {
                            return Err(timeout_error);
                        }
                        let _ = self
                            .tasks
                            .append_error(task.task_id, &timeout_error.to_string())
                            .await;
                        continue;
                    }
                };

                pages_crawled += 1;
                self.tasks
                    .record_progress(task.task_id, pages_crawled, 0)
                    .await?;

                // A seed that serves document bytes without a document
                // extension (content-negotiated PDFs and the like).
                if is_seed && is_document_content_type(&response.content_type) {
                    document_links.push(page_url.clone());
                    break;
                }

                let html = String::from_utf8_lossy(&response.body).into_owned();
                let links = self.links.extract(&html, &response.final_url);
                let partition =
                    partition_links(&links, &response.final_url, &self.config.allowed_extensions);

                let mut found_new = false;
                for document in partition.documents {
                    if seen_documents.insert(document.clone()) {
                        document_links.push(document);
                        found_new = true;
                    }
                }
                if found_new {
                    barren_pages = 0;
                } else {
                    barren_pages += 1;
                    if barren_pages >= task.max_pages_without_documents {
                        tracing::info!(
                            task_id = %task.task_id,
                            pages = pages_crawled,
                            "Stopping early: no new documents found"
                        );
                        break;
                    }
                }

                if document_links.len() >= task.max_documents as usize {
                    break;
                }

                if follow_allowed {
                    for link in partition.follow {
                        // Cap the frontier so one link farm cannot balloon
                        // memory past what max_pages can ever visit.
                        if visited.len() < (task.max_pages as usize).saturating_mul(4)
                            && visited.insert(link.clone())
                        {
                            frontier.push_back(link);
                        }
                    }
                }
            }
        }

        self.download_documents(
            task,
            cancel,
            deadline,
            pages_crawled,
            document_links,
            request_timeout,
            delay,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn download_documents(
        &self,
        task: &CrawlTask,
        cancel: &CancellationToken,
        deadline: Instant,
        pages_crawled: u32,
        document_links: Vec<String>,
        request_timeout: Duration,
        delay: Duration,
    ) -> Result<()> {
        let targets: Vec<String> = document_links
            .into_iter()
            .take(task.max_documents as usize)
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(task.max_workers.max(1) as usize));
        let downloaded = Arc::new(AtomicU32::new(0));

        let results = futures::future::join_all(targets.iter().map(|link| {
            let semaphore = Arc::clone(&semaphore);
            let downloaded = Arc::clone(&downloaded);
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| IngestError::Cancelled)?;
                checkpoint(cancel, deadline, task.total_timeout_secs)?;
                tokio::time::sleep(delay).await;

                let response = self
                    .fetch_document(link, task, request_timeout, cancel)
                    .await?;
                if (response.body.len() as u64) < task.min_file_size {
                    return Err(IngestError::Validation(format!(
                        "{} bytes is below the minimum file size",
                        response.body.len()
                    )));
                }

                checkpoint(cancel, deadline, task.total_timeout_secs)?;
                let filename = filename_from_url(link);
                let document = self
                    .pipeline
                    .ingest_crawled(
                        &task.user_id,
                        task.task_id,
                        link,
                        &filename,
                        &response.body,
                        Some(&response.content_type),
                        Some(cancel),
                    )
                    .await?;

                let count = downloaded.fetch_add(1, Ordering::SeqCst) + 1;
                self.tasks
                    .push_downloaded_key(task.task_id, &document.object_key)
                    .await?;
                self.tasks
                    .record_progress(task.task_id, pages_crawled, count)
                    .await?;

                if document.status == DocumentStatus::ProcessedNoText {
                    if let Some(message) = &document.last_error {
                        let _ = self
                            .tasks
                            .append_error(task.task_id, &format!("{filename}: {message}"))
                            .await;
                    }
                }
                Ok::<(), IngestError>(())
            }
        }))
        .await;

        for (link, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => {}
                Err(IngestError::Cancelled) => return Err(IngestError::Cancelled),
                Err(e) => {
                    tracing::debug!(url = %link, error = %e, "Document ingestion failed");
                    let _ = self
                        .tasks
                        .append_error(task.task_id, &format!("{link}: {e}"))
                        .await;
                }
            }
        }
        Ok(())
    }

    async fn fetch_page(
        &self,
        url: &str,
        task: &CrawlTask,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse> {
        let checker = |body: &[u8]| body.len() >= MIN_PAGE_BYTES;
        self.fetcher
            .fetch(FetchRequest {
                url,
                policy: &task.fetch,
                timeout,
                content_checker: Some(&checker),
                cancel,
            })
            .await
    }

    async fn fetch_document(
        &self,
        url: &str,
        task: &CrawlTask,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse> {
        self.fetcher
            .fetch(FetchRequest {
                url,
                policy: &task.fetch,
                timeout,
                content_checker: None,
                cancel,
            })
            .await
    }
}

/// Cancellation and deadline check, evaluated at every crawl checkpoint.
fn checkpoint(cancel: &CancellationToken, deadline: Instant, total_timeout_secs: u64) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(IngestError::Cancelled);
    }
    if Instant::now() >= deadline {
        return Err(IngestError::Transient(format!(
            "crawl did not finish within the total timeout of {total_timeout_secs}s"
        )));
    }
    Ok(())
}

fn is_document_content_type(content_type: &str) -> bool {
    let ct = content_type.to_lowercase();
    ct.contains("application/pdf") || ct.starts_with("image/")
}

/// Watch the task record for an external cancel and trip the token so
/// in-flight fetches abort within one request timeout.
fn spawn_cancel_watcher(
    tasks: Arc<dyn TaskStore>,
    task_id: Uuid,
    cancel: CancellationToken,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match tasks.get(task_id).await {
                Ok(Some(task)) if task.status == TaskStatus::Cancelled => {
                    cancel.cancel();
                    return;
                }
                Ok(None) => {
                    cancel.cancel();
                    return;
                }
                _ => {}
            }
        }
    })
}
