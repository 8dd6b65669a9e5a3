// Vector index adapter and the session-scoped store manager. The backend
// owns chunking/embedding and processes uploads asynchronously; everything
// here must tolerate files that are not yet searchable.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;

use driftnet_common::{session_store_name, IngestError, Result};
use vector_client::{FileData, FileState, SearchHit, VectorClient, VectorError};

/// Bounded attempts while waiting for freshly-uploaded files to become
/// searchable.
const SEARCH_READY_ATTEMPTS: u32 = 3;
const SEARCH_READY_BACKOFF: Duration = Duration::from_secs(3);

/// Sessions cached per process. The backend is always the source of truth;
/// this only saves a list-stores round trip.
const SESSION_CACHE_CAPACITY: usize = 256;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Idempotent by name: returns the existing store id or creates one.
    async fn get_or_create_store(&self, name: &str) -> Result<String>;

    /// Upload text as a named file; returns the file handle immediately.
    async fn upload_text(&self, store_id: &str, filename: &str, text: &str) -> Result<String>;

    async fn file_status(&self, store_id: &str, file_id: &str) -> Result<FileState>;

    async fn search(
        &self,
        store_id: &str,
        query: &str,
        k: u32,
        score_threshold: Option<f64>,
        rewrite_query: bool,
    ) -> Result<Vec<SearchHit>>;

    async fn delete_file(&self, store_id: &str, file_id: &str) -> Result<()>;

    async fn list_files(&self, store_id: &str) -> Result<Vec<FileData>>;
}

// --- HTTP-backed adapter ---

pub struct HttpVectorIndex {
    client: VectorClient,
}

impl HttpVectorIndex {
    pub fn new(client: VectorClient) -> Self {
        Self { client }
    }
}

fn map_vector_error(e: VectorError) -> IngestError {
    match e {
        VectorError::Api { status, message } if status >= 500 => {
            IngestError::Transient(format!("vector backend {status}: {message}"))
        }
        VectorError::Http(err) => IngestError::Transient(format!("vector transport: {err}")),
        other => IngestError::Other(anyhow::anyhow!(other)),
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn get_or_create_store(&self, name: &str) -> Result<String> {
        let stores = self.client.list_stores().await.map_err(map_vector_error)?;
        if let Some(existing) = stores.iter().find(|s| s.name == name) {
            return Ok(existing.id.clone());
        }
        // Two workers may race here; the backend deduplicates by name, so
        // both land on the same canonical store.
        let created = self.client.create_store(name).await.map_err(map_vector_error)?;
        Ok(created.id)
    }

    async fn upload_text(&self, store_id: &str, filename: &str, text: &str) -> Result<String> {
        let file = self
            .client
            .upload_text(store_id, filename, text)
            .await
            .map_err(map_vector_error)?;
        Ok(file.id)
    }

    async fn file_status(&self, store_id: &str, file_id: &str) -> Result<FileState> {
        let file = self
            .client
            .file_status(store_id, file_id)
            .await
            .map_err(map_vector_error)?;
        Ok(file.status)
    }

    async fn search(
        &self,
        store_id: &str,
        query: &str,
        k: u32,
        score_threshold: Option<f64>,
        rewrite_query: bool,
    ) -> Result<Vec<SearchHit>> {
        self.client
            .search(store_id, query, k, score_threshold, rewrite_query)
            .await
            .map_err(map_vector_error)
    }

    async fn delete_file(&self, store_id: &str, file_id: &str) -> Result<()> {
        self.client
            .delete_file(store_id, file_id)
            .await
            .map_err(map_vector_error)
    }

    async fn list_files(&self, store_id: &str) -> Result<Vec<FileData>> {
        self.client.list_files(store_id).await.map_err(map_vector_error)
    }
}

// --- In-memory adapter (tests, local runs) ---

#[derive(Default)]
struct MemoryIndexState {
    stores: Vec<MemoryStore>,
    next_id: u64,
}

struct MemoryStore {
    id: String,
    name: String,
    files: Vec<MemoryFile>,
}

struct MemoryFile {
    id: String,
    filename: String,
    text: String,
    status: FileState,
}

/// In-memory vector index with naive token-overlap search.
#[derive(Default)]
pub struct MemoryVectorIndex {
    state: Mutex<MemoryIndexState>,
    /// When false, uploaded files stay in `Processing` until
    /// `complete_pending` is called, mimicking backend indexing latency.
    auto_complete: std::sync::atomic::AtomicBool,
    fail_uploads: std::sync::atomic::AtomicBool,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        let index = Self::default();
        index
            .auto_complete
            .store(true, std::sync::atomic::Ordering::SeqCst);
        index
    }

    pub fn set_auto_complete(&self, auto: bool) {
        self.auto_complete
            .store(auto, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Flip every processing file to completed.
    pub fn complete_pending(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        for store in &mut state.stores {
            for file in &mut store.files {
                if file.status == FileState::Processing {
                    file.status = FileState::Completed;
                }
            }
        }
    }

    pub fn file_count(&self, store_id: &str) -> usize {
        let state = self.state.lock().expect("lock poisoned");
        state
            .stores
            .iter()
            .find(|s| s.id == store_id)
            .map(|s| s.files.len())
            .unwrap_or(0)
    }

    pub fn store_names(&self) -> Vec<String> {
        let state = self.state.lock().expect("lock poisoned");
        state.stores.iter().map(|s| s.name.clone()).collect()
    }

    pub fn total_files(&self) -> usize {
        let state = self.state.lock().expect("lock poisoned");
        state.stores.iter().map(|s| s.files.len()).sum()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn get_or_create_store(&self, name: &str) -> Result<String> {
        let mut state = self.state.lock().expect("lock poisoned");
        if let Some(existing) = state.stores.iter().find(|s| s.name == name) {
            return Ok(existing.id.clone());
        }
        state.next_id += 1;
        let id = format!("vs_{}", state.next_id);
        state.stores.push(MemoryStore {
            id: id.clone(),
            name: name.to_string(),
            files: Vec::new(),
        });
        Ok(id)
    }

    async fn upload_text(&self, store_id: &str, filename: &str, text: &str) -> Result<String> {
        if self.fail_uploads.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(IngestError::Transient("vector backend unavailable".into()));
        }
        let auto = self.auto_complete.load(std::sync::atomic::Ordering::SeqCst);
        let mut state = self.state.lock().expect("lock poisoned");
        state.next_id += 1;
        let id = format!("vf_{}", state.next_id);
        let store = state
            .stores
            .iter_mut()
            .find(|s| s.id == store_id)
            .ok_or(IngestError::NotFound)?;
        store.files.push(MemoryFile {
            id: id.clone(),
            filename: filename.to_string(),
            text: text.to_lowercase(),
            status: if auto {
                FileState::Completed
            } else {
                FileState::Processing
            },
        });
        Ok(id)
    }

    async fn file_status(&self, store_id: &str, file_id: &str) -> Result<FileState> {
        let state = self.state.lock().expect("lock poisoned");
        state
            .stores
            .iter()
            .find(|s| s.id == store_id)
            .and_then(|s| s.files.iter().find(|f| f.id == file_id))
            .map(|f| f.status)
            .ok_or(IngestError::NotFound)
    }

    async fn search(
        &self,
        store_id: &str,
        query: &str,
        k: u32,
        score_threshold: Option<f64>,
        _rewrite_query: bool,
    ) -> Result<Vec<SearchHit>> {
        let state = self.state.lock().expect("lock poisoned");
        let store = state
            .stores
            .iter()
            .find(|s| s.id == store_id)
            .ok_or(IngestError::NotFound)?;

        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(|t| t.to_string())
            .collect();
        let mut hits = Vec::new();
        for file in store.files.iter().filter(|f| f.status == FileState::Completed) {
            let matched = terms.iter().filter(|t| file.text.contains(t.as_str())).count();
            if matched == 0 {
                continue;
            }
            let score = matched as f64 / terms.len().max(1) as f64;
            if score_threshold.is_some_and(|threshold| score < threshold) {
                continue;
            }
            hits.push(SearchHit {
                filename: file.filename.clone(),
                score,
                chunks: vec![file.text.chars().take(200).collect()],
            });
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k as usize);
        Ok(hits)
    }

    async fn delete_file(&self, store_id: &str, file_id: &str) -> Result<()> {
        let mut state = self.state.lock().expect("lock poisoned");
        if let Some(store) = state.stores.iter_mut().find(|s| s.id == store_id) {
            store.files.retain(|f| f.id != file_id);
        }
        Ok(())
    }

    async fn list_files(&self, store_id: &str) -> Result<Vec<FileData>> {
        let state = self.state.lock().expect("lock poisoned");
        let store = state
            .stores
            .iter()
            .find(|s| s.id == store_id)
            .ok_or(IngestError::NotFound)?;
        Ok(store
            .files
            .iter()
            .map(|f| FileData {
                id: f.id.clone(),
                filename: Some(f.filename.clone()),
                status: f.status,
                error: None,
            })
            .collect())
    }
}

// --- Session manager ---

/// Maps chat sessions to their vector stores through a bounded LRU. The
/// cache is advisory; on miss the backend is consulted by name, so racing
/// workers converge on one canonical store id.
pub struct SessionVectorManager {
    cache: Mutex<LruCache<String, String>>,
}

impl SessionVectorManager {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(SESSION_CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
        }
    }

    /// Resolve the store id for a session, creating the store on first use.
    pub async fn store_for_session(
        &self,
        index: &dyn VectorIndex,
        session_id: &str,
    ) -> Result<String> {
        if let Some(cached) = self
            .cache
            .lock()
            .expect("lock poisoned")
            .get(session_id)
            .cloned()
        {
            return Ok(cached);
        }

        let name = session_store_name(session_id);
        let store_id = index.get_or_create_store(&name).await?;
        self.cache
            .lock()
            .expect("lock poisoned")
            .put(session_id.to_string(), store_id.clone());
        Ok(store_id)
    }
}

impl Default for SessionVectorManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Search that tolerates indexing latency: when a store has files but none
/// are completed yet, retry a bounded number of times before returning
/// empty.
pub async fn search_when_ready(
    index: &dyn VectorIndex,
    store_id: &str,
    query: &str,
    k: u32,
    score_threshold: Option<f64>,
    rewrite_query: bool,
) -> Result<Vec<SearchHit>> {
    for attempt in 0..SEARCH_READY_ATTEMPTS {
        let hits = index
            .search(store_id, query, k, score_threshold, rewrite_query)
            .await?;
        if !hits.is_empty() {
            return Ok(hits);
        }

        let files = index.list_files(store_id).await?;
        let all_pending =
            !files.is_empty() && files.iter().all(|f| f.status != FileState::Completed);
        if !all_pending || attempt + 1 == SEARCH_READY_ATTEMPTS {
            return Ok(Vec::new());
        }

        tracing::debug!(
            store_id,
            attempt = attempt + 1,
            files = files.len(),
            "Store has only pending files, waiting before re-searching"
        );
        tokio::time::sleep(SEARCH_READY_BACKOFF).await;
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_creation_is_idempotent_by_name() {
        let index = MemoryVectorIndex::new();
        let a = index.get_or_create_store("session_abc").await.unwrap();
        let b = index.get_or_create_store("session_abc").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(index.store_names(), vec!["session_abc"]);
    }

    #[tokio::test]
    async fn session_manager_caches_and_converges() {
        let index = MemoryVectorIndex::new();
        let manager = SessionVectorManager::new();

        let first = manager
            .store_for_session(&index, "abcdef1234567890")
            .await
            .unwrap();
        let second = manager
            .store_for_session(&index, "abcdef1234567890")
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(index.store_names(), vec!["session_abcdef12"]);

        // A fresh manager (another process) resolves to the same store.
        let other = SessionVectorManager::new();
        let third = other
            .store_for_session(&index, "abcdef1234567890")
            .await
            .unwrap();
        assert_eq!(first, third);
    }

    #[tokio::test]
    async fn search_matches_completed_files_only() {
        let index = MemoryVectorIndex::new();
        index.set_auto_complete(false);
        let store = index.get_or_create_store("s").await.unwrap();
        index
            .upload_text(&store, "a.txt", "stock market earnings report")
            .await
            .unwrap();

        let before = index
            .search(&store, "earnings", 5, None, false)
            .await
            .unwrap();
        assert!(before.is_empty());

        index.complete_pending();
        let after = index
            .search(&store, "earnings", 5, None, false)
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].filename, "a.txt");
    }

    #[tokio::test(start_paused = true)]
    async fn search_when_ready_returns_once_files_complete() {
        let index = std::sync::Arc::new(MemoryVectorIndex::new());
        index.set_auto_complete(false);
        let store = index.get_or_create_store("s").await.unwrap();
        index
            .upload_text(&store, "a.txt", "quarterly earnings")
            .await
            .unwrap();

        let background = index.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            background.complete_pending();
        });

        let hits = search_when_ready(index.as_ref(), &store, "earnings", 5, None, false)
            .await
            .unwrap();
        handle.await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn search_when_ready_gives_up_on_empty_store() {
        let index = MemoryVectorIndex::new();
        let store = index.get_or_create_store("s").await.unwrap();
        let hits = search_when_ready(&index, &store, "anything", 5, None, false)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
