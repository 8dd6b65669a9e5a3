use serde::{Deserialize, Serialize};

/// A named vector store on the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreData {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub file_count: u32,
}

/// Processing state of an uploaded file. The backend chunks and embeds
/// asynchronously, so files are searchable only once `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

/// A file inside a vector store.
#[derive(Debug, Clone, Deserialize)]
pub struct FileData {
    pub id: String,
    #[serde(default)]
    pub filename: Option<String>,
    pub status: FileState,
    #[serde(default)]
    pub error: Option<String>,
}

/// One semantic search result.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    pub filename: String,
    /// Relevance in [0, 1].
    pub score: f64,
    /// Matching text chunks, best first.
    pub chunks: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SearchInput<'a> {
    pub query: &'a str,
    pub max_results: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<f64>,
    pub rewrite_query: bool,
}

/// Standard list envelope used by the backend.
#[derive(Debug, Deserialize)]
pub(crate) struct ListResponse<T> {
    pub data: Vec<T>,
}
