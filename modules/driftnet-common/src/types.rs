use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{IngestError, Result};

// --- Task lifecycle ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown TaskStatus: {other}")),
        }
    }
}

// --- Document model ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Processed,
    ProcessedNoText,
    ProcessedVectorPending,
    ProcessedVectorFailed,
    Failed,
}

impl DocumentStatus {
    /// Any of the processed states: extraction ran to completion and the
    /// record carries a (possibly empty) content string.
    pub fn is_processed(self) -> bool {
        matches!(
            self,
            DocumentStatus::Processed
                | DocumentStatus::ProcessedNoText
                | DocumentStatus::ProcessedVectorPending
                | DocumentStatus::ProcessedVectorFailed
        )
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentStatus::Uploaded => write!(f, "uploaded"),
            DocumentStatus::Processing => write!(f, "processing"),
            DocumentStatus::Processed => write!(f, "processed"),
            DocumentStatus::ProcessedNoText => write!(f, "processed_no_text"),
            DocumentStatus::ProcessedVectorPending => write!(f, "processed_vector_pending"),
            DocumentStatus::ProcessedVectorFailed => write!(f, "processed_vector_failed"),
            DocumentStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(Self::Uploaded),
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "processed_no_text" => Ok(Self::ProcessedNoText),
            "processed_vector_pending" => Ok(Self::ProcessedVectorPending),
            "processed_vector_failed" => Ok(Self::ProcessedVectorFailed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown DocumentStatus: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Pdf,
    Image,
    Text,
    Office,
    Html,
    Other,
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentType::Pdf => write!(f, "pdf"),
            DocumentType::Image => write!(f, "image"),
            DocumentType::Text => write!(f, "text"),
            DocumentType::Office => write!(f, "office"),
            DocumentType::Html => write!(f, "html"),
            DocumentType::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for DocumentType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(Self::Pdf),
            "image" => Ok(Self::Image),
            "text" => Ok(Self::Text),
            "office" => Ok(Self::Office),
            "html" => Ok(Self::Html),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown DocumentType: {other}")),
        }
    }
}

// --- Fetch policy ---

/// Per-task fetch behaviour, forwarded to the tiered fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchPolicy {
    /// Render JavaScript before returning content.
    #[serde(default)]
    pub render_js: bool,
    /// Block sub-resource loads (images, fonts) when rendering.
    #[serde(default)]
    pub block_resources: bool,
    /// Block ad networks when rendering.
    #[serde(default)]
    pub block_ads: bool,
    /// Start escalation at the premium (geolocated) tier.
    #[serde(default)]
    pub premium: bool,
    /// Allow the stealth tier as a last resort.
    #[serde(default = "default_true")]
    pub stealth: bool,
    /// Forward caller-supplied headers through the proxy.
    #[serde(default)]
    pub forward_headers: bool,
    /// Two-letter geolocation country code for proxied fetches.
    #[serde(default)]
    pub country_code: Option<String>,
    /// Caller-operated proxy URL, used instead of the gateway tiers.
    #[serde(default)]
    pub own_proxy_url: Option<String>,
    /// Named scraping profile understood by the gateway.
    #[serde(default)]
    pub scraping_profile: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            render_js: false,
            block_resources: false,
            block_ads: false,
            premium: false,
            stealth: true,
            forward_headers: false,
            country_code: None,
            own_proxy_url: None,
            scraping_profile: None,
        }
    }
}

// --- Crawl request / task ---

/// Validated user request to crawl a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub url: String,
    #[serde(default = "defaults::max_documents")]
    pub max_documents: u32,
    #[serde(default = "defaults::max_pages")]
    pub max_pages: u32,
    #[serde(default = "defaults::max_workers")]
    pub max_workers: u32,
    /// Delay between requests, milliseconds.
    #[serde(default = "defaults::delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "defaults::total_timeout_secs")]
    pub total_timeout_secs: u64,
    #[serde(default = "defaults::page_timeout_secs")]
    pub page_timeout_secs: u64,
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Downloads smaller than this are skipped as noise.
    #[serde(default = "defaults::min_file_size")]
    pub min_file_size: u64,
    /// Stop following links after this many consecutive pages without a
    /// new document.
    #[serde(default = "defaults::max_pages_without_documents")]
    pub max_pages_without_documents: u32,
    #[serde(default)]
    pub fetch: FetchPolicy,
}

mod defaults {
    pub fn max_documents() -> u32 {
        5
    }
    pub fn max_pages() -> u32 {
        50
    }
    pub fn max_workers() -> u32 {
        3
    }
    pub fn delay_ms() -> u64 {
        50
    }
    pub fn total_timeout_secs() -> u64 {
        1800
    }
    pub fn page_timeout_secs() -> u64 {
        60
    }
    pub fn request_timeout_secs() -> u64 {
        30
    }
    pub fn min_file_size() -> u64 {
        1024
    }
    pub fn max_pages_without_documents() -> u32 {
        10
    }
}

impl CrawlRequest {
    /// Minimal request with defaults for everything but the URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_documents: defaults::max_documents(),
            max_pages: defaults::max_pages(),
            max_workers: defaults::max_workers(),
            delay_ms: defaults::delay_ms(),
            total_timeout_secs: defaults::total_timeout_secs(),
            page_timeout_secs: defaults::page_timeout_secs(),
            request_timeout_secs: defaults::request_timeout_secs(),
            min_file_size: defaults::min_file_size(),
            max_pages_without_documents: defaults::max_pages_without_documents(),
            fetch: FetchPolicy::default(),
        }
    }

    /// Validate the URL and all numeric limits.
    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| IngestError::Validation(format!("invalid URL: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(IngestError::Validation(format!(
                "only http/https URLs are supported, got {}",
                parsed.scheme()
            )));
        }
        if parsed.host_str().is_none() {
            return Err(IngestError::Validation("URL has no host".into()));
        }

        range("max_documents", self.max_documents as u64, 1, 100)?;
        range("max_pages", self.max_pages as u64, 1, 1000)?;
        range("max_workers", self.max_workers as u64, 1, 50)?;
        range("delay_ms", self.delay_ms, 0, 10_000)?;
        range("total_timeout_secs", self.total_timeout_secs, 60, 7200)?;
        range("page_timeout_secs", self.page_timeout_secs, 10, 300)?;
        range("request_timeout_secs", self.request_timeout_secs, 5, 120)?;
        Ok(())
    }
}

fn range(name: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(IngestError::Validation(format!(
            "{name} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(())
}

/// A crawl task record. Owned by exactly one user; mutated only by the
/// owning worker or an explicit cancel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlTask {
    pub task_id: Uuid,
    pub user_id: String,
    pub url: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub max_documents: u32,
    pub max_pages: u32,
    pub max_workers: u32,
    pub delay_ms: u64,
    pub total_timeout_secs: u64,
    pub page_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub min_file_size: u64,
    pub max_pages_without_documents: u32,
    pub fetch: FetchPolicy,

    pub pages_crawled: u32,
    pub documents_downloaded: u32,
    pub errors: Vec<String>,
    pub downloaded_keys: Vec<String>,
}

impl CrawlTask {
    pub fn from_request(user_id: &str, request: &CrawlRequest) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            url: request.url.clone(),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            max_documents: request.max_documents,
            max_pages: request.max_pages,
            max_workers: request.max_workers,
            delay_ms: request.delay_ms,
            total_timeout_secs: request.total_timeout_secs,
            page_timeout_secs: request.page_timeout_secs,
            request_timeout_secs: request.request_timeout_secs,
            min_file_size: request.min_file_size,
            max_pages_without_documents: request.max_pages_without_documents,
            fetch: request.fetch.clone(),
            pages_crawled: 0,
            documents_downloaded: 0,
            errors: Vec::new(),
            downloaded_keys: Vec::new(),
        }
    }
}

/// An extracted artifact. Belongs to a crawl task or a chat session,
/// never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: Uuid,
    pub user_id: String,
    pub task_id: Option<Uuid>,
    pub session_id: Option<String>,

    pub filename: String,
    pub object_key: String,
    pub file_size: u64,
    pub document_type: DocumentType,
    pub content_hash: String,

    pub status: DocumentStatus,
    pub content: String,
    pub page_count: Option<u32>,
    pub extraction_method: Option<String>,

    pub vector_store_id: Option<String>,
    pub vector_file_id: Option<String>,
    pub last_error: Option<String>,

    /// Caller-supplied annotations (crawl source, capture context).
    pub metadata: serde_json::Value,

    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

// --- Queue message ---

/// Work-queue payload. Workers load the full task record from the
/// metadata store; extra fields in the payload are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlMessage {
    pub task_id: Uuid,
    pub user_id: String,
}

// --- Helpers ---

/// Content fingerprint: hex MD5 of the raw bytes. Used for per-user dedup
/// and for object-store integrity checks.
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Vector store name for a chat session: `session_` plus the first eight
/// characters of the session id.
pub fn session_store_name(session_id: &str) -> String {
    let prefix: String = session_id.chars().take(8).collect();
    format!("session_{prefix}")
}

/// Reduce a client-supplied filename to its final path component and strip
/// control characters, so it is safe inside an object key.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();
    let trimmed = cleaned.trim_matches(['.', ' ']);
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}
