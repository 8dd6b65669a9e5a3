use std::env;

/// Hard cap on fetched/uploaded body size.
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Work queue
    pub queue_name: String,

    // Object store
    pub object_store_bucket: String,
    pub object_store_region: Option<String>,

    // Metadata store (Postgres)
    pub metadata_store_uri: String,
    pub metadata_store_db: String,

    // Vector-search backend
    pub vector_store_url: String,
    pub vector_store_api_key: String,
    pub vector_store_default_name: String,

    // Remote OCR service (optional; OCR strategies are skipped when absent)
    pub ocr_service_url: Option<String>,
    pub ocr_service_api_key: Option<String>,

    // Proxy gateway (optional; the fetcher stays at the direct tier when absent)
    pub proxy_gateway_url: Option<String>,
    pub proxy_gateway_api_key: Option<String>,

    // Fetcher
    pub fetcher_default_country_code: String,
    pub fetcher_max_body_bytes: usize,

    // Pipeline
    pub pipeline_allowed_extensions: Vec<String>,

    // Worker polling
    pub worker_batch_size: u32,
    pub worker_wait_seconds: u64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            queue_name: env::var("QUEUE_NAME").unwrap_or_else(|_| "driftnet-crawl".to_string()),
            object_store_bucket: env::var("OBJECT_STORE_BUCKET")
                .unwrap_or_else(|_| "driftnet-data".to_string()),
            object_store_region: env::var("OBJECT_STORE_REGION").ok(),
            metadata_store_uri: required_env("METADATA_STORE_URI"),
            metadata_store_db: env::var("METADATA_STORE_DB")
                .unwrap_or_else(|_| "driftnet".to_string()),
            vector_store_url: required_env("VECTOR_STORE_URL"),
            vector_store_api_key: required_env("VECTOR_STORE_API_KEY"),
            vector_store_default_name: env::var("VECTOR_STORE_DEFAULT_NAME")
                .unwrap_or_else(|_| "Stock Market Data".to_string()),
            ocr_service_url: env::var("OCR_SERVICE_URL").ok(),
            ocr_service_api_key: env::var("OCR_SERVICE_API_KEY").ok(),
            proxy_gateway_url: env::var("PROXY_GATEWAY_URL").ok(),
            proxy_gateway_api_key: env::var("PROXY_GATEWAY_API_KEY").ok(),
            fetcher_default_country_code: env::var("FETCHER_DEFAULT_COUNTRY_CODE")
                .unwrap_or_else(|_| "us".to_string()),
            fetcher_max_body_bytes: env::var("FETCHER_MAX_BODY_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_BODY_BYTES),
            pipeline_allowed_extensions: env::var("PIPELINE_ALLOWED_EXTENSIONS")
                .map(|v| {
                    v.split_whitespace()
                        .map(|s| s.trim().to_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_else(|_| default_allowed_extensions()),
            worker_batch_size: env::var("WORKER_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            worker_wait_seconds: env::var("WORKER_WAIT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        }
    }

    /// Log sensitive values redacted (length only) for debugging.
    pub fn log_redacted(&self) {
        let secrets = [
            ("VECTOR_STORE_API_KEY", Some(&self.vector_store_api_key)),
            ("OCR_SERVICE_API_KEY", self.ocr_service_api_key.as_ref()),
            ("PROXY_GATEWAY_API_KEY", self.proxy_gateway_api_key.as_ref()),
        ];
        for (name, value) in secrets {
            match value {
                Some(v) if !v.is_empty() => tracing::info!("{name} = ({} chars)", v.len()),
                _ => tracing::info!("{name} = (empty)"),
            }
        }
        tracing::info!(
            queue = %self.queue_name,
            bucket = %self.object_store_bucket,
            vector_default = %self.vector_store_default_name,
            "Config loaded"
        );
    }
}

/// Extension whitelist applied to uploads and crawled document links.
pub fn default_allowed_extensions() -> Vec<String> {
    [
        ".pdf", ".doc", ".docx", ".txt", ".html", ".jpg", ".jpeg", ".png", ".gif", ".bmp",
        ".tiff",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
