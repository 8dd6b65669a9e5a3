pub mod config;
pub mod error;
pub mod retry;
pub mod runtime;
pub mod types;

pub use config::Config;
pub use error::{IngestError, Result};
pub use retry::{retry, RetryPolicy};
pub use runtime::RuntimeProfile;
pub use types::{
    fingerprint, sanitize_filename, session_store_name, CrawlMessage, CrawlRequest, CrawlTask,
    Document, DocumentStatus, DocumentType, FetchPolicy, TaskStatus,
};
