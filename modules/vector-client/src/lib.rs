pub mod error;
pub mod types;

pub use error::{Result, VectorError};
pub use types::{FileData, FileState, SearchHit, StoreData};

use std::time::Duration;

use types::{ListResponse, SearchInput};

/// Client for the vector-search backend. The backend owns chunking and
/// embedding; this client only moves text and queries across the wire.
pub struct VectorClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl VectorClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(VectorError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }

    /// Create a named store. The backend deduplicates by name.
    pub async fn create_store(&self, name: &str) -> Result<StoreData> {
        let url = format!("{}/vector_stores", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    /// List all stores visible to this key.
    pub async fn list_stores(&self) -> Result<Vec<StoreData>> {
        let url = format!("{}/vector_stores", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let list: ListResponse<StoreData> = Self::check(resp).await?.json().await?;
        Ok(list.data)
    }

    /// Upload text as a named file. Returns immediately; the file becomes
    /// searchable once its status reaches `Completed`.
    pub async fn upload_text(
        &self,
        store_id: &str,
        filename: &str,
        text: &str,
    ) -> Result<FileData> {
        let url = format!("{}/vector_stores/{}/files", self.base_url, store_id);
        let part = reqwest::multipart::Part::text(text.to_string())
            .file_name(filename.to_string())
            .mime_str("text/plain")
            .expect("static mime type is valid");
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let file: FileData = Self::check(resp).await?.json().await?;
        tracing::info!(store_id, filename, file_id = %file.id, "Text uploaded to vector store");
        Ok(file)
    }

    /// Processing state of one file.
    pub async fn file_status(&self, store_id: &str, file_id: &str) -> Result<FileData> {
        let url = format!(
            "{}/vector_stores/{}/files/{}",
            self.base_url, store_id, file_id
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    /// Semantic search over one store.
    pub async fn search(
        &self,
        store_id: &str,
        query: &str,
        max_results: u32,
        score_threshold: Option<f64>,
        rewrite_query: bool,
    ) -> Result<Vec<SearchHit>> {
        let url = format!("{}/vector_stores/{}/search", self.base_url, store_id);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&SearchInput {
                query,
                max_results,
                score_threshold,
                rewrite_query,
            })
            .send()
            .await?;
        let list: ListResponse<SearchHit> = Self::check(resp).await?.json().await?;
        tracing::debug!(store_id, query, hits = list.data.len(), "Vector search complete");
        Ok(list.data)
    }

    pub async fn delete_file(&self, store_id: &str, file_id: &str) -> Result<()> {
        let url = format!(
            "{}/vector_stores/{}/files/{}",
            self.base_url, store_id, file_id
        );
        let resp = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    pub async fn list_files(&self, store_id: &str) -> Result<Vec<FileData>> {
        let url = format!("{}/vector_stores/{}/files", self.base_url, store_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let list: ListResponse<FileData> = Self::check(resp).await?.json().await?;
        Ok(list.data)
    }
}
