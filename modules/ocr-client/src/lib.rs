pub mod error;

pub use error::{OcrError, Result};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client for the remote text-recognition service. Jobs run against an
/// object already stored in the object store; the service reads the object
/// by bucket + key, so raw bytes never travel through this client.
pub struct OcrClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct StartJobInput<'a> {
    bucket: &'a str,
    key: &'a str,
}

/// Job metadata returned by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct JobData {
    pub id: String,
    pub status: String,
}

/// Recognized text for a completed job.
#[derive(Debug, Clone, Deserialize)]
pub struct RecognizedText {
    pub text: String,
    #[serde(default)]
    pub page_count: Option<u32>,
}

impl OcrClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Start a text-detection job for a stored object. Returns immediately
    /// with job metadata.
    pub async fn start_detection(&self, bucket: &str, key: &str) -> Result<JobData> {
        let url = format!("{}/jobs", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&StartJobInput { bucket, key })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(OcrError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json().await?)
    }

    /// Poll until a job completes. Uses `wait=30` for efficient long-polling.
    pub async fn wait_for_job(&self, job_id: &str) -> Result<JobData> {
        loop {
            let url = format!("{}/jobs/{}?wait=30", self.base_url, job_id);
            let resp = self
                .client
                .get(&url)
                .bearer_auth(&self.api_key)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let message = resp.text().await.unwrap_or_default();
                return Err(OcrError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let job: JobData = resp.json().await?;
            match job.status.as_str() {
                "succeeded" => return Ok(job),
                "failed" | "expired" => return Err(OcrError::JobFailed(job.status)),
                _ => {
                    tracing::debug!(job_id, status = %job.status, "OCR job still in progress");
                    continue;
                }
            }
        }
    }

    /// Fetch the recognized text for a completed job.
    pub async fn job_text(&self, job_id: &str) -> Result<RecognizedText> {
        let url = format!("{}/jobs/{}/text", self.base_url, job_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(OcrError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json().await?)
    }

    /// Recognize text end-to-end: start the job, poll to completion, fetch
    /// the result.
    pub async fn detect_text(&self, bucket: &str, key: &str) -> Result<RecognizedText> {
        tracing::info!(bucket, key, "Starting text detection");

        let job = self.start_detection(bucket, key).await?;
        tracing::info!(job_id = %job.id, "OCR job started, polling for completion");

        let completed = self.wait_for_job(&job.id).await?;
        let text = self.job_text(&completed.id).await?;

        tracing::info!(
            job_id = %completed.id,
            chars = text.text.len(),
            pages = ?text.page_count,
            "Text detection complete"
        );
        Ok(text)
    }
}
