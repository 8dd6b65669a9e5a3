// Remote OCR strategy: the service reads objects from the object store, so
// the bytes are parked under a temp key for the duration of the job and
// deleted afterwards.

use std::sync::Arc;

use async_trait::async_trait;

use driftnet_common::{DocumentType, IngestError, Result};
use driftnet_store::{temp_key, ObjectMetadata, VerifiedStore};
use ocr_client::{OcrClient, OcrError};

use super::{Extraction, ExtractionInput, ExtractionStrategy};

/// Recognized text from the OCR backend.
#[derive(Debug, Clone)]
pub struct Recognized {
    pub text: String,
    pub page_count: Option<u32>,
}

/// Seam for the OCR backend so the pipeline can be exercised without the
/// real service.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, bucket: &str, key: &str) -> Result<Recognized>;
}

/// Production recognizer backed by the OCR service client.
pub struct OcrServiceRecognizer {
    client: OcrClient,
}

impl OcrServiceRecognizer {
    pub fn new(client: OcrClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TextRecognizer for OcrServiceRecognizer {
    async fn recognize(&self, bucket: &str, key: &str) -> Result<Recognized> {
        let result = self
            .client
            .detect_text(bucket, key)
            .await
            .map_err(|e| match e {
                OcrError::Api { status, message } if status >= 500 => {
                    IngestError::Transient(format!("OCR backend {status}: {message}"))
                }
                OcrError::Http(err) => IngestError::Transient(format!("OCR transport: {err}")),
                other => IngestError::Extraction(other.to_string()),
            })?;
        Ok(Recognized {
            text: result.text,
            page_count: result.page_count,
        })
    }
}

/// Primary strategy for PDFs and images.
pub struct RemoteOcrStrategy {
    recognizer: Arc<dyn TextRecognizer>,
    objects: Arc<VerifiedStore>,
    bucket: String,
}

impl RemoteOcrStrategy {
    pub fn new(
        recognizer: Arc<dyn TextRecognizer>,
        objects: Arc<VerifiedStore>,
        bucket: &str,
    ) -> Self {
        Self {
            recognizer,
            objects,
            bucket: bucket.to_string(),
        }
    }
}

#[async_trait]
impl ExtractionStrategy for RemoteOcrStrategy {
    fn name(&self) -> &'static str {
        "remote_ocr"
    }

    fn accepts(&self, document_type: DocumentType) -> bool {
        matches!(document_type, DocumentType::Pdf | DocumentType::Image)
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<Extraction> {
        let key = temp_key("ocr", input.user_id, input.filename);
        let metadata = ObjectMetadata::new(input.filename, input.user_id, input.bytes);
        self.objects
            .put_verified(
                &key,
                input.bytes,
                &driftnet_store::guess_content_type(input.filename),
                &metadata,
            )
            .await?;

        let recognized = self.recognizer.recognize(&self.bucket, &key).await;

        // The temp object is scratch space; a failed cleanup must not fail
        // the extraction.
        if let Err(e) = self.objects.delete(&key).await {
            tracing::warn!(key, error = %e, "Failed to delete temp OCR object");
        }

        let recognized = recognized?;
        Ok(Extraction {
            text: recognized.text,
            page_count: recognized.page_count,
            method: "remote_ocr",
        })
    }
}
