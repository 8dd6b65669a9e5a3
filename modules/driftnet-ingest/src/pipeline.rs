// The document pipeline: detect → extract → clean → store → record → index.
// Everything after a successful extraction is attempted; a vector-upload
// failure downgrades the record but never rolls back the object write or
// the document row.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use driftnet_common::{
    fingerprint, sanitize_filename, Document, DocumentStatus, IngestError, Result,
};
use driftnet_store::{
    crawled_key, guess_content_type, upload_key, DocumentStore, ObjectMetadata, VerifiedStore,
};

use crate::clean::normalize_whitespace;
use crate::detect::{detect_type, extension_allowed};
use crate::extract::{ExtractionInput, ExtractorRegistry};
use crate::vector::{SessionVectorManager, VectorIndex};

/// Shown to users when extraction comes up empty. Describes likely causes
/// and remediations without naming any internals.
pub const NO_TEXT_MESSAGE: &str = "No readable text could be extracted from this document. \
    It may be a scanned document containing only images, password-protected, or corrupted. \
    Try uploading a text-based copy, removing the password protection, or converting it to \
    a different format such as plain text.";

const STORE_FAILED_MESSAGE: &str =
    "The document could not be stored reliably. Please try uploading it again.";

const VECTOR_FAILED_MESSAGE: &str = "The document was processed, but search indexing is \
    currently unavailable for it. Its text is stored and can be re-indexed later.";

const CANCELLED_MESSAGE: &str = "Search indexing was skipped because the crawl was cancelled.";

pub struct PipelineConfig {
    /// Name of the global vector store used when no session is given.
    pub default_store_name: String,
    pub max_body_bytes: usize,
    pub allowed_extensions: Vec<String>,
}

pub struct DocumentPipeline {
    objects: Arc<VerifiedStore>,
    documents: Arc<dyn DocumentStore>,
    vectors: Arc<dyn VectorIndex>,
    sessions: SessionVectorManager,
    registry: ExtractorRegistry,
    config: PipelineConfig,
}

struct RunInput<'a> {
    user_id: &'a str,
    task_id: Option<Uuid>,
    session_id: Option<&'a str>,
    filename: &'a str,
    bytes: &'a [u8],
    object_key: String,
    content_hash: String,
    /// Declared content type; guessed from the filename when absent.
    content_type: Option<&'a str>,
    metadata: serde_json::Value,
    /// Pre-extracted text bypasses the strategy registry entirely.
    pre_extracted: Option<String>,
    cancel: Option<&'a CancellationToken>,
}

impl DocumentPipeline {
    pub fn new(
        objects: Arc<VerifiedStore>,
        documents: Arc<dyn DocumentStore>,
        vectors: Arc<dyn VectorIndex>,
        registry: ExtractorRegistry,
        config: PipelineConfig,
    ) -> Self {
        Self {
            objects,
            documents,
            vectors,
            sessions: SessionVectorManager::new(),
            registry,
            config,
        }
    }

    pub fn vectors(&self) -> &Arc<dyn VectorIndex> {
        &self.vectors
    }

    /// Ingest a user upload. Session-scoped when `session_id` is given,
    /// otherwise indexed into the global store.
    pub async fn ingest_upload(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        filename: &str,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> Result<Document> {
        self.validate(filename, bytes)?;
        let filename = sanitize_filename(filename);
        let content_hash = fingerprint(bytes);

        if let Some(existing) = self.documents.find_by_hash(user_id, &content_hash).await? {
            tracing::info!(
                user_id,
                document_id = %existing.document_id,
                "Identical bytes already ingested, returning existing document"
            );
            return Ok(existing);
        }

        let object_key = upload_key(user_id, &filename);
        self.run(RunInput {
            user_id,
            task_id: None,
            session_id,
            filename: &filename,
            bytes,
            object_key,
            content_hash,
            content_type,
            metadata: serde_json::json!({}),
            pre_extracted: None,
            cancel: None,
        })
        .await
    }

    /// Ingest a document downloaded by a crawl worker.
    #[allow(clippy::too_many_arguments)]
    pub async fn ingest_crawled(
        &self,
        user_id: &str,
        task_id: Uuid,
        source_url: &str,
        filename: &str,
        bytes: &[u8],
        content_type: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Document> {
        self.validate(filename, bytes)?;
        let filename = sanitize_filename(filename);
        let content_hash = fingerprint(bytes);

        if let Some(existing) = self.documents.find_by_hash(user_id, &content_hash).await? {
            tracing::info!(
                user_id,
                document_id = %existing.document_id,
                source_url,
                "Crawled bytes already ingested, returning existing document"
            );
            return Ok(existing);
        }

        let object_key = crawled_key(&task_id, source_url);
        self.run(RunInput {
            user_id,
            task_id: Some(task_id),
            session_id: None,
            filename: &filename,
            bytes,
            object_key,
            content_hash,
            content_type,
            metadata: serde_json::json!({ "source_url": source_url }),
            pre_extracted: None,
            cancel,
        })
        .await
    }

    /// Ingest already-extracted text (e.g. page content captured by the
    /// crawler). Skips the strategy registry; the text is cleaned and
    /// indexed directly.
    pub async fn ingest_crawled_text(
        &self,
        user_id: &str,
        task_id: Uuid,
        filename: &str,
        text: &str,
        metadata: serde_json::Value,
    ) -> Result<Document> {
        if text.trim().is_empty() {
            return Err(IngestError::Validation("content is empty".into()));
        }
        if text.len() > self.config.max_body_bytes {
            return Err(IngestError::Validation(format!(
                "content exceeds the {} byte limit",
                self.config.max_body_bytes
            )));
        }
        let filename = sanitize_filename(filename);
        let bytes = text.as_bytes();
        let content_hash = fingerprint(bytes);

        if let Some(existing) = self.documents.find_by_hash(user_id, &content_hash).await? {
            return Ok(existing);
        }

        let object_key = crawled_key(&task_id, &filename);
        self.run(RunInput {
            user_id,
            task_id: Some(task_id),
            session_id: None,
            filename: &filename,
            bytes,
            object_key,
            content_hash,
            content_type: Some("text/plain"),
            metadata,
            pre_extracted: Some(text.to_string()),
            cancel: None,
        })
        .await
    }

    fn validate(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Err(IngestError::Validation("document is empty".into()));
        }
        if bytes.len() > self.config.max_body_bytes {
            return Err(IngestError::Validation(format!(
                "document exceeds the {} byte limit",
                self.config.max_body_bytes
            )));
        }
        if !extension_allowed(filename, &self.config.allowed_extensions) {
            return Err(IngestError::Validation(format!(
                "file type is not supported: {filename}"
            )));
        }
        if filename.to_lowercase().ends_with(".pdf") && !bytes.starts_with(b"%PDF") {
            return Err(IngestError::Validation(
                "file has a .pdf extension but is not a valid PDF".into(),
            ));
        }
        Ok(())
    }

    async fn run(&self, input: RunInput<'_>) -> Result<Document> {
        let document_type = detect_type(input.filename, input.bytes);

        // Extraction first: its outcome decides the terminal status, but
        // the object write and record creation happen regardless.
        let (text, page_count, method) = match input.pre_extracted {
            Some(text) => (text, None, Some("direct".to_string())),
            None => {
                let extraction_input = ExtractionInput {
                    bytes: input.bytes,
                    filename: input.filename,
                    user_id: input.user_id,
                };
                match self.registry.extract(document_type, &extraction_input).await {
                    Ok(extraction) => (
                        extraction.text,
                        extraction.page_count,
                        Some(extraction.method.to_string()),
                    ),
                    Err(e) => {
                        tracing::warn!(
                            filename = input.filename,
                            error = %e,
                            "Extraction produced no text"
                        );
                        (String::new(), None, None)
                    }
                }
            }
        };
        let cleaned = normalize_whitespace(&text);

        let object_metadata = ObjectMetadata::new(input.filename, input.user_id, input.bytes);
        let content_type = input
            .content_type
            .map(str::to_string)
            .unwrap_or_else(|| guess_content_type(input.filename));
        let mut put_result = self
            .objects
            .put_verified(&input.object_key, input.bytes, &content_type, &object_metadata)
            .await;
        if matches!(put_result, Err(IngestError::Integrity(_))) {
            tracing::warn!(key = %input.object_key, "Integrity failure on put, retrying once");
            put_result = self
                .objects
                .put_verified(&input.object_key, input.bytes, &content_type, &object_metadata)
                .await;
        }

        let mut document = Document {
            document_id: Uuid::new_v4(),
            user_id: input.user_id.to_string(),
            task_id: input.task_id,
            session_id: input.session_id.map(str::to_string),
            filename: input.filename.to_string(),
            object_key: input.object_key.clone(),
            file_size: input.bytes.len() as u64,
            document_type,
            content_hash: input.content_hash.clone(),
            status: DocumentStatus::Processing,
            content: String::new(),
            page_count,
            extraction_method: method,
            vector_store_id: None,
            vector_file_id: None,
            last_error: None,
            metadata: input.metadata,
            uploaded_at: Utc::now(),
            processed_at: None,
        };

        if !self.documents.insert(&document).await? {
            // A concurrent ingest of the same bytes won the insert between
            // the dedup pre-check and here; its record is canonical.
            let Some(existing) = self
                .documents
                .find_by_hash(input.user_id, &input.content_hash)
                .await?
            else {
                return Err(IngestError::Transient(
                    "document record vanished during dedup".into(),
                ));
            };
            tracing::info!(
                user_id = input.user_id,
                document_id = %existing.document_id,
                "Lost dedup race, returning existing document"
            );
            if existing.object_key != input.object_key {
                if let Err(e) = self.objects.delete(&input.object_key).await {
                    tracing::warn!(key = %input.object_key, error = %e, "Object cleanup failed");
                }
            }
            return Ok(existing);
        }

        if let Err(e) = put_result {
            document.status = DocumentStatus::Failed;
            document.last_error = Some(STORE_FAILED_MESSAGE.to_string());
            document.processed_at = Some(Utc::now());
            self.documents.finalize(&document).await?;
            return Err(e);
        }

        if cleaned.is_empty() {
            document.status = DocumentStatus::ProcessedNoText;
            document.last_error = Some(NO_TEXT_MESSAGE.to_string());
            document.processed_at = Some(Utc::now());
            self.documents.finalize(&document).await?;
            return Ok(document);
        }

        document.content = cleaned.clone();

        // Cancellation checkpoint: no new vector work once the enclosing
        // task is cancelled, but the document row and object stay.
        if input.cancel.is_some_and(|c| c.is_cancelled()) {
            document.status = DocumentStatus::ProcessedVectorFailed;
            document.last_error = Some(CANCELLED_MESSAGE.to_string());
            document.processed_at = Some(Utc::now());
            self.documents.finalize(&document).await?;
            return Ok(document);
        }

        let store_id = match input.session_id {
            Some(session) => {
                self.sessions
                    .store_for_session(self.vectors.as_ref(), session)
                    .await
            }
            None => {
                self.vectors
                    .get_or_create_store(&self.config.default_store_name)
                    .await
            }
        };

        match store_id {
            Ok(store_id) => {
                document.vector_store_id = Some(store_id.clone());
                match self
                    .vectors
                    .upload_text(&store_id, &document.filename, &cleaned)
                    .await
                {
                    Ok(file_id) => {
                        document.vector_file_id = Some(file_id);
                        // The backend indexes asynchronously.
                        document.status = DocumentStatus::ProcessedVectorPending;
                    }
                    Err(e) => {
                        tracing::warn!(
                            document_id = %document.document_id,
                            error = %e,
                            "Vector upload failed"
                        );
                        document.status = DocumentStatus::ProcessedVectorFailed;
                        document.last_error = Some(VECTOR_FAILED_MESSAGE.to_string());
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    document_id = %document.document_id,
                    error = %e,
                    "Vector store resolution failed"
                );
                document.status = DocumentStatus::ProcessedVectorFailed;
                document.last_error = Some(VECTOR_FAILED_MESSAGE.to_string());
            }
        }

        document.processed_at = Some(Utc::now());
        self.documents.finalize(&document).await?;
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractorRegistry;
    use crate::vector::MemoryVectorIndex;
    use driftnet_common::config::default_allowed_extensions;
    use driftnet_common::{DocumentType, RuntimeProfile};
    use driftnet_store::{MemoryDocumentStore, MemoryObjectStore};

    struct Harness {
        pipeline: DocumentPipeline,
        objects: Arc<MemoryObjectStore>,
        documents: Arc<MemoryDocumentStore>,
        vectors: Arc<MemoryVectorIndex>,
    }

    fn harness() -> Harness {
        let objects = Arc::new(MemoryObjectStore::new());
        let documents = Arc::new(MemoryDocumentStore::new());
        let vectors = Arc::new(MemoryVectorIndex::new());
        let pipeline = DocumentPipeline::new(
            Arc::new(VerifiedStore::new(objects.clone(), RuntimeProfile::standard())),
            documents.clone(),
            vectors.clone(),
            ExtractorRegistry::standard(None),
            PipelineConfig {
                default_store_name: "Stock Market Data".to_string(),
                max_body_bytes: 10 * 1024 * 1024,
                allowed_extensions: default_allowed_extensions(),
            },
        );
        Harness {
            pipeline,
            objects,
            documents,
            vectors,
        }
    }

    #[tokio::test]
    async fn text_upload_is_extracted_cleaned_and_indexed() {
        let h = harness();
        let document = h
            .pipeline
            .ingest_upload("u1", None, "notes.txt", b"Hello,\n\n   world.", None)
            .await
            .unwrap();

        assert_eq!(document.status, DocumentStatus::ProcessedVectorPending);
        assert_eq!(document.content, "Hello, world.");
        assert_eq!(document.document_type, DocumentType::Text);
        assert_eq!(document.extraction_method.as_deref(), Some("text_decode"));
        assert!(document.vector_file_id.is_some());
        assert!(document.object_key.starts_with("uploaded_documents/u1/"));
        assert_eq!(h.objects.len(), 1);
        assert_eq!(h.vectors.total_files(), 1);
    }

    #[tokio::test]
    async fn duplicate_upload_returns_existing_document() {
        let h = harness();
        let first = h
            .pipeline
            .ingest_upload("u1", None, "notes.txt", b"same bytes", None)
            .await
            .unwrap();
        let second = h
            .pipeline
            .ingest_upload("u1", None, "renamed.txt", b"same bytes", None)
            .await
            .unwrap();

        assert_eq!(first.document_id, second.document_id);
        assert_eq!(h.documents.len(), 1);
        assert_eq!(h.vectors.total_files(), 1);
    }

    #[tokio::test]
    async fn same_bytes_different_users_are_separate() {
        let h = harness();
        let a = h
            .pipeline
            .ingest_upload("u1", None, "notes.txt", b"shared bytes", None)
            .await
            .unwrap();
        let b = h
            .pipeline
            .ingest_upload("u2", None, "notes.txt", b"shared bytes", None)
            .await
            .unwrap();
        assert_ne!(a.document_id, b.document_id);
        assert_eq!(h.vectors.total_files(), 2);
    }

    #[tokio::test]
    async fn session_upload_lands_in_session_store() {
        let h = harness();
        let document = h
            .pipeline
            .ingest_upload("u1", Some("abcdef1234567890"), "notes.txt", b"session doc", None)
            .await
            .unwrap();
        assert_eq!(document.status, DocumentStatus::ProcessedVectorPending);
        assert!(h
            .vectors
            .store_names()
            .contains(&"session_abcdef12".to_string()));
    }

    #[tokio::test]
    async fn scanned_pdf_becomes_processed_no_text() {
        let h = harness();
        // Valid PDF magic but no text streams and no OCR configured.
        let pdf = b"%PDF-1.4\n1 0 obj << /Type /Page >> endobj\nbinary\x00only\n%%EOF";
        let document = h
            .pipeline
            .ingest_upload("u1", None, "scan.pdf", pdf, None)
            .await
            .unwrap();

        assert_eq!(document.status, DocumentStatus::ProcessedNoText);
        assert_eq!(document.content, "");
        assert!(document.vector_file_id.is_none());
        let message = document.last_error.unwrap();
        assert!(message.contains("scanned"));
        assert!(message.contains("password-protected"));
        // Object still stored despite no text.
        assert_eq!(h.objects.len(), 1);
        assert_eq!(h.vectors.total_files(), 0);
    }

    #[tokio::test]
    async fn vector_outage_downgrades_to_vector_failed() {
        let h = harness();
        h.vectors.set_fail_uploads(true);
        let document = h
            .pipeline
            .ingest_upload("u1", None, "notes.txt", b"text that extracts fine", None)
            .await
            .unwrap();

        assert_eq!(document.status, DocumentStatus::ProcessedVectorFailed);
        assert_eq!(document.content, "text that extracts fine");
        assert!(document.vector_file_id.is_none());
        // Object write and record survive the vector failure.
        assert_eq!(h.objects.len(), 1);
        assert_eq!(h.documents.len(), 1);
    }

    #[tokio::test]
    async fn oversize_upload_is_rejected() {
        let h = harness();
        let mut pipeline_config_bytes = vec![b'a'; 10 * 1024 * 1024 + 1];
        pipeline_config_bytes[0] = b'x';
        let result = h
            .pipeline
            .ingest_upload("u1", None, "big.txt", &pipeline_config_bytes, None)
            .await;
        assert!(matches!(result, Err(IngestError::Validation(_))));
        assert_eq!(h.documents.len(), 0);
    }

    #[tokio::test]
    async fn magicless_pdf_is_rejected() {
        let h = harness();
        let result = h
            .pipeline
            .ingest_upload("u1", None, "fake.pdf", b"this is not a pdf", None)
            .await;
        assert!(matches!(result, Err(IngestError::Validation(_))));
    }

    #[tokio::test]
    async fn empty_upload_is_rejected() {
        let h = harness();
        let result = h.pipeline.ingest_upload("u1", None, "empty.txt", b"", None).await;
        assert!(matches!(result, Err(IngestError::Validation(_))));
    }

    #[tokio::test]
    async fn disallowed_extension_is_rejected() {
        let h = harness();
        let result = h
            .pipeline
            .ingest_upload("u1", None, "malware.exe", b"MZ...", None)
            .await;
        assert!(matches!(result, Err(IngestError::Validation(_))));
    }

    #[tokio::test]
    async fn crawled_text_skips_extraction() {
        let h = harness();
        let task_id = Uuid::new_v4();
        let document = h
            .pipeline
            .ingest_crawled_text(
                "u1",
                task_id,
                "page.html",
                "Page   body \n text",
                serde_json::json!({}),
            )
            .await
            .unwrap();

        assert_eq!(document.status, DocumentStatus::ProcessedVectorPending);
        assert_eq!(document.content, "Page body text");
        assert_eq!(document.extraction_method.as_deref(), Some("direct"));
        assert_eq!(document.task_id, Some(task_id));
    }

    #[tokio::test]
    async fn cancelled_task_skips_vector_upload() {
        let h = harness();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let document = h
            .pipeline
            .ingest_crawled(
                "u1",
                Uuid::new_v4(),
                "https://example.com/a.txt",
                "a.txt",
                b"content after cancel",
                None,
                Some(&cancel),
            )
            .await
            .unwrap();

        assert_eq!(document.status, DocumentStatus::ProcessedVectorFailed);
        assert!(document.vector_file_id.is_none());
        assert_eq!(h.vectors.total_files(), 0);
    }
}
