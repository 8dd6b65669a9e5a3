// Verified uploads: every put is read back and checked against the source
// bytes. Constrained runtimes and PDFs take a spooled path through a local
// temp file, which is the only upload route observed to survive the
// in-memory corruption those runtimes exhibit on large binary payloads.

use std::io::{Read, Write};
use std::sync::Arc;

use rand::Rng;

use driftnet_common::{
    fingerprint, retry, sanitize_filename, IngestError, Result, RetryPolicy, RuntimeProfile,
};

use crate::object::{ObjectMetadata, ObjectStore};

/// Object store wrapper that owns the put discipline: path selection,
/// spooling, and mandatory read-back verification.
pub struct VerifiedStore {
    inner: Arc<dyn ObjectStore>,
    profile: RuntimeProfile,
}

impl VerifiedStore {
    pub fn new(inner: Arc<dyn ObjectStore>, profile: RuntimeProfile) -> Self {
        Self { inner, profile }
    }

    /// Store bytes under `key` and verify the stored copy byte-for-byte.
    ///
    /// Backend failures are retried (2 retries, 100ms/400ms). A
    /// verification mismatch is an `Integrity` error and is never retried
    /// here; the caller decides whether to re-run the whole operation.
    pub async fn put_verified(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<()> {
        let spooled = self.profile.constrained || bytes.starts_with(b"%PDF-");
        let source_md5 = fingerprint(bytes);

        retry(RetryPolicy::transient(), || async {
            let result = if spooled {
                self.spooled_put(key, bytes, content_type, metadata, &source_md5)
                    .await
            } else {
                self.inner.put(key, bytes, content_type, metadata).await
            };
            result.map_err(as_transient)
        })
        .await?;

        let stored = self.inner.get(key).await.map_err(as_transient)?;
        if stored.len() != bytes.len() {
            return Err(IngestError::Integrity(format!(
                "stored object {key} has {} bytes, expected {}",
                stored.len(),
                bytes.len()
            )));
        }
        let stored_md5 = fingerprint(&stored);
        if stored_md5 != source_md5 {
            return Err(IngestError::Integrity(format!(
                "stored object {key} hash {stored_md5} != source {source_md5}"
            )));
        }

        tracing::debug!(key, bytes = bytes.len(), spooled, "Verified put complete");
        Ok(())
    }

    /// Write the payload to a temp file, fsync, re-read and hash-check it,
    /// then upload the re-read bytes.
    async fn spooled_put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: &ObjectMetadata,
        source_md5: &str,
    ) -> Result<()> {
        let mut spool = tempfile::NamedTempFile::new()
            .map_err(|e| IngestError::Transient(format!("spool create failed: {e}")))?;
        spool
            .write_all(bytes)
            .map_err(|e| IngestError::Transient(format!("spool write failed: {e}")))?;
        spool
            .flush()
            .map_err(|e| IngestError::Transient(format!("spool flush failed: {e}")))?;
        spool
            .as_file()
            .sync_all()
            .map_err(|e| IngestError::Transient(format!("spool sync failed: {e}")))?;

        let mut re_read = Vec::with_capacity(bytes.len());
        spool
            .reopen()
            .and_then(|mut f| f.read_to_end(&mut re_read))
            .map_err(|e| IngestError::Transient(format!("spool re-read failed: {e}")))?;

        if re_read.len() != bytes.len() || fingerprint(&re_read) != source_md5 {
            return Err(IngestError::Integrity(format!(
                "spool file for {key} does not match source bytes"
            )));
        }

        self.inner.put(key, &re_read, content_type, metadata).await
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.get(key).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }
}

fn as_transient(e: IngestError) -> IngestError {
    match e {
        IngestError::Database(err) => IngestError::Transient(format!("object backend: {err}")),
        other => other,
    }
}

// --- Key scheme ---

/// `uploaded_documents/{user_id}/{epoch}_{rand8}{ext}`
pub fn upload_key(user_id: &str, filename: &str) -> String {
    format!(
        "uploaded_documents/{user_id}/{}",
        timestamped_name(filename)
    )
}

/// `temp/{purpose}/{user_id}/{epoch}_{rand8}{ext}`: scratch objects handed
/// to downstream services, deleted after use.
pub fn temp_key(purpose: &str, user_id: &str, filename: &str) -> String {
    format!("temp/{purpose}/{user_id}/{}", timestamped_name(filename))
}

/// `crawled/{task_id}/{relative_path_safe}`
pub fn crawled_key(task_id: &uuid::Uuid, source_url: &str) -> String {
    let path = source_url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let safe: String = path
        .chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() => c,
            '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    let safe = safe.trim_matches('_');
    let capped = &safe[..safe.len().min(180)];
    format!("crawled/{task_id}/{capped}")
}

fn timestamped_name(filename: &str) -> String {
    let sanitized = sanitize_filename(filename);
    let ext = std::path::Path::new(&sanitized)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();
    let epoch = chrono::Utc::now().timestamp();
    let nonce: String = {
        let mut rng = rand::rng();
        (0..8)
            .map(|_| {
                let digit = rng.random_range(0..16u8);
                char::from_digit(digit as u32, 16).unwrap_or('0')
            })
            .collect()
    };
    format!("{epoch}_{nonce}{ext}")
}

/// Content type for an object, guessed from the filename extension.
pub fn guess_content_type(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::MemoryObjectStore;

    fn metadata_for(bytes: &[u8]) -> ObjectMetadata {
        ObjectMetadata::new("file.bin", "u1", bytes)
    }

    #[tokio::test]
    async fn direct_put_verifies_and_stores() {
        let backend = Arc::new(MemoryObjectStore::new());
        let store = VerifiedStore::new(backend.clone(), RuntimeProfile::standard());
        store
            .put_verified("k/a", b"payload", "application/octet-stream", &metadata_for(b"payload"))
            .await
            .unwrap();
        assert_eq!(store.get("k/a").await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn pdf_bytes_take_the_spooled_path() {
        let backend = Arc::new(MemoryObjectStore::new());
        let store = VerifiedStore::new(backend.clone(), RuntimeProfile::standard());
        let pdf = b"%PDF-1.4\nstream data\n%%EOF";
        store
            .put_verified("k/doc.pdf", pdf, "application/pdf", &metadata_for(pdf))
            .await
            .unwrap();
        assert_eq!(store.get("k/doc.pdf").await.unwrap(), pdf);
    }

    #[tokio::test]
    async fn constrained_profile_spools_everything() {
        let backend = Arc::new(MemoryObjectStore::new());
        let store = VerifiedStore::new(backend.clone(), RuntimeProfile::constrained());
        store
            .put_verified("k/b", b"not a pdf", "text/plain", &metadata_for(b"not a pdf"))
            .await
            .unwrap();
        assert_eq!(store.get("k/b").await.unwrap(), b"not a pdf");
    }

    #[tokio::test]
    async fn corrupted_write_is_an_integrity_error() {
        let backend = Arc::new(MemoryObjectStore::new());
        backend.set_corrupt_puts(true);
        let store = VerifiedStore::new(backend.clone(), RuntimeProfile::standard());
        let result = store
            .put_verified("k/c", b"payload", "application/octet-stream", &metadata_for(b"payload"))
            .await;
        assert!(matches!(result, Err(IngestError::Integrity(_))));
    }

    #[test]
    fn upload_keys_keep_extension_and_user_scope() {
        let key = upload_key("u1", "Quarterly Report.PDF");
        assert!(key.starts_with("uploaded_documents/u1/"), "{key}");
        assert!(key.ends_with(".pdf"), "{key}");
    }

    #[test]
    fn temp_keys_carry_purpose() {
        let key = temp_key("ocr", "u1", "scan.png");
        assert!(key.starts_with("temp/ocr/u1/"), "{key}");
        assert!(key.ends_with(".png"), "{key}");
    }

    #[test]
    fn crawled_keys_are_path_safe() {
        let task_id = uuid::Uuid::new_v4();
        let key = crawled_key(&task_id, "https://example.com/a/b/report.pdf?v=1");
        assert!(key.starts_with(&format!("crawled/{task_id}/")), "{key}");
        assert!(!key.contains('?'), "{key}");
        assert!(!key.contains("//"), "{key}");
    }

    #[test]
    fn content_type_guessing() {
        assert_eq!(guess_content_type("a.pdf"), "application/pdf");
        assert_eq!(guess_content_type("a.unknownext"), "application/octet-stream");
    }
}
