// Local PDF strategies: embedded-text parsing, then a regex salvage pass
// over raw text streams for files the parser cannot handle.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use driftnet_common::{DocumentType, IngestError, Result};

use super::{Extraction, ExtractionInput, ExtractionStrategy};

/// Matches a page object marker; `Pages` (the tree node) is excluded by
/// the word boundary.
static PAGE_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/Type\s*/Page\b").expect("valid regex"));

/// BT ... ET delimits a text block in a content stream.
static TEXT_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)BT(.*?)ET").expect("valid regex"));

/// Literal strings inside a text block: `(some text) Tj` and friends.
static LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([^()\\]{2,})\)").expect("valid regex"));

fn count_pages(latin1: &str) -> Option<u32> {
    let count = PAGE_MARKER_RE.find_iter(latin1).count() as u32;
    (count > 0).then_some(count)
}

/// Lossless single-byte view of the raw bytes, so regexes can run over
/// binary PDF content.
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Lightweight extraction of text embedded in the PDF.
pub struct EmbeddedPdfStrategy;

#[async_trait]
impl ExtractionStrategy for EmbeddedPdfStrategy {
    fn name(&self) -> &'static str {
        "embedded"
    }

    fn accepts(&self, document_type: DocumentType) -> bool {
        document_type == DocumentType::Pdf
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<Extraction> {
        // PDF parsing is CPU-bound; keep it off the I/O executor.
        let bytes = input.bytes.to_vec();
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| IngestError::Extraction(format!("extraction task failed: {e}")))?
            .map_err(|e| IngestError::Extraction(format!("embedded text parse: {e}")))?;

        Ok(Extraction {
            page_count: count_pages(&latin1(input.bytes)),
            text,
            method: "embedded",
        })
    }
}

/// Last-resort salvage: scan raw text streams for literal strings inside
/// BT/ET text blocks. Catches simple uncompressed PDFs that defeat the
/// parser.
pub struct AggressivePdfStrategy;

impl AggressivePdfStrategy {
    pub fn new() -> Self {
        Self
    }

    fn salvage(latin1: &str) -> String {
        let mut pieces = Vec::new();
        for block in TEXT_BLOCK_RE.captures_iter(latin1) {
            for literal in LITERAL_RE.captures_iter(&block[1]) {
                let candidate = literal[1].trim();
                if candidate.chars().any(|c| c.is_alphanumeric()) {
                    pieces.push(candidate.to_string());
                }
            }
        }
        pieces.join(" ")
    }
}

impl Default for AggressivePdfStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExtractionStrategy for AggressivePdfStrategy {
    fn name(&self) -> &'static str {
        "aggressive"
    }

    fn accepts(&self, document_type: DocumentType) -> bool {
        document_type == DocumentType::Pdf
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<Extraction> {
        let decoded = latin1(input.bytes);
        let text = Self::salvage(&decoded);
        Ok(Extraction {
            page_count: count_pages(&decoded).or(Some(1)),
            text,
            method: "aggressive",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal single-page PDF with one uncompressed text stream.
    fn tiny_pdf(text: &str) -> Vec<u8> {
        format!(
            "%PDF-1.4\n\
             1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n\
             2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n\
             3 0 obj << /Type /Page /Parent 2 0 R /Contents 4 0 R >> endobj\n\
             4 0 obj << /Length 44 >> stream\n\
             BT /F1 12 Tf 72 712 Td ({text}) Tj ET\n\
             endstream endobj\n\
             trailer << /Root 1 0 R >>\n\
             %%EOF"
        )
        .into_bytes()
    }

    fn input<'a>(bytes: &'a [u8]) -> ExtractionInput<'a> {
        ExtractionInput {
            bytes,
            filename: "doc.pdf",
            user_id: "u1",
        }
    }

    #[tokio::test]
    async fn aggressive_salvages_literal_strings() {
        let pdf = tiny_pdf("Hello, world.");
        let extraction = AggressivePdfStrategy::new()
            .extract(&input(&pdf))
            .await
            .unwrap();
        assert!(extraction.text.contains("Hello, world."));
        assert_eq!(extraction.method, "aggressive");
        assert_eq!(extraction.page_count, Some(1));
    }

    #[tokio::test]
    async fn aggressive_yields_nothing_for_scanned_pdfs() {
        // No BT/ET text blocks at all, as in an image-only scan.
        let pdf = b"%PDF-1.4\n1 0 obj << /Type /Page >> endobj\n%%EOF";
        let extraction = AggressivePdfStrategy::new()
            .extract(&input(pdf))
            .await
            .unwrap();
        assert!(extraction.text.is_empty());
    }

    #[test]
    fn page_counting_skips_the_pages_tree_node() {
        let pdf = tiny_pdf("x");
        assert_eq!(count_pages(&latin1(&pdf)), Some(1));
    }
}
