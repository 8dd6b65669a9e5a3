// Plain-text, HTML, and raw-salvage strategies.

use async_trait::async_trait;

use driftnet_common::{DocumentType, Result};

use super::{Extraction, ExtractionInput, ExtractionStrategy};

/// UTF-8 decode with replacement. Covers TEXT, and degrades OFFICE and
/// unknown formats to whatever readable text they carry.
pub struct TextDecodeStrategy;

#[async_trait]
impl ExtractionStrategy for TextDecodeStrategy {
    fn name(&self) -> &'static str {
        "text_decode"
    }

    fn accepts(&self, document_type: DocumentType) -> bool {
        matches!(
            document_type,
            DocumentType::Text | DocumentType::Office | DocumentType::Other
        )
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<Extraction> {
        Ok(Extraction {
            text: String::from_utf8_lossy(input.bytes).into_owned(),
            page_count: None,
            method: "text_decode",
        })
    }
}

/// Strip HTML down to readable text.
pub struct HtmlStripStrategy;

#[async_trait]
impl ExtractionStrategy for HtmlStripStrategy {
    fn name(&self) -> &'static str {
        "html_strip"
    }

    fn accepts(&self, document_type: DocumentType) -> bool {
        document_type == DocumentType::Html
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<Extraction> {
        let html = String::from_utf8_lossy(input.bytes);
        Ok(Extraction {
            text: crate::clean::strip_html(&html),
            page_count: None,
            method: "html_strip",
        })
    }
}

/// Image fallback when OCR is unavailable: keep printable ASCII runs, the
/// way `strings` would. Usually yields nothing, which correctly surfaces
/// the document as no-text.
pub struct RawSalvageStrategy;

const MIN_RUN: usize = 4;

#[async_trait]
impl ExtractionStrategy for RawSalvageStrategy {
    fn name(&self) -> &'static str {
        "raw_salvage"
    }

    fn accepts(&self, document_type: DocumentType) -> bool {
        document_type == DocumentType::Image
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<Extraction> {
        let mut runs: Vec<String> = Vec::new();
        let mut current = String::new();
        for &b in input.bytes {
            if (0x20..0x7f).contains(&b) {
                current.push(b as char);
            } else {
                if current.len() >= MIN_RUN && current.chars().any(|c| c.is_alphabetic()) {
                    runs.push(std::mem::take(&mut current));
                } else {
                    current.clear();
                }
            }
        }
        if current.len() >= MIN_RUN && current.chars().any(|c| c.is_alphabetic()) {
            runs.push(current);
        }

        Ok(Extraction {
            text: runs.join(" "),
            page_count: None,
            method: "raw_salvage",
        })
    }
}
