// Extraction strategies. Each strategy declares which document types it
// accepts; the registry tries them in order until one yields non-empty
// text.

pub mod pdf;
pub mod remote_ocr;
pub mod text;

pub use pdf::{AggressivePdfStrategy, EmbeddedPdfStrategy};
pub use remote_ocr::{OcrServiceRecognizer, Recognized, RemoteOcrStrategy, TextRecognizer};
pub use text::{HtmlStripStrategy, RawSalvageStrategy, TextDecodeStrategy};

use std::sync::Arc;

use async_trait::async_trait;

use driftnet_common::{DocumentType, IngestError, Result};

/// What a strategy needs to see for one document.
pub struct ExtractionInput<'a> {
    pub bytes: &'a [u8],
    pub filename: &'a str,
    pub user_id: &'a str,
}

/// A successful extraction.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub text: String,
    pub page_count: Option<u32>,
    /// Tag identifying which strategy produced the text.
    pub method: &'static str,
}

#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn accepts(&self, document_type: DocumentType) -> bool;

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<Extraction>;
}

/// Ordered strategy list. Order is significant: for PDFs the remote OCR
/// service runs first, then embedded-text parsing, then the regex salvage
/// of last resort.
pub struct ExtractorRegistry {
    strategies: Vec<Arc<dyn ExtractionStrategy>>,
}

impl ExtractorRegistry {
    pub fn new(strategies: Vec<Arc<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    /// The standard ordering. `ocr` is optional; without it PDFs fall
    /// straight through to embedded-text parsing and images to raw
    /// salvage.
    pub fn standard(ocr: Option<Arc<RemoteOcrStrategy>>) -> Self {
        let mut strategies: Vec<Arc<dyn ExtractionStrategy>> = Vec::new();
        if let Some(ocr) = ocr {
            strategies.push(ocr);
        }
        strategies.push(Arc::new(EmbeddedPdfStrategy));
        strategies.push(Arc::new(AggressivePdfStrategy::new()));
        strategies.push(Arc::new(HtmlStripStrategy));
        strategies.push(Arc::new(TextDecodeStrategy));
        strategies.push(Arc::new(RawSalvageStrategy));
        Self::new(strategies)
    }

    pub fn strategies_for(&self, document_type: DocumentType) -> Vec<Arc<dyn ExtractionStrategy>> {
        self.strategies
            .iter()
            .filter(|s| s.accepts(document_type))
            .cloned()
            .collect()
    }

    /// Run strategies in order until one yields non-empty text.
    pub async fn extract(
        &self,
        document_type: DocumentType,
        input: &ExtractionInput<'_>,
    ) -> Result<Extraction> {
        let candidates = self.strategies_for(document_type);
        if candidates.is_empty() {
            return Err(IngestError::Extraction(format!(
                "no extraction strategy accepts {document_type}"
            )));
        }

        for strategy in candidates {
            match strategy.extract(input).await {
                Ok(extraction) if !extraction.text.trim().is_empty() => {
                    tracing::info!(
                        filename = input.filename,
                        method = strategy.name(),
                        chars = extraction.text.len(),
                        "Extraction succeeded"
                    );
                    return Ok(extraction);
                }
                Ok(_) => {
                    tracing::debug!(
                        filename = input.filename,
                        method = strategy.name(),
                        "Strategy produced no text, trying next"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        filename = input.filename,
                        method = strategy.name(),
                        error = %e,
                        "Strategy failed, trying next"
                    );
                }
            }
        }

        Err(IngestError::Extraction(format!(
            "all strategies exhausted for {}",
            input.filename
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedStrategy {
        name: &'static str,
        text: &'static str,
    }

    #[async_trait]
    impl ExtractionStrategy for FixedStrategy {
        fn name(&self) -> &'static str {
            self.name
        }
        fn accepts(&self, document_type: DocumentType) -> bool {
            document_type == DocumentType::Text
        }
        async fn extract(&self, _input: &ExtractionInput<'_>) -> Result<Extraction> {
            Ok(Extraction {
                text: self.text.to_string(),
                page_count: None,
                method: self.name,
            })
        }
    }

    fn input<'a>(bytes: &'a [u8]) -> ExtractionInput<'a> {
        ExtractionInput {
            bytes,
            filename: "f.txt",
            user_id: "u1",
        }
    }

    #[tokio::test]
    async fn first_non_empty_strategy_wins() {
        let registry = ExtractorRegistry::new(vec![
            Arc::new(FixedStrategy { name: "empty", text: "" }),
            Arc::new(FixedStrategy { name: "second", text: "found it" }),
            Arc::new(FixedStrategy { name: "third", text: "never reached" }),
        ]);
        let result = registry
            .extract(DocumentType::Text, &input(b"x"))
            .await
            .unwrap();
        assert_eq!(result.method, "second");
        assert_eq!(result.text, "found it");
    }

    #[tokio::test]
    async fn all_empty_is_an_extraction_error() {
        let registry = ExtractorRegistry::new(vec![Arc::new(FixedStrategy {
            name: "empty",
            text: "",
        })]);
        let result = registry.extract(DocumentType::Text, &input(b"x")).await;
        assert!(matches!(result, Err(IngestError::Extraction(_))));
    }

    #[tokio::test]
    async fn unaccepted_type_is_an_error() {
        let registry = ExtractorRegistry::new(vec![Arc::new(FixedStrategy {
            name: "text_only",
            text: "t",
        })]);
        let result = registry.extract(DocumentType::Pdf, &input(b"x")).await;
        assert!(matches!(result, Err(IngestError::Extraction(_))));
    }
}
