// Ingestion core: document type detection, the extraction strategy
// registry, content cleaning, the vector index adapter, and the pipeline
// that ties them together.

pub mod clean;
pub mod detect;
pub mod extract;
pub mod pipeline;
pub mod vector;

pub use detect::{detect_type, extension_allowed};
pub use extract::{
    ExtractionInput, ExtractionStrategy, ExtractorRegistry, OcrServiceRecognizer,
    RemoteOcrStrategy, TextRecognizer,
};
pub use pipeline::{DocumentPipeline, PipelineConfig, NO_TEXT_MESSAGE};
pub use vector::{
    search_when_ready, HttpVectorIndex, MemoryVectorIndex, SessionVectorManager, VectorIndex,
};
