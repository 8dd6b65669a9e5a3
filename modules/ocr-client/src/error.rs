pub type Result<T> = std::result::Result<T, OcrError>;

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("OCR API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("OCR job ended in state {0}")]
    JobFailed(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
