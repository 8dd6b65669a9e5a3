pub type Result<T> = std::result::Result<T, VectorError>;

#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("Vector API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
