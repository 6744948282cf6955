use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("pdf is encrypted: {0}")]
    Encrypted(String),

    #[error("file is empty: {0}")]
    EmptyFile(String),

    #[error("pdf had no extractable text: {0}")]
    NoExtractableText(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid response from {provider}: {details}")]
    Response { provider: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("{0} returned an empty response")]
    EmptyResponse(String),

    #[error("embedding dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("local model {model}: {details}")]
    LocalModel { model: String, details: String },
}

/// Every failure a user action on a [`crate::Session`] can surface.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("upload rejected: {0}")]
    UploadRejected(String),

    #[error("error processing PDF: {0}")]
    Ingestion(#[from] IngestError),

    #[error("model provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("no document has been processed yet")]
    NoDocument,

    #[error("a document is still being indexed")]
    Indexing,

    #[error("question is empty")]
    EmptyQuestion,

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
