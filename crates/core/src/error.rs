use crate::models::{DocumentId, QuestionId};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("document {0} not found")]
    DocumentNotFound(DocumentId),

    #[error("document {0} already has stored chunks")]
    AlreadyIngested(DocumentId),

    #[error("no chunk could be stored for document {0}")]
    NothingStored(DocumentId),
}

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("question {0} not found")]
    QuestionNotFound(QuestionId),

    #[error("answering timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("stored row is malformed: {0}")]
    Corrupt(String),

    #[error("store connection is unusable: {0}")]
    Unavailable(String),
}

/// Failure talking to a remote HTTP backend after retries were spent.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{backend} returned {status}: {body}")]
    Status {
        backend: String,
        status: u16,
        body: String,
    },

    #[error("{0} request failed after retries")]
    Exhausted(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("cannot embed empty text")]
    EmptyInput,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("embedding has {actual} dimensions, expected {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("invalid embedding config: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("{0} returned an empty completion")]
    EmptyCompletion(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("document {0} is already being ingested")]
    AlreadyInFlight(DocumentId),

    #[error("job queue is full")]
    QueueFull,

    #[error("worker has shut down")]
    Closed,
}
