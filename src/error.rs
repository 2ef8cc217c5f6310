use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("document unreadable: {}: {reason}", .path.display())]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("embedding provider error: {0}")]
    EmbeddingProviderError(String),

    #[error("chat provider error: {0}")]
    ChatProviderError(String),

    #[error("collection unavailable: {0}")]
    CollectionUnavailable(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("upsert needs one vector per id: {ids} ids, {vectors} vectors")]
    LengthMismatch { ids: usize, vectors: usize },

    #[error("missing credential: set {0} in the environment")]
    MissingCredential(&'static str),

    #[error("page id is not a page index: {0:?}")]
    InvalidPageId(String),

    #[error("vector store error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl PipelineError {
    pub fn source_unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::SourceUnreadable {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
