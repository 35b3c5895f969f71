use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DefectError {
    /// The image is missing or its codec failed. Ingestion skips the image,
    /// a query fails.
    #[error("cannot read image {}: {reason}", path.display())]
    ImageUnreadable { path: PathBuf, reason: String },
    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),
    /// The persisted index and metadata files were not written together
    #[error("index and metadata do not match: {0}")]
    StoreMismatch(String),
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("encoder error: {0}")]
    Encoder(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
    #[error(transparent)]
    Bincode(#[from] bincode::Error),
}

pub type Result<T, E = DefectError> = std::result::Result<T, E>;
