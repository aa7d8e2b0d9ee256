//! Error types for the procshape core library.

/// Top-level error enum for the procshape core library.
///
/// Only failures that must abort a run surface here. Parse failures, type
/// misses and cache problems are absorbed into diagnostics by the callers.
#[derive(Debug, thiserror::Error)]
pub enum ProcShapeError {
    #[error("Metadata source error: {0}")]
    Metadata(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ProcShapeResult<T> = Result<T, ProcShapeError>;
