use std::path::PathBuf;
use thiserror::Error;

/// Errors raised at the outer surface (configuration, output, watching).
///
/// The analysis core never returns these: unreadable files, unknown aliases,
/// missing targets and cycles are all ordinary values there.
#[derive(Debug, Error)]
pub enum ExplorerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config {file}: {message}")]
    Config { file: PathBuf, message: String },

    #[error("Invalid query: {0}")]
    Query(String),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("JSON encode error: {0}")]
    Json(#[from] serde_json::Error),
}
