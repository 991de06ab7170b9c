//! Error types for Tally core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Tally core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Settings document could not be encoded or decoded.
    #[error("settings encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
