//! Error types for CR device driver operations

use thiserror::Error;

/// CR device driver error types
#[derive(Error, Debug)]
pub enum CrError {
    /// I/O error occurred during network communication
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device session task has terminated
    #[error("device session closed")]
    SessionClosed,
}

/// Result type alias for CR device operations
pub type Result<T> = std::result::Result<T, CrError>;
