//! Error types for the tinycdn server

use thiserror::Error;

/// Result type alias for cache-engine operations
pub type Result<T> = std::result::Result<T, CdnError>;

/// Error types that can occur while resolving a request into a response
///
/// Errors are `Clone` because a single producer failure is fanned out to
/// every responder coalesced on the same channel.
#[derive(Error, Debug, Clone)]
pub enum CdnError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Directory request: {0}")]
    DirectoryRequest(String),

    #[error("Not a regular file: {0}")]
    NotAFile(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Compression pipeline error: {0}")]
    CompressionError(String),

    #[error("Hash pipeline error: {0}")]
    HashError(String),

    #[error("Response assembly error: {0}")]
    AssemblyError(String),

    #[error("File authority unavailable: {0}")]
    AuthorityError(String),
}

impl From<std::io::Error> for CdnError {
    fn from(err: std::io::Error) -> Self {
        CdnError::IoError(err.to_string())
    }
}
