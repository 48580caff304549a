//! Error types for pilot registry operations.

use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("pilot not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}
