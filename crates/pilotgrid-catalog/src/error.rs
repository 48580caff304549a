//! Resource catalog error types.

use thiserror::Error;

/// Result type alias for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors that exclude a single queue from a catalog build.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("no connector backend registered for CE type: {0}")]
    UnknownCeType(String),

    #[error("connector construction failed for {queue}: {source}")]
    Connector {
        queue: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid queue definition {queue}: {reason}")]
    InvalidQueue { queue: String, reason: String },
}
