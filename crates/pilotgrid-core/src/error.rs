//! Error types for the collaborator contracts and configuration loading.

use thiserror::Error;

/// Result type alias for queue connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Errors surfaced by a queue connector.
///
/// All of these are recoverable from the scheduler's point of view: they
/// drive the per-queue backoff counter and never abort a cycle.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("remote operation timed out after {0}s")]
    Timeout(u64),

    #[error("remote endpoint error: {0}")]
    Remote(String),

    #[error("operation not supported by this endpoint: {0}")]
    Unsupported(String),
}

/// Result type alias for demand oracle queries.
pub type OracleResult<T> = Result<T, OracleError>;

/// Errors surfaced by the demand oracle.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("demand query failed: {0}")]
    Query(String),
}

/// Result type alias for credential issuance.
pub type CredentialResult<T> = Result<T, CredentialError>;

/// Errors surfaced by the credential provider.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential issuance failed for {subject}: {reason}")]
    Issuance { subject: String, reason: String },
}

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
