//! Scheduling loop error types.

use thiserror::Error;

use pilotgrid_core::{ConnectorError, CredentialError, OracleError};
use pilotgrid_registry::RegistryError;

/// Errors that abort a whole cycle.
///
/// Only the global demand gate can do that; everything after it is isolated
/// per queue.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("coarse demand query failed: {0}")]
    Demand(#[from] OracleError),
}

/// Per-queue failures. These drive the queue's backoff counter and never
/// propagate to other queues or the cycle.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("demand sizing failed: {0}")]
    Oracle(#[from] OracleError),

    #[error("registry query failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("credential unavailable: {0}")]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("remote call timed out after {0}s")]
    Timeout(u64),
}
