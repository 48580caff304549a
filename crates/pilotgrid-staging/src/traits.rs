//! External collaborators of the staging engine.

use async_trait::async_trait;

use pilotgrid_core::SiteName;

use crate::plan::StagingPlan;

/// The external staging service that executes tape-to-disk copies.
#[async_trait]
pub trait StagingService: Send + Sync {
    /// Submit a staging request; returns its tracking id.
    async fn request_staging(&self, plan: &StagingPlan) -> anyhow::Result<String>;
}

/// Write side of the externally owned job state.
#[async_trait]
pub trait JobStateSink: Send + Sync {
    /// Register the job with the demand queue, restricted to `sites`.
    async fn route_to_demand(&self, job: u64, sites: &[SiteName]) -> anyhow::Result<()>;

    /// Park the job until its staging request completes.
    async fn set_awaiting_stage(&self, job: u64) -> anyhow::Result<()>;

    /// Record a temporary hold; the job will be retried.
    async fn hold(&self, job: u64, reason: &str) -> anyhow::Result<()>;

    /// Record a permanent failure with an operator-readable reason.
    async fn fail(&self, job: u64, reason: &str) -> anyhow::Result<()>;
}
