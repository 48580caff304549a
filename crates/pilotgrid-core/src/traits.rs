//! Collaborator contracts consumed by the PilotGrid subsystems.
//!
//! Implementations live outside this workspace: per-backend CE clients,
//! the central demand matcher, the credential service, and the accounting
//! pipeline. The scheduler only depends on these traits.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::accounting::{PilotLifecycleRecord, SubmissionRecord};
use crate::error::{ConnectorResult, CredentialResult, OracleResult};
use crate::types::{
    CapabilityDescriptor, Credential, DemandGroup, PilotOutput, PilotRef, PilotStatus,
    SlotReport, SubmissionReceipt,
};

/// Capability interface bound to one remote queue.
///
/// Constructed by the connector factory from a queue descriptor, cached by
/// the resource catalog, and reused across cycles while the queue's
/// parameter hash is unchanged.
#[async_trait]
pub trait QueueConnector: Send + Sync {
    /// Report spare capacity. `known` carries the references of pilots this
    /// scheduler already has on the endpoint, so the report can exclude them.
    async fn available(&self, known: &[PilotRef]) -> ConnectorResult<SlotReport>;

    /// Submit `count` pilot executables under the given credential.
    async fn submit(&self, credential: &Credential, count: u32)
    -> ConnectorResult<SubmissionReceipt>;

    /// Query remote status for a batch of pilot references.
    ///
    /// References missing from the returned map are treated as `Unknown`
    /// by the caller.
    async fn status(
        &self,
        refs: &[PilotRef],
    ) -> ConnectorResult<HashMap<PilotRef, PilotStatus>>;

    /// Fetch the stdout/stderr of a finished pilot.
    async fn output(&self, pilot: &PilotRef) -> ConnectorResult<PilotOutput>;

    /// Kill pilots on the remote endpoint. Best effort.
    async fn kill(&self, refs: &[PilotRef]) -> ConnectorResult<()>;
}

/// Answers "how much waiting demand matches this capability".
#[async_trait]
pub trait DemandOracle: Send + Sync {
    async fn matching_demand(
        &self,
        descriptor: &CapabilityDescriptor,
    ) -> OracleResult<Vec<DemandGroup>>;
}

/// Issues proxy credentials with a requested minimum lifetime.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn issue(
        &self,
        subject: &str,
        group: &str,
        lifetime_secs: u64,
    ) -> CredentialResult<Credential>;
}

/// Sink for accounting records.
///
/// Delivery is the sink's own concern; the scheduler fires and forgets.
pub trait AccountingSink: Send + Sync {
    fn record_submission(&self, record: SubmissionRecord);
    fn record_pilot(&self, record: PilotLifecycleRecord);
}
