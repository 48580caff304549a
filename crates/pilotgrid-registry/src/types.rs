//! Pilot record and filter types.

use serde::{Deserialize, Serialize};

use pilotgrid_core::{PilotOutput, PilotRef, PilotStatus, QueueId};

/// Persistent state of one pilot.
///
/// Created by the scheduling loop at submission time; afterwards only the
/// status tracker mutates it (status, timestamps, output, accounting flag).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PilotRecord {
    pub reference: PilotRef,
    /// Submission stamp assigned by the endpoint.
    pub stamp: String,
    pub queue: QueueId,
    /// Demand group this pilot was attributed to at submission.
    pub group_id: u64,
    pub owner: String,
    pub owner_group: String,
    pub status: PilotStatus,
    pub submitted_at: u64,
    /// Unix timestamp of the last observed status change.
    pub last_update: u64,
    /// Retrieved stdout/stderr, or the unavailability sentinel.
    pub output: Option<PilotOutput>,
    /// Set once the lifecycle accounting record has been sent.
    pub accounted: bool,
    /// Jobs this pilot has pulled and executed, maintained externally.
    pub jobs_handled: u32,
}

impl PilotRecord {
    /// A freshly submitted pilot.
    pub fn new(
        reference: PilotRef,
        stamp: String,
        queue: QueueId,
        group_id: u64,
        owner: &str,
        owner_group: &str,
        now: u64,
    ) -> Self {
        Self {
            reference,
            stamp,
            queue,
            group_id,
            owner: owner.to_string(),
            owner_group: owner_group.to_string(),
            status: PilotStatus::Submitted,
            submitted_at: now,
            last_update: now,
            output: None,
            accounted: false,
            jobs_handled: 0,
        }
    }
}

/// Selection filter for registry queries. Unset fields do not restrict.
#[derive(Debug, Clone, Default)]
pub struct PilotFilter {
    pub queue: Option<QueueId>,
    pub group_ids: Option<Vec<u64>>,
    pub statuses: Option<Vec<PilotStatus>>,
}

impl PilotFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(mut self, queue: &QueueId) -> Self {
        self.queue = Some(queue.clone());
        self
    }

    pub fn groups(mut self, ids: impl Into<Vec<u64>>) -> Self {
        self.group_ids = Some(ids.into());
        self
    }

    pub fn statuses(mut self, statuses: impl Into<Vec<PilotStatus>>) -> Self {
        self.statuses = Some(statuses.into());
        self
    }

    pub fn matches(&self, record: &PilotRecord) -> bool {
        if let Some(queue) = &self.queue
            && record.queue != *queue
        {
            return false;
        }
        if let Some(groups) = &self.group_ids
            && !groups.contains(&record.group_id)
        {
            return false;
        }
        if let Some(statuses) = &self.statuses
            && !statuses.contains(&record.status)
        {
            return false;
        }
        true
    }
}
