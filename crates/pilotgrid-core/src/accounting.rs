//! Accounting record shapes emitted by the scheduling loop and tracker.

use serde::{Deserialize, Serialize};

use crate::types::PilotStatus;

/// Outcome of one submission attempt to a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionOutcome {
    Succeeded,
    Failed,
}

/// Emitted once per submission attempt, on both success and failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub site: String,
    pub ce: String,
    pub queue: String,
    pub total_submitted: u32,
    pub total_succeeded: u32,
    pub outcome: SubmissionOutcome,
    pub timestamp: u64,
}

/// Emitted at most once per pilot, after it reaches a final state and its
/// output handling has concluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PilotLifecycleRecord {
    pub owner: String,
    pub group: String,
    pub site: String,
    pub ce: String,
    /// Grid middleware kind, i.e. the CE backend tag.
    pub middleware: String,
    pub final_status: PilotStatus,
    pub jobs_handled: u32,
    pub submitted_at: u64,
    pub finished_at: u64,
}
