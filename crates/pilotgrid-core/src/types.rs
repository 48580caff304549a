//! Domain types shared across the PilotGrid subsystems.
//!
//! These types cross crate boundaries: the catalog produces
//! `QueueDescriptor`s, the scheduling loop and tracker exchange
//! `PilotRef`/`PilotStatus` with queue connectors, and the demand oracle
//! speaks `CapabilityDescriptor`/`DemandGroup`.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Administrative grouping of computing and storage endpoints.
pub type SiteName = String;

/// Name of a storage endpoint holding file replicas.
pub type StorageName = String;

// ── Queue identity ─────────────────────────────────────────────────

/// Identity of a submission queue behind a computing element at a site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueId {
    pub site: SiteName,
    pub ce: String,
    pub queue: String,
}

impl QueueId {
    pub fn new(site: &str, ce: &str, queue: &str) -> Self {
        Self {
            site: site.to_string(),
            ce: ce.to_string(),
            queue: queue.to_string(),
        }
    }

    /// Composite key used for maps and log fields.
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.site, self.ce, self.queue)
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.site, self.ce, self.queue)
    }
}

/// Fully resolved capability model of one queue.
///
/// Built once per cycle by the resource catalog from the merged site→CE→queue
/// configuration. Immutable for the cycle; a configuration change produces a
/// new descriptor with a new `param_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDescriptor {
    pub id: QueueId,
    /// CE backend tag, resolved through the connector factory.
    pub ce_type: String,
    /// CPU-time budget a pilot may consume in this queue, in seconds.
    pub cpu_time: u64,
    /// Memory limit per slot in MB, when the queue advertises one.
    pub max_ram: Option<u64>,
    pub processors: u32,
    pub whole_node: bool,
    pub platform: Option<String>,
    pub submission_mode: String,
    /// Capability tags offered by the queue (set-union of CE and queue level).
    pub tags: Vec<String>,
    /// Tags a job must carry to be eligible for this queue.
    pub required_tags: Vec<String>,
    /// Communities (VOs) the queue accepts work from.
    pub communities: Vec<String>,
    pub max_waiting_jobs: u32,
    pub max_total_jobs: u32,
    pub waiting_to_running_ratio: f64,
    /// Whether spare capacity is obtained by querying the CE directly.
    pub query_ce: bool,
    /// Whether the submission bundles the credential with the pilot.
    pub bundle_credential: bool,
    /// Queues under test bypass the site usability mask.
    pub under_test: bool,
    /// Content hash of the merged parameters; the connector is reused
    /// while this is stable.
    pub param_hash: String,
}

// ── Pilots ─────────────────────────────────────────────────────────

/// Opaque reference identifying a pilot on its remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PilotRef(pub String);

impl PilotRef {
    pub fn new(r: impl Into<String>) -> Self {
        Self(r.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PilotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote lifecycle state of a pilot.
///
/// Statuses only ever move forward: once a pilot reaches a final state it
/// never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PilotStatus {
    Submitted,
    Waiting,
    Scheduled,
    Running,
    Unknown,
    Done,
    Failed,
    Aborted,
}

impl PilotStatus {
    /// Final states: the pilot is gone from the remote endpoint.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Aborted)
    }

    /// States counted against a queue's waiting allowance.
    pub fn is_waiting(self) -> bool {
        matches!(self, Self::Submitted | Self::Waiting | Self::Scheduled)
    }

    /// States counted toward the waiting allowance when sizing submissions.
    pub const WAITING: [PilotStatus; 3] = [Self::Submitted, Self::Waiting, Self::Scheduled];

    /// States the status tracker keeps polling.
    pub const LIVE: [PilotStatus; 5] = [
        Self::Submitted,
        Self::Waiting,
        Self::Scheduled,
        Self::Running,
        Self::Unknown,
    ];
}

impl fmt::Display for PilotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submitted => "Submitted",
            Self::Waiting => "Waiting",
            Self::Scheduled => "Scheduled",
            Self::Running => "Running",
            Self::Unknown => "Unknown",
            Self::Done => "Done",
            Self::Failed => "Failed",
            Self::Aborted => "Aborted",
        };
        f.write_str(s)
    }
}

/// Spare-capacity report from a queue connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotReport {
    pub slots: u32,
    /// Human-readable detail from the endpoint (waiting/running breakdown).
    pub info: String,
}

/// Result of submitting a batch of pilots to a queue.
#[derive(Debug, Clone, Default)]
pub struct SubmissionReceipt {
    pub refs: Vec<PilotRef>,
    /// Per-pilot submission stamp assigned by the endpoint.
    pub stamps: HashMap<PilotRef, String>,
}

/// Retrieved stdout/stderr of a finished pilot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PilotOutput {
    pub stdout: String,
    pub stderr: String,
}

// ── Demand matching ────────────────────────────────────────────────

/// Capability description handed to the demand oracle.
///
/// Empty vectors mean "no restriction". The coarse per-cycle gate uses the
/// union of all queue capabilities with no site restriction; the per-queue
/// sizing query is scoped to one queue's capabilities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub sites: Vec<SiteName>,
    pub platforms: Vec<String>,
    pub tags: Vec<String>,
    pub communities: Vec<String>,
    pub cpu_time: Option<u64>,
    pub processors: Option<u32>,
}

/// A set of waiting jobs sharing identical scheduling requirements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandGroup {
    pub id: u64,
    pub owner: String,
    pub group: String,
    pub job_count: u32,
    /// Fair-share weight used when attributing submitted pilots.
    pub priority: f64,
    /// Sites this demand is pinned to; empty means any site.
    pub required_sites: Vec<SiteName>,
}

// ── Credentials ────────────────────────────────────────────────────

/// A proxy credential issued for pilot submission or status polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub subject: String,
    pub group: String,
    /// Unix timestamp past which the credential is no longer valid.
    pub expires_at: u64,
}

impl Credential {
    /// Seconds of validity left at `now`.
    pub fn remaining(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }
}

// ── Site mask ──────────────────────────────────────────────────────

/// The externally maintained set of sites currently usable for scheduling.
#[derive(Debug, Clone, Default)]
pub struct SiteMask {
    usable: HashSet<SiteName>,
}

impl SiteMask {
    pub fn new(sites: impl IntoIterator<Item = impl Into<SiteName>>) -> Self {
        Self {
            usable: sites.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, site: &str) -> bool {
        self.usable.contains(site)
    }

    pub fn is_empty(&self) -> bool {
        self.usable.is_empty()
    }

    pub fn len(&self) -> usize {
        self.usable.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SiteName> {
        self.usable.iter()
    }
}
