//! Job, replica, and routing types for the staging engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use pilotgrid_core::{SiteName, StorageName};

/// What kind of job is being routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    User,
    /// Bulk production work is routed without replica arbitration; its
    /// staging is arranged through a separate pre-production check.
    Production,
}

/// The routing-relevant slice of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: u64,
    pub kind: JobKind,
    /// Sites the user pinned the job to; empty means any.
    pub sites: Vec<SiteName>,
    pub banned_sites: Vec<SiteName>,
    pub platform: Option<String>,
    pub input_files: Vec<String>,
}

/// Per-site view used for candidate filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteInfo {
    pub name: SiteName,
    /// Platforms offered by the site's CEs.
    pub platforms: Vec<String>,
    /// Storage endpoints local to the site.
    pub storage: Vec<StorageName>,
}

/// Replica presence of one file at one storage endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaFlags {
    pub on_disk: bool,
    pub on_tape: bool,
    /// Whether the endpoint is reachable with a staging-capable protocol.
    pub protocol_ok: bool,
}

/// file → storage endpoint → replica flags.
///
/// Shared across the jobs of one routing batch so that staging submitted
/// for one job credits the other candidates without a second remote query.
#[derive(Debug, Clone, Default)]
pub struct ReplicaTable {
    replicas: HashMap<String, HashMap<StorageName, ReplicaFlags>>,
}

impl ReplicaTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file: &str, storage: &str, flags: ReplicaFlags) {
        self.replicas
            .entry(file.to_string())
            .or_default()
            .insert(storage.to_string(), flags);
    }

    pub fn flags(&self, file: &str, storage: &str) -> Option<ReplicaFlags> {
        self.replicas.get(file)?.get(storage).copied()
    }

    /// Credit freshly staged files as disk-resident at their endpoint.
    pub fn credit_disk(&mut self, storage: &str, files: &[String]) {
        for file in files {
            let entry = self
                .replicas
                .entry(file.clone())
                .or_default()
                .entry(storage.to_string())
                .or_default();
            entry.on_disk = true;
        }
    }
}

/// Staging work for one job: per-endpoint lists of files to bring to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingPlan {
    pub job: u64,
    pub site: SiteName,
    pub per_storage: HashMap<StorageName, Vec<String>>,
}

/// Temporary obstacles: the job should be retried after a delay.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HoldReason {
    #[error("no active staging candidate site")]
    NoActiveCandidate,

    #[error("staging request failed: {0}")]
    StagingUnavailable(String),

    #[error("demand registration failed: {0}")]
    RoutingUnavailable(String),
}

/// The routing decision for one job.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingOutcome {
    /// The job was registered for matching against the given sites.
    Direct { sites: Vec<SiteName> },
    /// A staging request was submitted; the job parks until it completes.
    AwaitingStage { site: SiteName, request: String },
    /// Temporary obstacle; retry later.
    Hold { reason: HoldReason },
    /// Permanent failure with an operator-readable reason.
    Failed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replica_table_round_trip() {
        let mut table = ReplicaTable::new();
        table.insert(
            "/data/f1",
            "se-disk",
            ReplicaFlags {
                on_disk: true,
                on_tape: false,
                protocol_ok: true,
            },
        );

        let flags = table.flags("/data/f1", "se-disk").unwrap();
        assert!(flags.on_disk);
        assert!(table.flags("/data/f1", "se-tape").is_none());
        assert!(table.flags("/data/f2", "se-disk").is_none());
    }

    #[test]
    fn credit_disk_upgrades_existing_flags() {
        let mut table = ReplicaTable::new();
        table.insert(
            "/data/f1",
            "se-tape",
            ReplicaFlags {
                on_disk: false,
                on_tape: true,
                protocol_ok: true,
            },
        );

        table.credit_disk("se-tape", &["/data/f1".to_string(), "/data/f2".to_string()]);

        let f1 = table.flags("/data/f1", "se-tape").unwrap();
        assert!(f1.on_disk);
        assert!(f1.on_tape);
        // Unknown files get a fresh disk-only entry.
        let f2 = table.flags("/data/f2", "se-tape").unwrap();
        assert!(f2.on_disk);
        assert!(!f2.on_tape);
    }
}
