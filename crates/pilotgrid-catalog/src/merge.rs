//! CE→queue parameter merging and content hashing.
//!
//! Queue-level parameters win over CE-level ones; tag lists are merged as a
//! set-union of both levels. The merged parameter set is hashed so the
//! catalog can tell whether a cached connector is still valid.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use pilotgrid_core::{CeEntry, QueueDescriptor, QueueEntry, QueueId, QueueParams};

use crate::error::{CatalogError, CatalogResult};

/// Reference CPU power used to normalize legacy `(max_cpu_time, si00)`
/// pairs into wall-clock seconds.
const SI00_REFERENCE: u64 = 250;

/// CPU-time budget assumed when a queue advertises none.
const DEFAULT_CPU_TIME: u64 = 86_400;

const DEFAULT_MAX_WAITING_JOBS: u32 = 10;
const DEFAULT_MAX_TOTAL_JOBS: u32 = 25;

/// Merge one queue's parameters with its CE's and produce the descriptor.
pub fn merge_queue(
    id: QueueId,
    ce: &CeEntry,
    queue: &QueueEntry,
    max_queue_length: u64,
) -> CatalogResult<QueueDescriptor> {
    let merged = overlay(&ce.params, &queue.params);

    let max_waiting_jobs = merged.max_waiting_jobs.unwrap_or(DEFAULT_MAX_WAITING_JOBS);
    let max_total_jobs = merged.max_total_jobs.unwrap_or(DEFAULT_MAX_TOTAL_JOBS);
    if max_total_jobs == 0 || max_waiting_jobs == 0 {
        return Err(CatalogError::InvalidQueue {
            queue: id.key(),
            reason: "queue advertises zero capacity".to_string(),
        });
    }

    let mut descriptor = QueueDescriptor {
        id,
        ce_type: ce.ce_type.clone(),
        cpu_time: resolve_cpu_time(&merged, max_queue_length),
        max_ram: merged.max_ram,
        processors: merged.number_of_processors.unwrap_or(1),
        whole_node: merged.whole_node.unwrap_or(false),
        platform: merged.platform.clone(),
        submission_mode: merged
            .submission_mode
            .clone()
            .unwrap_or_else(|| "direct".to_string()),
        tags: union(&ce.params.tags, &queue.params.tags),
        required_tags: union(&ce.params.required_tags, &queue.params.required_tags),
        communities: merged.communities.clone().unwrap_or_default(),
        max_waiting_jobs,
        max_total_jobs,
        waiting_to_running_ratio: merged.waiting_to_running_ratio.unwrap_or(0.0),
        query_ce: merged.query_ce.unwrap_or(false),
        bundle_credential: merged.bundle_credential.unwrap_or(false),
        under_test: merged.under_test.unwrap_or(false),
        param_hash: String::new(),
    };
    descriptor.param_hash = param_hash(&descriptor);
    Ok(descriptor)
}

/// Queue-level values win; unset queue fields inherit the CE's.
fn overlay(ce: &QueueParams, queue: &QueueParams) -> QueueParams {
    QueueParams {
        cpu_time: queue.cpu_time.or(ce.cpu_time),
        max_cpu_time: queue.max_cpu_time.or(ce.max_cpu_time),
        si00: queue.si00.or(ce.si00),
        max_ram: queue.max_ram.or(ce.max_ram),
        number_of_processors: queue.number_of_processors.or(ce.number_of_processors),
        whole_node: queue.whole_node.or(ce.whole_node),
        platform: queue.platform.clone().or_else(|| ce.platform.clone()),
        submission_mode: queue
            .submission_mode
            .clone()
            .or_else(|| ce.submission_mode.clone()),
        query_ce: queue.query_ce.or(ce.query_ce),
        bundle_credential: queue.bundle_credential.or(ce.bundle_credential),
        under_test: queue.under_test.or(ce.under_test),
        // Tag lists are unioned separately, not overlaid.
        tags: None,
        required_tags: None,
        communities: queue.communities.clone().or_else(|| ce.communities.clone()),
        max_waiting_jobs: queue.max_waiting_jobs.or(ce.max_waiting_jobs),
        max_total_jobs: queue.max_total_jobs.or(ce.max_total_jobs),
        waiting_to_running_ratio: queue
            .waiting_to_running_ratio
            .or(ce.waiting_to_running_ratio),
    }
}

/// Sorted set-union of CE-level and queue-level tag lists.
fn union(ce: &Option<Vec<String>>, queue: &Option<Vec<String>>) -> Vec<String> {
    let mut set = BTreeSet::new();
    for list in [ce, queue].into_iter().flatten() {
        set.extend(list.iter().cloned());
    }
    set.into_iter().collect()
}

/// Resolve the CPU-time budget, normalizing the legacy form when needed.
///
/// A `(max_cpu_time, si00)` pair expresses the limit in normalized units;
/// the derived wall-clock value is capped at `max_queue_length`.
fn resolve_cpu_time(params: &QueueParams, max_queue_length: u64) -> u64 {
    if let Some(cpu_time) = params.cpu_time {
        return cpu_time;
    }
    match (params.max_cpu_time, params.si00) {
        (Some(max_cpu_time), Some(si00)) => {
            (max_cpu_time * si00 / SI00_REFERENCE).min(max_queue_length)
        }
        _ => DEFAULT_CPU_TIME,
    }
}

/// Stable content hash over the merged parameter set.
fn param_hash(descriptor: &QueueDescriptor) -> String {
    // Field order is fixed by the struct definition and tag lists are
    // sorted, so the JSON form is canonical.
    let canonical = serde_json::to_vec(descriptor).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    hex::encode(digest)
}
