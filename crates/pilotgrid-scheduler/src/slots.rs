//! Per-queue spare-slot estimation.
//!
//! Two modes, selected by the queue's `query_ce` flag: a live capacity
//! query against the CE (refreshed every cycle), or a local estimate
//! derived from registry counts (refreshed every N cycles, decremented
//! locally as submissions happen in between).

use pilotgrid_core::{PilotStatus, QueueDescriptor};
use pilotgrid_registry::{PilotFilter, PilotRegistry, RegistryResult};

/// Mutable per-queue counters that persist across cycles.
///
/// Created on first sight of a queue; dropped when the queue disappears
/// from configuration.
#[derive(Debug, Default)]
pub struct QueueRuntimeState {
    /// Current spare-slot estimate. Never negative; decremented by actual
    /// submissions, recomputed on refresh.
    pub available_slots: u32,
    /// Whether `available_slots` holds a real estimate yet.
    pub has_estimate: bool,
    /// Cycles since the local estimate was last refreshed.
    pub estimate_age: u32,
    /// Consecutive failures; drives the backoff gate.
    pub failures: u32,
    /// Unix timestamp of the last direct capacity query.
    pub last_capacity_query: u64,
}

/// Local spare-slot estimate from registry counts.
///
/// The waiting allowance grows with the running population when the queue
/// configures a waiting-to-running ratio; both terms clamp at zero.
pub fn local_slot_estimate(descriptor: &QueueDescriptor, waiting: u32, running: u32) -> u32 {
    let ratio_allowance = (f64::from(running) * descriptor.waiting_to_running_ratio) as u32;
    let max_waiting = descriptor.max_waiting_jobs.max(ratio_allowance);

    let total = waiting + running;
    let total_room = descriptor.max_total_jobs.saturating_sub(total);
    let waiting_room = max_waiting.saturating_sub(waiting);
    total_room.min(waiting_room)
}

/// Count this queue's waiting and running pilots in the registry.
pub fn registry_counts(
    registry: &dyn PilotRegistry,
    descriptor: &QueueDescriptor,
) -> RegistryResult<(u32, u32)> {
    let waiting = registry.count(
        &PilotFilter::new()
            .queue(&descriptor.id)
            .statuses(PilotStatus::WAITING),
    )?;
    let running = registry.count(
        &PilotFilter::new()
            .queue(&descriptor.id)
            .statuses([PilotStatus::Running]),
    )?;
    Ok((waiting, running))
}
