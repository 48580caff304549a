//! pilotgrid-registry — the pilot-record store contract.
//!
//! The durable registry itself is an external service; this crate fixes the
//! contract the scheduling loop and status tracker program against, the
//! record/filter types, and ships an in-memory implementation used by tests
//! and single-process deployments.
//!
//! The registry is the only structure written from both the scheduling loop
//! and the tracker's workers, so implementations must serialize concurrent
//! writes and give at-least read-committed consistency for the count queries
//! used during sizing.

pub mod error;
pub mod memory;
pub mod types;

pub use error::{RegistryError, RegistryResult};
pub use memory::MemoryRegistry;
pub use types::{PilotFilter, PilotRecord};

use pilotgrid_core::{PilotOutput, PilotRef, PilotStatus};

/// Durable store of pilot records.
pub trait PilotRegistry: Send + Sync {
    /// Register freshly submitted pilots.
    fn add_pilots(&self, records: Vec<PilotRecord>) -> RegistryResult<()>;

    fn get(&self, pilot: &PilotRef) -> RegistryResult<Option<PilotRecord>>;

    fn select(&self, filter: &PilotFilter) -> RegistryResult<Vec<PilotRecord>>;

    fn count(&self, filter: &PilotFilter) -> RegistryResult<u32>;

    /// Record a status transition, stamping `now` as the last update.
    ///
    /// Statuses only move forward: a pilot already in a final state is
    /// left untouched.
    fn set_status(&self, pilot: &PilotRef, status: PilotStatus, now: u64) -> RegistryResult<()>;

    /// Attach retrieved (or sentinel) output to a pilot.
    fn store_output(&self, pilot: &PilotRef, output: PilotOutput) -> RegistryResult<()>;

    /// Flag a pilot as accounted so the lifecycle record is sent only once.
    fn mark_accounted(&self, pilot: &PilotRef) -> RegistryResult<()>;
}
