//! pilotgrid-tracker — concurrent pilot lifecycle tracking.
//!
//! On a slower cadence than the scheduling loop, the tracker polls every
//! queue's connector for the remote status of its live pilots and applies
//! the pilot state machine:
//!
//! - Unchanged remote statuses are no-ops (no registry write)
//! - `Unknown` is tolerated for a grace window before escalating to
//!   `Aborted`, reaping the abandoned remote reference on the way
//! - Entry into a final state triggers output retrieval with a bounded
//!   per-pilot retry budget, then a single lifecycle accounting record
//!
//! Queues are polled by a bounded worker pool — one task per queue, capped —
//! and no worker ever touches another queue's pilots, so the registry is the
//! only shared write path.

pub mod tracker;
pub mod transitions;

pub use tracker::{OUTPUT_UNAVAILABLE, StatusTracker, TrackerOptions, TrackerSummary};
pub use transitions::next_status;
