//! pilotgrid-scheduler — the per-cycle submission control loop.
//!
//! Once per control-loop tick, `SchedulingLoop::run_cycle` takes the
//! catalog entries for this cycle and decides, queue by queue, whether and
//! how many pilots to submit:
//!
//! - Global gate: skip the cycle outright when no demand matches at all
//! - Per-queue gates: failure backoff, site/CE usability masks, per-site
//!   demand presence
//! - Sizing: fine-grained demand minus already-waiting pilots, bounded by
//!   the spare-slot estimate and the per-cycle submission ceiling
//! - Submission: credential issuance, connector submit, registry
//!   registration with fair-share demand-group attribution, accounting
//!
//! The loop is single-threaded: no two queues are submitted to concurrently
//! within one cycle, so the slot-decrement bookkeeping needs no locking.
//! Queue order is reshuffled every cycle so queues late in the
//! configuration are not systematically starved.

pub mod cycle;
pub mod error;
pub mod slots;

pub use cycle::{CycleSummary, SchedulingLoop};
pub use error::{CycleError, QueueError};
pub use slots::{QueueRuntimeState, local_slot_estimate};
