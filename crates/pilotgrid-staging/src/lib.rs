//! pilotgrid-staging — the per-job staging decision engine.
//!
//! For a job whose input data may not be staged to disk yet, the engine
//! decides one of four outcomes:
//!
//! - **Direct** — the filtered site set can run the job now (no input
//!   data, bulk production work, or disk-complete replica coverage)
//! - **AwaitingStage** — a staging request was submitted for the chosen
//!   site and the job parks until it completes
//! - **Hold** — a temporary obstacle (inactive candidates, staging service
//!   down); the caller retries after a delay
//! - **Failed** — a permanent obstacle (missing replicas, disallowed
//!   sites, no viable site), with a descriptive reason
//!
//! Site selection among equally good staging candidates is randomized from
//! a seedable source, so decisions are reproducible in tests.

pub mod engine;
pub mod plan;
pub mod traits;

pub use engine::{StagingEngine, StagingOptions};
pub use plan::{
    HoldReason, JobDescriptor, JobKind, ReplicaFlags, ReplicaTable, RoutingOutcome, SiteInfo,
    StagingPlan,
};
pub use traits::{JobStateSink, StagingService};
