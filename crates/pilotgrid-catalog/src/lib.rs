//! pilotgrid-catalog — the resource catalog.
//!
//! Resolves the nested site→CE→queue configuration tree into flat
//! `QueueDescriptor` records and keeps a connector cache keyed by each
//! queue's parameter content hash:
//!
//! - **`merge`** — CE→queue parameter overlay, tag set-union, legacy
//!   CPU-time normalization, content hashing
//! - **`factory`** — static registry mapping a CE-type tag to a connector
//!   builder
//! - **`catalog`** — the per-cycle build, connector reuse, and cache reset
//!   for queues that left the configuration
//!
//! A queue that fails to merge or to get a connector is excluded for the
//! cycle and reported alongside the usable entries; it never fails the
//! build.

pub mod catalog;
pub mod error;
pub mod factory;
pub mod merge;

pub use catalog::{Catalog, CatalogBuild, CatalogEntry};
pub use error::{CatalogError, CatalogResult};
pub use factory::{ConnectorBuilder, ConnectorFactory};
pub use merge::merge_queue;
