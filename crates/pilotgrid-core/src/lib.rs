//! pilotgrid-core — shared domain types and collaborator contracts.
//!
//! Everything the PilotGrid subsystems exchange lives here:
//!
//! - Queue identity and capability descriptors (`QueueId`, `QueueDescriptor`)
//! - The pilot status enumeration and opaque pilot references
//! - Demand-matching types (`CapabilityDescriptor`, `DemandGroup`)
//! - Collaborator traits for the remote services the scheduler consumes
//!   (`QueueConnector`, `DemandOracle`, `CredentialProvider`, `AccountingSink`)
//! - The configuration surface: the site→CE→queue tree and agent options
//! - Accounting record shapes
//!
//! The concrete implementations of the collaborator traits (batch-system
//! clients, the demand matcher, the credential service) live outside this
//! workspace; this crate only fixes their contracts.

pub mod accounting;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use accounting::{PilotLifecycleRecord, SubmissionOutcome, SubmissionRecord};
pub use config::{AgentOptions, CeEntry, QueueEntry, QueueParams, SiteEntry, SiteTree};
pub use error::{
    ConfigError, ConfigResult, ConnectorError, ConnectorResult, CredentialError,
    CredentialResult, OracleError, OracleResult,
};
pub use traits::{AccountingSink, CredentialProvider, DemandOracle, QueueConnector};
pub use types::{
    CapabilityDescriptor, Credential, DemandGroup, PilotOutput, PilotRef, PilotStatus,
    QueueDescriptor, QueueId, SiteMask, SiteName, SlotReport, StorageName, SubmissionReceipt,
};
