//! Configuration surface: the site→CE→queue tree and agent options.
//!
//! The site tree mirrors the replicated configuration served to the agent:
//! one record per `sites.<site>.ces.<ce>.queues.<queue>` path, with shared
//! overlay parameters at both the CE and queue level (queue wins on
//! conflict; the catalog performs the merge).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::ConfigResult;

// ── Site tree ──────────────────────────────────────────────────────

/// Root of the site→CE→queue configuration tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteTree {
    #[serde(default)]
    pub sites: HashMap<String, SiteEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteEntry {
    #[serde(default)]
    pub ces: HashMap<String, CeEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CeEntry {
    /// CE backend tag, resolved through the connector factory.
    pub ce_type: String,
    #[serde(flatten)]
    pub params: QueueParams,
    #[serde(default)]
    pub queues: HashMap<String, QueueEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueEntry {
    #[serde(flatten)]
    pub params: QueueParams,
}

/// Overlay parameters shared by the CE and queue levels.
///
/// Every field is optional; the catalog merges CE-level values under
/// queue-level ones and applies defaults for anything still unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueParams {
    pub cpu_time: Option<u64>,
    /// Legacy CPU-time form, normalized together with `si00`.
    pub max_cpu_time: Option<u64>,
    pub si00: Option<u64>,
    pub max_ram: Option<u64>,
    pub number_of_processors: Option<u32>,
    pub whole_node: Option<bool>,
    pub platform: Option<String>,
    pub submission_mode: Option<String>,
    pub query_ce: Option<bool>,
    pub bundle_credential: Option<bool>,
    pub under_test: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub required_tags: Option<Vec<String>>,
    pub communities: Option<Vec<String>>,
    pub max_waiting_jobs: Option<u32>,
    pub max_total_jobs: Option<u32>,
    pub waiting_to_running_ratio: Option<f64>,
}

impl SiteTree {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }
}

// ── Agent options ──────────────────────────────────────────────────

/// Tunables of the scheduling agent. All fields have defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOptions {
    /// Ceiling on pilots submitted to one queue per cycle.
    #[serde(default = "default_max_pilots")]
    pub max_pilots_to_submit: u32,

    /// When false, already-waiting pilots are ignored during sizing.
    #[serde(default = "default_true")]
    pub pilot_waiting_flag: bool,

    /// Let saturated queues keep receiving a trickle of pilots.
    #[serde(default)]
    pub add_pilots_to_empty_sites: bool,

    /// A failed queue is retried only every this many cycles.
    #[serde(default = "default_cycle_factor")]
    pub failed_queue_cycle_factor: u32,

    /// Status-tracker cadence, in scheduler cycles.
    #[serde(default = "default_cycle_factor")]
    pub pilot_status_update_cycle_factor: u32,

    /// Local slot-estimate refresh cadence, in cycles.
    #[serde(default = "default_cycle_factor")]
    pub available_slots_update_cycle_factor: u32,

    /// Cap on the CPU time derived from legacy queue parameters, seconds.
    #[serde(default = "default_max_queue_length")]
    pub max_queue_length: u64,

    /// Output-retrieval attempts per pilot before giving up.
    #[serde(default = "default_output_retries")]
    pub max_retry_get_pilot_output: u32,

    /// Enforce platform compatibility when routing jobs to sites.
    #[serde(default)]
    pub check_platform: bool,

    /// Retrieve pilot output on completion.
    #[serde(default = "default_true")]
    pub get_pilot_output: bool,

    /// Emit per-pilot lifecycle accounting.
    #[serde(default = "default_true")]
    pub send_pilot_accounting: bool,

    /// Emit per-submission accounting.
    #[serde(default = "default_true")]
    pub send_pilot_submission_accounting: bool,

    /// Timeout applied to every remote call, seconds.
    #[serde(default = "default_remote_timeout")]
    pub remote_timeout: u64,

    /// Identity pilots are submitted under.
    #[serde(default = "default_pilot_owner")]
    pub pilot_owner: String,

    /// Group the pilot identity belongs to.
    #[serde(default = "default_pilot_owner_group")]
    pub pilot_owner_group: String,
}

fn default_max_pilots() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

fn default_cycle_factor() -> u32 {
    10
}

fn default_max_queue_length() -> u64 {
    3 * 86_400
}

fn default_output_retries() -> u32 {
    3
}

fn default_remote_timeout() -> u64 {
    120
}

fn default_pilot_owner() -> String {
    "pilot".to_string()
}

fn default_pilot_owner_group() -> String {
    "generic".to_string()
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            max_pilots_to_submit: default_max_pilots(),
            pilot_waiting_flag: true,
            add_pilots_to_empty_sites: false,
            failed_queue_cycle_factor: default_cycle_factor(),
            pilot_status_update_cycle_factor: default_cycle_factor(),
            available_slots_update_cycle_factor: default_cycle_factor(),
            max_queue_length: default_max_queue_length(),
            max_retry_get_pilot_output: default_output_retries(),
            check_platform: false,
            get_pilot_output: true,
            send_pilot_accounting: true,
            send_pilot_submission_accounting: true,
            remote_timeout: default_remote_timeout(),
            pilot_owner: default_pilot_owner(),
            pilot_owner_group: default_pilot_owner_group(),
        }
    }
}

impl AgentOptions {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }
}
