//! The per-cycle submission decision loop.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use pilotgrid_catalog::CatalogEntry;
use pilotgrid_core::{
    AccountingSink, AgentOptions, CapabilityDescriptor, CredentialProvider, DemandGroup,
    DemandOracle, OracleError, PilotStatus, QueueDescriptor, QueueId, SiteMask,
    SubmissionOutcome, SubmissionRecord,
};
use pilotgrid_registry::{PilotFilter, PilotRecord, PilotRegistry};

use crate::error::{CycleError, QueueError};
use crate::slots::{QueueRuntimeState, local_slot_estimate, registry_counts};

/// Extra credential lifetime requested on top of the queue's CPU budget.
const CREDENTIAL_MARGIN: u64 = 86_400;

/// What one cycle did, in counts. Raw per-queue errors stay in the logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub cycle: u64,
    pub queues_considered: usize,
    pub submitted: u32,
    pub failed_queues: u32,
}

/// The per-cycle submission control loop.
///
/// Owns all mutable scheduling state: the per-queue runtime counters and
/// the random source. One instance is driven from a single task; nothing
/// here is shared with the status tracker except the registry.
pub struct SchedulingLoop {
    opts: AgentOptions,
    oracle: Arc<dyn DemandOracle>,
    registry: Arc<dyn PilotRegistry>,
    credentials: Arc<dyn CredentialProvider>,
    accounting: Arc<dyn AccountingSink>,
    /// Per-queue counters, kept only for queues still in configuration.
    runtime: HashMap<QueueId, QueueRuntimeState>,
    rng: StdRng,
    cycle: u64,
}

impl SchedulingLoop {
    pub fn new(
        opts: AgentOptions,
        oracle: Arc<dyn DemandOracle>,
        registry: Arc<dyn PilotRegistry>,
        credentials: Arc<dyn CredentialProvider>,
        accounting: Arc<dyn AccountingSink>,
    ) -> Self {
        Self {
            opts,
            oracle,
            registry,
            credentials,
            accounting,
            runtime: HashMap::new(),
            rng: StdRng::from_entropy(),
            cycle: 0,
        }
    }

    /// Seed the random source so queue shuffles and demand-group picks are
    /// reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Per-queue runtime counters, for observability and tests.
    pub fn runtime_state(&self, id: &QueueId) -> Option<&QueueRuntimeState> {
        self.runtime.get(id)
    }

    /// Run one scheduling cycle over this cycle's catalog entries.
    ///
    /// Per-queue failures are isolated: they bump the queue's backoff
    /// counter and show up in the summary count, but never abort the cycle.
    pub async fn run_cycle(
        &mut self,
        entries: &[CatalogEntry],
        site_mask: &SiteMask,
        usable_ces: &HashSet<String>,
    ) -> Result<CycleSummary, CycleError> {
        self.cycle += 1;
        let cycle = self.cycle;

        // Forget runtime state for queues that left the configuration.
        let current: HashSet<QueueId> = entries.iter().map(|e| e.descriptor.id.clone()).collect();
        self.runtime.retain(|id, _| current.contains(id));

        // Global gate: one coarse query over the union of all capabilities.
        let coarse = coarse_capability(entries);
        let timeout = Duration::from_secs(self.opts.remote_timeout);
        let groups = match tokio::time::timeout(timeout, self.oracle.matching_demand(&coarse))
            .await
        {
            Ok(result) => result.map_err(CycleError::Demand)?,
            Err(_) => {
                return Err(CycleError::Demand(OracleError::Query(format!(
                    "timed out after {}s",
                    self.opts.remote_timeout
                ))));
            }
        };
        if groups.is_empty() {
            info!(cycle, "no matching demand anywhere, cycle skipped");
            return Ok(CycleSummary {
                cycle,
                queues_considered: entries.len(),
                submitted: 0,
                failed_queues: 0,
            });
        }
        let any_site = groups.iter().all(|g| g.required_sites.is_empty());
        let demand_sites: HashSet<String> = groups
            .iter()
            .flat_map(|g| g.required_sites.iter().cloned())
            .collect();

        // Reshuffled every cycle so late-configured queues are not starved.
        let mut order: Vec<&CatalogEntry> = entries.iter().collect();
        order.shuffle(&mut self.rng);

        let mut submitted = 0u32;
        let mut failed_queues = 0u32;
        for entry in order {
            match self
                .process_queue(entry, site_mask, usable_ces, any_site, &demand_sites)
                .await
            {
                Ok(count) => submitted += count,
                Err(e) => {
                    failed_queues += 1;
                    let state = self.runtime.entry(entry.descriptor.id.clone()).or_default();
                    state.failures += 1;
                    warn!(
                        queue = %entry.descriptor.id,
                        failures = state.failures,
                        error = %e,
                        "queue submission failed"
                    );
                }
            }
        }

        info!(
            cycle,
            queues = entries.len(),
            submitted,
            failed_queues,
            "cycle complete"
        );
        Ok(CycleSummary {
            cycle,
            queues_considered: entries.len(),
            submitted,
            failed_queues,
        })
    }

    /// Gate, size, and submit for a single queue.
    async fn process_queue(
        &mut self,
        entry: &CatalogEntry,
        site_mask: &SiteMask,
        usable_ces: &HashSet<String>,
        any_site: bool,
        demand_sites: &HashSet<String>,
    ) -> Result<u32, QueueError> {
        let descriptor = entry.descriptor.as_ref();
        let id = &descriptor.id;
        let now = epoch_secs();
        let timeout = self.opts.remote_timeout;

        // Backoff gate: a failed queue is retried only every Nth cycle.
        {
            let factor = self.opts.failed_queue_cycle_factor.max(1);
            let state = self.runtime.entry(id.clone()).or_default();
            if state.failures != 0 && state.failures % factor != 0 {
                state.failures += 1;
                debug!(queue = %id, failures = state.failures, "queue cooling down");
                return Ok(0);
            }
        }

        // Usability masks. Queues under test bypass the site mask.
        if !descriptor.under_test && !site_mask.allows(&id.site) {
            debug!(queue = %id, "site not in usable mask");
            return Ok(0);
        }
        if !usable_ces.contains(&id.ce) {
            debug!(queue = %id, "ce not in usable set");
            return Ok(0);
        }

        // Site-restricted demand cannot land on other sites.
        if !any_site && !demand_sites.contains(&id.site) {
            debug!(queue = %id, "no demand restricted to this site");
            return Ok(0);
        }

        // Fine-grained demand sizing scoped to this queue's capabilities.
        let fine = queue_capability(descriptor);
        let groups = bounded(timeout, self.oracle.matching_demand(&fine)).await?;
        let wanted: u32 = groups.iter().map(|g| g.job_count).sum();
        if wanted == 0 {
            debug!(queue = %id, "no demand matches this queue");
            return Ok(0);
        }

        // Pilots already waiting for these demand groups.
        let group_ids: Vec<u64> = groups.iter().map(|g| g.id).collect();
        let waiting = if self.opts.pilot_waiting_flag {
            self.registry.count(
                &PilotFilter::new()
                    .queue(id)
                    .groups(group_ids)
                    .statuses(PilotStatus::WAITING),
            )?
        } else {
            0
        };

        let saturated = waiting >= wanted;
        if saturated && !self.opts.add_pilots_to_empty_sites {
            debug!(queue = %id, waiting, wanted, "enough pilots already waiting");
            return Ok(0);
        }

        let available = self.refresh_slots(entry, now).await?;
        if available == 0 {
            debug!(queue = %id, "no spare slots");
            return Ok(0);
        }

        // Saturated queues allowed through run at a tenth of the ceiling.
        let to_submit = if saturated {
            self.opts.max_pilots_to_submit.div_ceil(10).min(available)
        } else {
            self.opts
                .max_pilots_to_submit
                .min(available)
                .min(wanted - waiting)
        };
        if to_submit == 0 {
            return Ok(0);
        }

        // Credential must outlive the queue's CPU budget.
        let lifetime = descriptor.cpu_time + CREDENTIAL_MARGIN;
        let credential = bounded(
            timeout,
            self.credentials
                .issue(&self.opts.pilot_owner, &self.opts.pilot_owner_group, lifetime),
        )
        .await?;

        let receipt = match bounded(timeout, entry.connector.submit(&credential, to_submit)).await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                if self.opts.send_pilot_submission_accounting {
                    self.accounting.record_submission(submission_record(
                        descriptor,
                        to_submit,
                        0,
                        SubmissionOutcome::Failed,
                        now,
                    ));
                }
                return Err(e);
            }
        };

        // Register the new pilots, attributing each to a demand group with
        // probability proportional to the group's priority.
        let granted = receipt.refs.len() as u32;
        let mut records = Vec::with_capacity(receipt.refs.len());
        for reference in &receipt.refs {
            let group = pick_group(&mut self.rng, &groups);
            let stamp = receipt.stamps.get(reference).cloned().unwrap_or_default();
            records.push(PilotRecord::new(
                reference.clone(),
                stamp,
                id.clone(),
                group.id,
                &self.opts.pilot_owner,
                &self.opts.pilot_owner_group,
                now,
            ));
        }
        self.registry.add_pilots(records)?;

        {
            let state = self.runtime.entry(id.clone()).or_default();
            state.available_slots = state.available_slots.saturating_sub(granted);
            state.failures = 0;
        }

        if self.opts.send_pilot_submission_accounting {
            self.accounting.record_submission(submission_record(
                descriptor,
                to_submit,
                granted,
                SubmissionOutcome::Succeeded,
                now,
            ));
        }

        info!(queue = %id, requested = to_submit, submitted = granted, "pilots submitted");
        Ok(granted)
    }

    /// Obtain the spare-slot estimate for a queue.
    ///
    /// Direct mode queries the CE every cycle; local mode recomputes from
    /// registry counts only every Nth cycle and reuses the (locally
    /// decremented) estimate in between.
    async fn refresh_slots(&mut self, entry: &CatalogEntry, now: u64) -> Result<u32, QueueError> {
        let descriptor = entry.descriptor.as_ref();
        let id = &descriptor.id;

        if descriptor.query_ce {
            let known: Vec<_> = self
                .registry
                .select(&PilotFilter::new().queue(id).statuses(PilotStatus::LIVE))?
                .into_iter()
                .map(|r| r.reference)
                .collect();
            let report =
                bounded(self.opts.remote_timeout, entry.connector.available(&known)).await?;
            // The most failure-prone call of the cycle, so it logs loudly.
            info!(queue = %id, slots = report.slots, detail = %report.info, "live capacity query");
            let state = self.runtime.entry(id.clone()).or_default();
            state.available_slots = report.slots;
            state.has_estimate = true;
            state.last_capacity_query = now;
            return Ok(report.slots);
        }

        let refresh_every = self.opts.available_slots_update_cycle_factor.max(1);
        let needs_refresh = {
            let state = self.runtime.entry(id.clone()).or_default();
            !state.has_estimate || state.estimate_age >= refresh_every
        };

        if needs_refresh {
            let (waiting, running) = registry_counts(self.registry.as_ref(), descriptor)?;
            let estimate = local_slot_estimate(descriptor, waiting, running);
            let state = self.runtime.entry(id.clone()).or_default();
            state.available_slots = estimate;
            state.has_estimate = true;
            state.estimate_age = 0;
            debug!(queue = %id, waiting, running, slots = estimate, "slot estimate refreshed");
            Ok(estimate)
        } else {
            let state = self.runtime.entry(id.clone()).or_default();
            state.estimate_age += 1;
            Ok(state.available_slots)
        }
    }
}

/// Run a remote call under the configured timeout.
async fn bounded<T, E>(
    timeout_secs: u64,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, QueueError>
where
    QueueError: From<E>,
{
    match tokio::time::timeout(Duration::from_secs(timeout_secs), fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(QueueError::from(e)),
        Err(_) => Err(QueueError::Timeout(timeout_secs)),
    }
}

/// Union of every queue's capabilities, with no site restriction.
fn coarse_capability(entries: &[CatalogEntry]) -> CapabilityDescriptor {
    let mut tags = BTreeSet::new();
    let mut platforms = BTreeSet::new();
    let mut communities = BTreeSet::new();
    for entry in entries {
        let d = entry.descriptor.as_ref();
        tags.extend(d.tags.iter().cloned());
        tags.extend(d.required_tags.iter().cloned());
        platforms.extend(d.platform.iter().cloned());
        communities.extend(d.communities.iter().cloned());
    }
    CapabilityDescriptor {
        sites: Vec::new(),
        platforms: platforms.into_iter().collect(),
        tags: tags.into_iter().collect(),
        communities: communities.into_iter().collect(),
        cpu_time: None,
        processors: None,
    }
}

/// Capability descriptor scoped to one queue.
fn queue_capability(descriptor: &QueueDescriptor) -> CapabilityDescriptor {
    let mut tags = descriptor.tags.clone();
    tags.extend(descriptor.required_tags.iter().cloned());
    CapabilityDescriptor {
        sites: vec![descriptor.id.site.clone()],
        platforms: descriptor.platform.iter().cloned().collect(),
        tags,
        communities: descriptor.communities.clone(),
        cpu_time: Some(descriptor.cpu_time),
        processors: Some(descriptor.processors),
    }
}

/// Weighted pick proportional to group priority; degenerate weights fall
/// back to a uniform pick.
fn pick_group<'a>(rng: &mut StdRng, groups: &'a [DemandGroup]) -> &'a DemandGroup {
    match groups.choose_weighted(rng, |g| g.priority.max(0.0)) {
        Ok(group) => group,
        Err(_) => groups.choose(rng).unwrap_or(&groups[0]),
    }
}

fn submission_record(
    descriptor: &QueueDescriptor,
    total_submitted: u32,
    total_succeeded: u32,
    outcome: SubmissionOutcome,
    timestamp: u64,
) -> SubmissionRecord {
    SubmissionRecord {
        site: descriptor.id.site.clone(),
        ce: descriptor.id.ce.clone(),
        queue: descriptor.id.queue.clone(),
        total_submitted,
        total_succeeded,
        outcome,
        timestamp,
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
