//! The concurrent status tracker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use pilotgrid_catalog::CatalogEntry;
use pilotgrid_core::{
    AccountingSink, AgentOptions, Credential, CredentialProvider, CredentialResult,
    PilotLifecycleRecord, PilotOutput, PilotRef, PilotStatus,
};
use pilotgrid_registry::{PilotFilter, PilotRecord, PilotRegistry};

use crate::transitions::next_status;

/// Sentinel stored once the output-retrieval retry budget is exhausted.
pub const OUTPUT_UNAVAILABLE: &str = "output no longer available";

/// Tracker tunables.
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    /// Seconds of repeated `Unknown` tolerated before aborting a pilot.
    pub grace_window: u64,
    /// Output-retrieval attempts per pilot before storing the sentinel.
    pub max_output_retries: u32,
    pub get_output: bool,
    pub send_accounting: bool,
    /// Cap on concurrently polled queues.
    pub max_workers: usize,
    /// Timeout applied to every remote call, seconds.
    pub remote_timeout: u64,
    /// Lifetime requested when the polling credential is renewed.
    pub credential_lifetime: u64,
    /// Renew the polling credential when less than this remains.
    pub credential_renew_threshold: u64,
    pub owner: String,
    pub owner_group: String,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            grace_window: 3600,
            max_output_retries: 3,
            get_output: true,
            send_accounting: true,
            max_workers: 16,
            remote_timeout: 120,
            credential_lifetime: 86_400,
            credential_renew_threshold: 3600,
            owner: "pilot".to_string(),
            owner_group: "generic".to_string(),
        }
    }
}

impl TrackerOptions {
    /// Derive tracker options from the agent-level configuration.
    pub fn from_agent(opts: &AgentOptions) -> Self {
        Self {
            max_output_retries: opts.max_retry_get_pilot_output,
            get_output: opts.get_pilot_output,
            send_accounting: opts.send_pilot_accounting,
            remote_timeout: opts.remote_timeout,
            owner: opts.pilot_owner.clone(),
            owner_group: opts.pilot_owner_group.clone(),
            ..Self::default()
        }
    }
}

/// What one polling pass did, in counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerSummary {
    pub queues_polled: usize,
    pub pilots_polled: usize,
    pub transitions: u32,
    pub finalized: u32,
}

#[derive(Default)]
struct QueuePoll {
    pilots: usize,
    transitions: u32,
    finalized: u32,
}

/// Polls queue connectors for pilot status and applies the state machine.
///
/// One worker task per queue, capped by a semaphore sized at startup.
/// Workers never touch another queue's pilots; the registry serializes the
/// writes that do overlap with the scheduling loop.
pub struct StatusTracker {
    opts: TrackerOptions,
    registry: Arc<dyn PilotRegistry>,
    credentials: Arc<dyn CredentialProvider>,
    accounting: Arc<dyn AccountingSink>,
    /// Per-pilot output retrieval attempts. Entries are cleared once output
    /// handling concludes, successfully or with the sentinel.
    output_retries: Mutex<HashMap<PilotRef, u32>>,
    /// Shared polling credential, renewed only when its remaining lifetime
    /// drops below the threshold.
    credential: Mutex<Option<Credential>>,
    limiter: Arc<Semaphore>,
}

impl StatusTracker {
    pub fn new(
        opts: TrackerOptions,
        registry: Arc<dyn PilotRegistry>,
        credentials: Arc<dyn CredentialProvider>,
        accounting: Arc<dyn AccountingSink>,
    ) -> Self {
        let workers = opts.max_workers.max(1);
        Self {
            opts,
            registry,
            credentials,
            accounting,
            output_retries: Mutex::new(HashMap::new()),
            credential: Mutex::new(None),
            limiter: Arc::new(Semaphore::new(workers)),
        }
    }

    /// Run one polling pass over the given queues.
    ///
    /// Failures are isolated per queue: a connector that refuses its status
    /// query costs that queue one pass, nothing more.
    pub async fn refresh(self: &Arc<Self>, entries: &[CatalogEntry]) -> TrackerSummary {
        // Connector sessions run under this credential; make sure it
        // outlives the pass before fanning out.
        if let Err(e) = self.ensure_credential().await {
            warn!(error = %e, "no polling credential, pass skipped");
            return TrackerSummary::default();
        }

        let mut tasks = JoinSet::new();
        for entry in entries {
            let tracker = self.clone();
            let entry = entry.clone();
            tasks.spawn(async move {
                let Ok(_permit) = tracker.limiter.acquire().await else {
                    return QueuePoll::default();
                };
                tracker.poll_queue(&entry).await
            });
        }

        let mut summary = TrackerSummary {
            queues_polled: entries.len(),
            ..Default::default()
        };
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(poll) => {
                    summary.pilots_polled += poll.pilots;
                    summary.transitions += poll.transitions;
                    summary.finalized += poll.finalized;
                }
                Err(e) => warn!(error = %e, "queue poll task failed"),
            }
        }

        info!(
            queues = summary.queues_polled,
            pilots = summary.pilots_polled,
            transitions = summary.transitions,
            finalized = summary.finalized,
            "status pass complete"
        );
        summary
    }

    /// Poll one queue: apply remote statuses to its live pilots and finish
    /// output/accounting for pilots finalized earlier.
    async fn poll_queue(&self, entry: &CatalogEntry) -> QueuePoll {
        let id = &entry.descriptor.id;
        let mut poll = QueuePoll::default();

        let live = match self.registry.select(
            &PilotFilter::new().queue(id).statuses(PilotStatus::LIVE),
        ) {
            Ok(records) => records,
            Err(e) => {
                warn!(queue = %id, error = %e, "registry select failed");
                return poll;
            }
        };

        // Finalized pilots whose output or accounting is still pending,
        // snapshotted before this pass's transitions to keep handling
        // at-most-once per pass.
        let pending = match self.registry.select(
            &PilotFilter::new()
                .queue(id)
                .statuses([PilotStatus::Done, PilotStatus::Failed, PilotStatus::Aborted]),
        ) {
            Ok(records) => records
                .into_iter()
                .filter(|r| {
                    (self.opts.get_output && r.output.is_none())
                        || (self.opts.send_accounting && !r.accounted)
                })
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!(queue = %id, error = %e, "registry select failed");
                Vec::new()
            }
        };

        if !live.is_empty() {
            poll.pilots = live.len();
            self.apply_remote_statuses(entry, &live, &mut poll).await;
        }

        let now = epoch_secs();
        for record in &pending {
            self.finalize_pilot(entry, record, record.status, now).await;
        }

        poll
    }

    async fn apply_remote_statuses(
        &self,
        entry: &CatalogEntry,
        live: &[PilotRecord],
        poll: &mut QueuePoll,
    ) {
        let id = &entry.descriptor.id;
        let refs: Vec<PilotRef> = live.iter().map(|r| r.reference.clone()).collect();

        let timeout = Duration::from_secs(self.opts.remote_timeout);
        let remote = match tokio::time::timeout(timeout, entry.connector.status(&refs)).await {
            Ok(Ok(statuses)) => statuses,
            Ok(Err(e)) => {
                warn!(queue = %id, error = %e, "status query failed");
                return;
            }
            Err(_) => {
                warn!(queue = %id, timeout = self.opts.remote_timeout, "status query timed out");
                return;
            }
        };

        let now = epoch_secs();
        for record in live {
            // A reference the endpoint no longer reports is Unknown, which
            // feeds the grace window rather than aborting immediately.
            let observed = remote
                .get(&record.reference)
                .copied()
                .unwrap_or(PilotStatus::Unknown);
            let age = now.saturating_sub(record.last_update);

            let Some(new_status) =
                next_status(record.status, observed, age, self.opts.grace_window)
            else {
                continue;
            };

            if let Err(e) = self.registry.set_status(&record.reference, new_status, now) {
                warn!(pilot = %record.reference, error = %e, "status update failed");
                continue;
            }
            poll.transitions += 1;
            debug!(
                pilot = %record.reference,
                from = %record.status,
                to = %new_status,
                "pilot status changed"
            );

            // A pilot silent past the grace window is abandoned; reap the
            // remote reference so the endpoint does not accumulate ghosts.
            if new_status == PilotStatus::Aborted && record.status == PilotStatus::Unknown {
                if let Err(e) = entry
                    .connector
                    .kill(std::slice::from_ref(&record.reference))
                    .await
                {
                    debug!(pilot = %record.reference, error = %e, "kill of abandoned pilot failed");
                }
            }

            if new_status.is_final() {
                poll.finalized += 1;
                self.finalize_pilot(entry, record, new_status, now).await;
            }
        }
    }

    /// Output retrieval and lifecycle accounting for a finalized pilot.
    ///
    /// Accounting fires at most once, and only after output handling has
    /// concluded: retrieved, recorded as unavailable, or disabled.
    async fn finalize_pilot(
        &self,
        entry: &CatalogEntry,
        record: &PilotRecord,
        final_status: PilotStatus,
        now: u64,
    ) {
        let output_done = if !self.opts.get_output || record.output.is_some() {
            true
        } else {
            self.retrieve_output(entry, &record.reference).await
        };

        if output_done && !record.accounted && self.opts.send_accounting {
            self.accounting.record_pilot(PilotLifecycleRecord {
                owner: record.owner.clone(),
                group: record.owner_group.clone(),
                site: record.queue.site.clone(),
                ce: record.queue.ce.clone(),
                middleware: entry.descriptor.ce_type.clone(),
                final_status,
                jobs_handled: record.jobs_handled,
                submitted_at: record.submitted_at,
                finished_at: now,
            });
            if let Err(e) = self.registry.mark_accounted(&record.reference) {
                warn!(pilot = %record.reference, error = %e, "accounting flag update failed");
            }
        }
    }

    /// Try to fetch a pilot's output. Returns true once output handling is
    /// concluded, either with real output or with the sentinel.
    async fn retrieve_output(&self, entry: &CatalogEntry, reference: &PilotRef) -> bool {
        let attempts = {
            let retries = self.output_retries.lock().await;
            retries.get(reference).copied().unwrap_or(0)
        };

        if attempts >= self.opts.max_output_retries {
            warn!(pilot = %reference, attempts, "giving up on pilot output");
            let sentinel = PilotOutput {
                stdout: OUTPUT_UNAVAILABLE.to_string(),
                stderr: String::new(),
            };
            match self.registry.store_output(reference, sentinel) {
                Ok(()) => {
                    self.output_retries.lock().await.remove(reference);
                    true
                }
                Err(e) => {
                    warn!(pilot = %reference, error = %e, "sentinel store failed");
                    false
                }
            }
        } else {
            let timeout = Duration::from_secs(self.opts.remote_timeout);
            let fetched = match tokio::time::timeout(timeout, entry.connector.output(reference))
                .await
            {
                Ok(Ok(output)) => Some(output),
                Ok(Err(e)) => {
                    warn!(pilot = %reference, attempt = attempts + 1, error = %e, "output retrieval failed");
                    None
                }
                Err(_) => {
                    warn!(pilot = %reference, attempt = attempts + 1, "output retrieval timed out");
                    None
                }
            };

            match fetched {
                Some(output) => match self.registry.store_output(reference, output) {
                    Ok(()) => {
                        self.output_retries.lock().await.remove(reference);
                        debug!(pilot = %reference, "pilot output stored");
                        true
                    }
                    Err(e) => {
                        warn!(pilot = %reference, error = %e, "output store failed");
                        false
                    }
                },
                None => {
                    self.output_retries
                        .lock()
                        .await
                        .insert(reference.clone(), attempts + 1);
                    false
                }
            }
        }
    }

    /// Make sure the shared polling credential outlives this pass.
    async fn ensure_credential(&self) -> CredentialResult<Credential> {
        let now = epoch_secs();
        let mut slot = self.credential.lock().await;
        if let Some(credential) = slot.as_ref()
            && credential.remaining(now) >= self.opts.credential_renew_threshold
        {
            return Ok(credential.clone());
        }

        let fresh = self
            .credentials
            .issue(
                &self.opts.owner,
                &self.opts.owner_group,
                self.opts.credential_lifetime,
            )
            .await?;
        debug!(subject = %fresh.subject, expires_at = fresh.expires_at, "polling credential renewed");
        *slot = Some(fresh.clone());
        Ok(fresh)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilotgrid_core::{QueueDescriptor, QueueId};
    use pilotgrid_registry::MemoryRegistry;
    use pilotgrid_testkit::{FakeConnector, RecordingAccounting, StaticCredentials};

    struct Harness {
        registry: Arc<MemoryRegistry>,
        credentials: Arc<StaticCredentials>,
        accounting: Arc<RecordingAccounting>,
    }

    impl Harness {
        fn new() -> Self {
            let credentials = Arc::new(StaticCredentials::new());
            // Issue against the real clock so renewal thresholds behave.
            credentials.set_now(epoch_secs());
            Self {
                registry: Arc::new(MemoryRegistry::new()),
                credentials,
                accounting: Arc::new(RecordingAccounting::new()),
            }
        }

        fn tracker(&self, opts: TrackerOptions) -> Arc<StatusTracker> {
            Arc::new(StatusTracker::new(
                opts,
                self.registry.clone(),
                self.credentials.clone(),
                self.accounting.clone(),
            ))
        }
    }

    fn queue_id() -> QueueId {
        QueueId::new("SITE_A", "ce01", "long")
    }

    fn entry(connector: Arc<FakeConnector>) -> CatalogEntry {
        CatalogEntry {
            descriptor: Arc::new(QueueDescriptor {
                id: queue_id(),
                ce_type: "arc".to_string(),
                cpu_time: 86_400,
                max_ram: None,
                processors: 1,
                whole_node: false,
                platform: None,
                submission_mode: "direct".to_string(),
                tags: Vec::new(),
                required_tags: Vec::new(),
                communities: Vec::new(),
                max_waiting_jobs: 10,
                max_total_jobs: 25,
                waiting_to_running_ratio: 0.0,
                query_ce: false,
                bundle_credential: false,
                under_test: false,
                param_hash: "h".to_string(),
            }),
            connector,
        }
    }

    fn seed_pilot(
        registry: &MemoryRegistry,
        reference: &str,
        status: PilotStatus,
        last_update: u64,
    ) -> PilotRef {
        let reference = PilotRef::new(reference);
        let mut record = PilotRecord::new(
            reference.clone(),
            "stamp".to_string(),
            queue_id(),
            1,
            "pilot",
            "generic",
            last_update,
        );
        record.status = status;
        record.last_update = last_update;
        registry.add_pilots(vec![record]).unwrap();
        reference
    }

    #[tokio::test]
    async fn remote_change_is_applied() {
        let harness = Harness::new();
        let connector = Arc::new(FakeConnector::new());
        let pilot = seed_pilot(&harness.registry, "p1", PilotStatus::Waiting, epoch_secs());
        connector.set_remote_status(&pilot, PilotStatus::Running);

        let tracker = harness.tracker(TrackerOptions::default());
        let summary = tracker.refresh(&[entry(connector)]).await;

        assert_eq!(summary.transitions, 1);
        let record = harness.registry.get(&pilot).unwrap().unwrap();
        assert_eq!(record.status, PilotStatus::Running);
    }

    #[tokio::test]
    async fn unchanged_status_writes_nothing() {
        let harness = Harness::new();
        let connector = Arc::new(FakeConnector::new());
        let pilot = seed_pilot(&harness.registry, "p1", PilotStatus::Waiting, epoch_secs());
        connector.set_remote_status(&pilot, PilotStatus::Running);

        let tracker = harness.tracker(TrackerOptions::default());
        let entries = [entry(connector)];
        tracker.refresh(&entries).await;
        let writes_after_first = harness.registry.write_count();

        // Second pass sees the same remote status: idempotent, no write.
        let summary = tracker.refresh(&entries).await;
        assert_eq!(summary.transitions, 0);
        assert_eq!(harness.registry.write_count(), writes_after_first);
    }

    #[tokio::test]
    async fn missing_reference_counts_as_unknown() {
        let harness = Harness::new();
        // Nothing scripted on the connector: the pilot is simply gone.
        let connector = Arc::new(FakeConnector::new());
        let pilot = seed_pilot(&harness.registry, "p1", PilotStatus::Running, epoch_secs());

        let tracker = harness.tracker(TrackerOptions::default());
        tracker.refresh(&[entry(connector)]).await;

        let record = harness.registry.get(&pilot).unwrap().unwrap();
        assert_eq!(record.status, PilotStatus::Unknown);
    }

    #[tokio::test]
    async fn unknown_within_grace_stays_unknown() {
        let harness = Harness::new();
        let connector = Arc::new(FakeConnector::new());
        // Entered Unknown 30 minutes ago; still silent.
        let pilot = seed_pilot(
            &harness.registry,
            "p1",
            PilotStatus::Unknown,
            epoch_secs() - 1800,
        );
        connector.set_remote_status(&pilot, PilotStatus::Unknown);

        let tracker = harness.tracker(TrackerOptions::default());
        let summary = tracker.refresh(&[entry(connector.clone())]).await;

        assert_eq!(summary.transitions, 0);
        let record = harness.registry.get(&pilot).unwrap().unwrap();
        assert_eq!(record.status, PilotStatus::Unknown);
        assert!(connector.killed().is_empty());
    }

    #[tokio::test]
    async fn unknown_past_grace_aborts_and_reaps() {
        let harness = Harness::new();
        let connector = Arc::new(FakeConnector::new());
        // Entered Unknown 90 minutes ago.
        let pilot = seed_pilot(
            &harness.registry,
            "p1",
            PilotStatus::Unknown,
            epoch_secs() - 5400,
        );
        connector.set_remote_status(&pilot, PilotStatus::Unknown);

        let opts = TrackerOptions {
            get_output: false,
            ..Default::default()
        };
        let tracker = harness.tracker(opts);
        let summary = tracker.refresh(&[entry(connector.clone())]).await;

        assert_eq!(summary.finalized, 1);
        let record = harness.registry.get(&pilot).unwrap().unwrap();
        assert_eq!(record.status, PilotStatus::Aborted);
        assert_eq!(connector.killed(), vec![pilot]);

        // Lifecycle accounting went out once output handling was moot.
        let pilots = harness.accounting.pilots();
        assert_eq!(pilots.len(), 1);
        assert_eq!(pilots[0].final_status, PilotStatus::Aborted);
    }

    #[tokio::test]
    async fn completion_retrieves_output_and_accounts_once() {
        let harness = Harness::new();
        let connector = Arc::new(FakeConnector::new());
        let pilot = seed_pilot(&harness.registry, "p1", PilotStatus::Running, epoch_secs());
        connector.set_remote_status(&pilot, PilotStatus::Done);
        connector.set_output(&pilot, "all good", "");

        let tracker = harness.tracker(TrackerOptions::default());
        let entries = [entry(connector)];
        tracker.refresh(&entries).await;

        let record = harness.registry.get(&pilot).unwrap().unwrap();
        assert_eq!(record.status, PilotStatus::Done);
        assert_eq!(record.output.as_ref().unwrap().stdout, "all good");
        assert!(record.accounted);

        let pilots = harness.accounting.pilots();
        assert_eq!(pilots.len(), 1);
        assert_eq!(pilots[0].final_status, PilotStatus::Done);
        assert_eq!(pilots[0].site, "SITE_A");
        assert_eq!(pilots[0].middleware, "arc");

        // Another pass finds nothing left to do for this pilot.
        tracker.refresh(&entries).await;
        assert_eq!(harness.accounting.pilots().len(), 1);
    }

    #[tokio::test]
    async fn output_failures_exhaust_into_sentinel() {
        let harness = Harness::new();
        let connector = Arc::new(FakeConnector::new());
        let pilot = seed_pilot(&harness.registry, "p1", PilotStatus::Running, epoch_secs());
        connector.set_remote_status(&pilot, PilotStatus::Done);
        connector.fail_output(true);

        let tracker = harness.tracker(TrackerOptions::default());
        let entries = [entry(connector)];

        // Three failing attempts: output still pending, nothing accounted.
        for expected_attempts in 1..=3u32 {
            tracker.refresh(&entries).await;
            let retries = tracker.output_retries.lock().await;
            assert_eq!(retries.get(&pilot).copied(), Some(expected_attempts));
            drop(retries);
            let record = harness.registry.get(&pilot).unwrap().unwrap();
            assert!(record.output.is_none());
            assert!(!record.accounted);
        }

        // Fourth pass: budget exhausted, the sentinel is stored, the retry
        // entry is cleared, and accounting finally fires.
        tracker.refresh(&entries).await;
        let record = harness.registry.get(&pilot).unwrap().unwrap();
        assert_eq!(record.output.as_ref().unwrap().stdout, OUTPUT_UNAVAILABLE);
        assert!(record.accounted);
        assert!(tracker.output_retries.lock().await.is_empty());
        assert_eq!(harness.accounting.pilots().len(), 1);
    }

    #[tokio::test]
    async fn credential_is_reused_across_passes() {
        let harness = Harness::new();
        let connector = Arc::new(FakeConnector::new());
        seed_pilot(&harness.registry, "p1", PilotStatus::Running, epoch_secs());
        connector.set_remote_status(&PilotRef::new("p1"), PilotStatus::Running);

        let tracker = harness.tracker(TrackerOptions::default());
        let entries = [entry(connector)];
        tracker.refresh(&entries).await;
        tracker.refresh(&entries).await;
        tracker.refresh(&entries).await;

        // Lifetime (1d) far exceeds the renewal threshold (1h): one issue.
        assert_eq!(harness.credentials.issued(), 1);
    }

    #[tokio::test]
    async fn short_lived_credential_is_renewed() {
        let harness = Harness::new();
        let connector = Arc::new(FakeConnector::new());

        let opts = TrackerOptions {
            credential_lifetime: 60,
            credential_renew_threshold: 3600,
            ..Default::default()
        };
        let tracker = harness.tracker(opts);
        let entries = [entry(connector)];
        tracker.refresh(&entries).await;
        tracker.refresh(&entries).await;

        assert_eq!(harness.credentials.issued(), 2);
    }

    #[tokio::test]
    async fn status_query_failure_isolated_per_queue() {
        let harness = Harness::new();
        let broken = Arc::new(FakeConnector::new());
        broken.fail_status(true);
        let broken_pilot =
            seed_pilot(&harness.registry, "p1", PilotStatus::Running, epoch_secs());

        let healthy = Arc::new(FakeConnector::new());
        let healthy_pilot = PilotRef::new("p2");
        let mut record = PilotRecord::new(
            healthy_pilot.clone(),
            "stamp".to_string(),
            QueueId::new("SITE_B", "ce02", "short"),
            1,
            "pilot",
            "generic",
            epoch_secs(),
        );
        record.status = PilotStatus::Waiting;
        harness.registry.add_pilots(vec![record]).unwrap();
        healthy.set_remote_status(&healthy_pilot, PilotStatus::Running);

        let healthy_entry = CatalogEntry {
            descriptor: Arc::new(QueueDescriptor {
                id: QueueId::new("SITE_B", "ce02", "short"),
                ..entry(healthy.clone()).descriptor.as_ref().clone()
            }),
            connector: healthy,
        };

        let tracker = harness.tracker(TrackerOptions::default());
        let summary = tracker
            .refresh(&[entry(broken), healthy_entry])
            .await;

        assert_eq!(summary.transitions, 1);
        let unchanged = harness.registry.get(&broken_pilot).unwrap().unwrap();
        assert_eq!(unchanged.status, PilotStatus::Running);
        let moved = harness.registry.get(&healthy_pilot).unwrap().unwrap();
        assert_eq!(moved.status, PilotStatus::Running);
    }
}
