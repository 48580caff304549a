//! pilotgrid-testkit — scriptable doubles for the collaborator contracts.
//!
//! Several crates exercise the scheduling loop, tracker, and catalog
//! against the same collaborator seams; the doubles live here once instead
//! of being copied into every test module:
//!
//! - [`FakeConnector`] — scriptable queue connector (slot reports, remote
//!   statuses, outputs, failure injection)
//! - [`StaticOracle`] — demand oracle answering from a fixed group list
//! - [`StaticCredentials`] — credential provider with an issuance counter
//! - [`RecordingAccounting`] — accounting sink that captures records
//!
//! Dev-dependency only; nothing here is production code.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use pilotgrid_core::{
    AccountingSink, CapabilityDescriptor, ConnectorError, ConnectorResult, Credential,
    CredentialProvider, CredentialResult, DemandGroup, DemandOracle, OracleResult,
    PilotLifecycleRecord, PilotOutput, PilotRef, PilotStatus, QueueConnector, SlotReport,
    SubmissionReceipt, SubmissionRecord,
};

// ── FakeConnector ──────────────────────────────────────────────────

#[derive(Default)]
struct ConnectorScript {
    slots: u32,
    fail_available: bool,
    fail_submit: bool,
    fail_status: bool,
    fail_output: bool,
    statuses: HashMap<PilotRef, PilotStatus>,
    outputs: HashMap<PilotRef, PilotOutput>,
    submitted_batches: Vec<u32>,
    killed: Vec<PilotRef>,
    next_ref: u32,
}

/// Scriptable queue connector.
///
/// Submissions mint references `fake-1`, `fake-2`, … with matching stamps;
/// remote statuses and outputs are whatever the test scripted.
#[derive(Default)]
pub struct FakeConnector {
    script: Mutex<ConnectorScript>,
    available_queries: AtomicU32,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slots(self, slots: u32) -> Self {
        self.set_slots(slots);
        self
    }

    pub fn set_slots(&self, slots: u32) {
        self.lock().slots = slots;
    }

    pub fn fail_available(&self, fail: bool) {
        self.lock().fail_available = fail;
    }

    pub fn fail_submit(&self, fail: bool) {
        self.lock().fail_submit = fail;
    }

    pub fn fail_status(&self, fail: bool) {
        self.lock().fail_status = fail;
    }

    pub fn fail_output(&self, fail: bool) {
        self.lock().fail_output = fail;
    }

    /// Script the remote status reported for a pilot reference.
    pub fn set_remote_status(&self, pilot: &PilotRef, status: PilotStatus) {
        self.lock().statuses.insert(pilot.clone(), status);
    }

    /// Drop a pilot from the remote view entirely (reported as missing).
    pub fn forget_pilot(&self, pilot: &PilotRef) {
        self.lock().statuses.remove(pilot);
    }

    pub fn set_output(&self, pilot: &PilotRef, stdout: &str, stderr: &str) {
        self.lock().outputs.insert(
            pilot.clone(),
            PilotOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        );
    }

    /// Sizes of the submission batches accepted so far.
    pub fn submitted_batches(&self) -> Vec<u32> {
        self.lock().submitted_batches.clone()
    }

    pub fn total_submitted(&self) -> u32 {
        self.lock().submitted_batches.iter().sum()
    }

    pub fn killed(&self) -> Vec<PilotRef> {
        self.lock().killed.clone()
    }

    /// Number of capacity queries served.
    pub fn available_queries(&self) -> u32 {
        self.available_queries.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConnectorScript> {
        self.script.lock().expect("connector script lock")
    }
}

#[async_trait]
impl QueueConnector for FakeConnector {
    async fn available(&self, _known: &[PilotRef]) -> ConnectorResult<SlotReport> {
        self.available_queries.fetch_add(1, Ordering::Relaxed);
        let script = self.lock();
        if script.fail_available {
            return Err(ConnectorError::Remote("capacity query refused".to_string()));
        }
        Ok(SlotReport {
            slots: script.slots,
            info: format!("{} free slots", script.slots),
        })
    }

    async fn submit(
        &self,
        _credential: &Credential,
        count: u32,
    ) -> ConnectorResult<SubmissionReceipt> {
        let mut script = self.lock();
        if script.fail_submit {
            return Err(ConnectorError::Remote("submission refused".to_string()));
        }
        let mut receipt = SubmissionReceipt::default();
        for _ in 0..count {
            script.next_ref += 1;
            let reference = PilotRef::new(format!("fake-{}", script.next_ref));
            receipt
                .stamps
                .insert(reference.clone(), format!("stamp-{}", script.next_ref));
            script.statuses.insert(reference.clone(), PilotStatus::Submitted);
            receipt.refs.push(reference);
        }
        script.submitted_batches.push(count);
        Ok(receipt)
    }

    async fn status(
        &self,
        refs: &[PilotRef],
    ) -> ConnectorResult<HashMap<PilotRef, PilotStatus>> {
        let script = self.lock();
        if script.fail_status {
            return Err(ConnectorError::Remote("status query refused".to_string()));
        }
        Ok(refs
            .iter()
            .filter_map(|r| script.statuses.get(r).map(|s| (r.clone(), *s)))
            .collect())
    }

    async fn output(&self, pilot: &PilotRef) -> ConnectorResult<PilotOutput> {
        let script = self.lock();
        if script.fail_output {
            return Err(ConnectorError::Remote("output not ready".to_string()));
        }
        script
            .outputs
            .get(pilot)
            .cloned()
            .ok_or_else(|| ConnectorError::Remote(format!("no output for {pilot}")))
    }

    async fn kill(&self, refs: &[PilotRef]) -> ConnectorResult<()> {
        let mut script = self.lock();
        script.killed.extend(refs.iter().cloned());
        Ok(())
    }
}

// ── StaticOracle ───────────────────────────────────────────────────

/// Demand oracle answering from a fixed list of groups.
///
/// A group matches a descriptor when the descriptor names no sites, or the
/// group is unrestricted, or the two site lists intersect.
#[derive(Default)]
pub struct StaticOracle {
    groups: Mutex<Vec<DemandGroup>>,
    queries: AtomicU64,
}

impl StaticOracle {
    pub fn new(groups: Vec<DemandGroup>) -> Self {
        Self {
            groups: Mutex::new(groups),
            queries: AtomicU64::new(0),
        }
    }

    pub fn set_groups(&self, groups: Vec<DemandGroup>) {
        *self.groups.lock().expect("oracle lock") = groups;
    }

    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DemandOracle for StaticOracle {
    async fn matching_demand(
        &self,
        descriptor: &CapabilityDescriptor,
    ) -> OracleResult<Vec<DemandGroup>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let groups = self.groups.lock().expect("oracle lock");
        Ok(groups
            .iter()
            .filter(|g| {
                descriptor.sites.is_empty()
                    || g.required_sites.is_empty()
                    || g.required_sites.iter().any(|s| descriptor.sites.contains(s))
            })
            .cloned()
            .collect())
    }
}

// ── StaticCredentials ──────────────────────────────────────────────

/// Credential provider issuing from a fixed clock, with an issuance counter.
pub struct StaticCredentials {
    now: AtomicU64,
    issued: AtomicU32,
    fail: Mutex<bool>,
}

impl Default for StaticCredentials {
    fn default() -> Self {
        Self {
            now: AtomicU64::new(1_000_000),
            issued: AtomicU32::new(0),
            fail: Mutex::new(false),
        }
    }
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_now(&self, now: u64) {
        self.now.store(now, Ordering::Relaxed);
    }

    pub fn fail_issuance(&self, fail: bool) {
        *self.fail.lock().expect("credentials lock") = fail;
    }

    pub fn issued(&self) -> u32 {
        self.issued.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn issue(
        &self,
        subject: &str,
        group: &str,
        lifetime_secs: u64,
    ) -> CredentialResult<Credential> {
        if *self.fail.lock().expect("credentials lock") {
            return Err(pilotgrid_core::CredentialError::Issuance {
                subject: subject.to_string(),
                reason: "issuance disabled by test".to_string(),
            });
        }
        self.issued.fetch_add(1, Ordering::Relaxed);
        Ok(Credential {
            subject: subject.to_string(),
            group: group.to_string(),
            expires_at: self.now.load(Ordering::Relaxed) + lifetime_secs,
        })
    }
}

// ── RecordingAccounting ────────────────────────────────────────────

/// Accounting sink that captures every record for later assertions.
#[derive(Default)]
pub struct RecordingAccounting {
    submissions: Mutex<Vec<SubmissionRecord>>,
    pilots: Mutex<Vec<PilotLifecycleRecord>>,
}

impl RecordingAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.submissions.lock().expect("accounting lock").clone()
    }

    pub fn pilots(&self) -> Vec<PilotLifecycleRecord> {
        self.pilots.lock().expect("accounting lock").clone()
    }
}

impl AccountingSink for RecordingAccounting {
    fn record_submission(&self, record: SubmissionRecord) {
        self.submissions
            .lock()
            .expect("accounting lock")
            .push(record);
    }

    fn record_pilot(&self, record: PilotLifecycleRecord) {
        self.pilots.lock().expect("accounting lock").push(record);
    }
}
