//! The per-job routing decision.

use std::collections::HashMap;
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use pilotgrid_core::{AgentOptions, SiteMask, SiteName};

use crate::plan::{
    HoldReason, JobDescriptor, JobKind, ReplicaTable, RoutingOutcome, SiteInfo, StagingPlan,
};
use crate::traits::{JobStateSink, StagingService};

/// Staging engine tunables.
#[derive(Debug, Clone, Default)]
pub struct StagingOptions {
    /// Discard candidate sites whose CEs offer no matching platform.
    pub check_platform: bool,
    /// Keep user-pinned sites that are currently inactive as candidates
    /// instead of failing the job outright.
    pub allow_inactive_user_sites: bool,
}

impl StagingOptions {
    pub fn from_agent(opts: &AgentOptions) -> Self {
        Self {
            check_platform: opts.check_platform,
            ..Self::default()
        }
    }
}

struct SiteCoverage<'a> {
    site: &'a SiteInfo,
    disk: usize,
}

/// Decides, per job, between direct routing, staging, hold, and failure.
///
/// The job's persistent state is updated through the sink as a side effect
/// of every outcome; the returned value tells the caller what happened.
pub struct StagingEngine {
    opts: StagingOptions,
    staging: Arc<dyn StagingService>,
    jobs: Arc<dyn JobStateSink>,
    rng: StdRng,
}

impl StagingEngine {
    pub fn new(
        opts: StagingOptions,
        staging: Arc<dyn StagingService>,
        jobs: Arc<dyn JobStateSink>,
    ) -> Self {
        Self {
            opts,
            staging,
            jobs,
            rng: StdRng::from_entropy(),
        }
    }

    /// Seed the random source so staging-site tie-breaks are reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Route one job against the current site and replica picture.
    ///
    /// `replicas` is shared across the jobs of a routing batch: staging
    /// submitted here credits the table so later jobs see the new disk
    /// copies without another catalog query.
    pub async fn route_job(
        &mut self,
        job: &JobDescriptor,
        sites: &HashMap<SiteName, SiteInfo>,
        mask: &SiteMask,
        replicas: &mut ReplicaTable,
    ) -> RoutingOutcome {
        // User site and ban filters. Unrestricted jobs keep inactive sites
        // as candidates; the live mask is re-applied where it matters
        // (staging-site selection, and by the matcher at dispatch time).
        let mut candidates: Vec<&SiteInfo> = if job.sites.is_empty() {
            sites.values().collect()
        } else {
            let known: Vec<&SiteInfo> =
                job.sites.iter().filter_map(|s| sites.get(s)).collect();
            let active: Vec<&SiteInfo> = known
                .iter()
                .copied()
                .filter(|s| mask.allows(&s.name))
                .collect();
            if active.is_empty() && !self.opts.allow_inactive_user_sites {
                return self
                    .fail(
                        job,
                        format!(
                            "user-selected sites {:?} are inactive or unknown",
                            job.sites
                        ),
                    )
                    .await;
            }
            if active.is_empty() { known } else { active }
        };
        candidates.retain(|s| !job.banned_sites.contains(&s.name));
        // Stable order so every later tie-break depends only on the seed.
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        if candidates.is_empty() {
            return self
                .fail(job, "no candidate site left after site filters".to_string())
                .await;
        }

        // Platform compatibility.
        if self.opts.check_platform
            && let Some(platform) = &job.platform
        {
            candidates.retain(|s| s.platforms.iter().any(|p| p == platform));
            if candidates.is_empty() {
                return self
                    .fail(job, format!("no candidate site offers platform {platform}"))
                    .await;
            }
        }

        // Data-free jobs and bulk production work skip replica arbitration.
        if job.input_files.is_empty() || job.kind == JobKind::Production {
            let names: Vec<SiteName> = candidates.iter().map(|s| s.name.clone()).collect();
            return self.route_direct(job, names).await;
        }

        // Per-site replica coverage. A site is eligible only when every
        // input file has some local replica; partial coverage would force a
        // secondary retrieval path at execution time.
        let file_count = job.input_files.len();
        let covered: Vec<SiteCoverage<'_>> = candidates
            .iter()
            .copied()
            .filter_map(|site| {
                let (disk, tape) = site_counts(site, &job.input_files, replicas);
                (disk + tape == file_count).then_some(SiteCoverage { site, disk })
            })
            .collect();
        if covered.is_empty() {
            return self
                .fail(
                    job,
                    "input files have no complete replica set at any candidate site"
                        .to_string(),
                )
                .await;
        }

        let disk_complete: Vec<SiteName> = covered
            .iter()
            .filter(|c| c.disk == file_count)
            .map(|c| c.site.name.clone())
            .collect();
        if !disk_complete.is_empty() {
            debug!(job = job.id, sites = ?disk_complete, "disk-complete, no staging needed");
            return self.route_direct(job, disk_complete).await;
        }

        // Staging candidates: the sites maximizing disk replicas, still
        // active and unbanned.
        let max_disk = covered.iter().map(|c| c.disk).max().unwrap_or(0);
        let mut staging_sites: Vec<&SiteInfo> = covered
            .iter()
            .filter(|c| c.disk == max_disk && mask.allows(&c.site.name))
            .map(|c| c.site)
            .collect();
        if staging_sites.is_empty() {
            return self.hold(job, HoldReason::NoActiveCandidate).await;
        }

        // All remaining candidates are equally good by the disk metric;
        // any of them will do.
        staging_sites.shuffle(&mut self.rng);
        let chosen = staging_sites[0];

        let plan = match build_plan(job, chosen, replicas) {
            Ok(plan) => plan,
            Err(reason) => return self.fail(job, reason).await,
        };

        match self.staging.request_staging(&plan).await {
            Ok(request) => {
                if let Err(e) = self.jobs.set_awaiting_stage(job.id).await {
                    warn!(job = job.id, error = %e, "job state update failed");
                }
                for (storage, files) in &plan.per_storage {
                    replicas.credit_disk(storage, files);
                }
                info!(
                    job = job.id,
                    site = %chosen.name,
                    files = plan.per_storage.values().map(Vec::len).sum::<usize>(),
                    request = %request,
                    "staging requested"
                );
                RoutingOutcome::AwaitingStage {
                    site: chosen.name.clone(),
                    request,
                }
            }
            Err(e) => {
                self.hold(job, HoldReason::StagingUnavailable(e.to_string()))
                    .await
            }
        }
    }

    async fn route_direct(&self, job: &JobDescriptor, sites: Vec<SiteName>) -> RoutingOutcome {
        match self.jobs.route_to_demand(job.id, &sites).await {
            Ok(()) => {
                info!(job = job.id, sites = sites.len(), "job sent to matching");
                RoutingOutcome::Direct { sites }
            }
            Err(e) => {
                warn!(job = job.id, error = %e, "demand registration failed");
                RoutingOutcome::Hold {
                    reason: HoldReason::RoutingUnavailable(e.to_string()),
                }
            }
        }
    }

    async fn hold(&self, job: &JobDescriptor, reason: HoldReason) -> RoutingOutcome {
        warn!(job = job.id, %reason, "job held for retry");
        if let Err(e) = self.jobs.hold(job.id, &reason.to_string()).await {
            warn!(job = job.id, error = %e, "job state update failed");
        }
        RoutingOutcome::Hold { reason }
    }

    async fn fail(&self, job: &JobDescriptor, reason: String) -> RoutingOutcome {
        warn!(job = job.id, %reason, "job routing failed permanently");
        if let Err(e) = self.jobs.fail(job.id, &reason).await {
            warn!(job = job.id, error = %e, "job state update failed");
        }
        RoutingOutcome::Failed { reason }
    }
}

/// Count how many of the job's files are disk- respectively tape-resident
/// at the site. A file with both kinds of local replica counts as disk.
fn site_counts(site: &SiteInfo, files: &[String], replicas: &ReplicaTable) -> (usize, usize) {
    let mut disk = 0;
    let mut tape = 0;
    for file in files {
        let mut has_disk = false;
        let mut has_tape = false;
        for storage in &site.storage {
            if let Some(flags) = replicas.flags(file, storage) {
                has_disk |= flags.on_disk;
                has_tape |= flags.on_tape;
            }
        }
        if has_disk {
            disk += 1;
        } else if has_tape {
            tape += 1;
        }
    }
    (disk, tape)
}

/// Assemble the per-endpoint staging lists for the chosen site.
///
/// Files already disk-resident locally need nothing; the rest are pulled
/// from a tape-resident, protocol-reachable endpoint. A needed file with no
/// such endpoint fails the job.
fn build_plan(
    job: &JobDescriptor,
    site: &SiteInfo,
    replicas: &ReplicaTable,
) -> Result<StagingPlan, String> {
    let mut per_storage: HashMap<String, Vec<String>> = HashMap::new();
    for file in &job.input_files {
        let on_disk_here = site
            .storage
            .iter()
            .any(|se| replicas.flags(file, se).is_some_and(|f| f.on_disk));
        if on_disk_here {
            continue;
        }

        let source = site
            .storage
            .iter()
            .find(|se| {
                replicas
                    .flags(file, se)
                    .is_some_and(|f| f.on_tape && f.protocol_ok)
            });
        match source {
            Some(se) => per_storage.entry(se.clone()).or_default().push(file.clone()),
            None => return Err(format!("no tape replicas found for {file}")),
        }
    }
    Ok(StagingPlan {
        job: job.id,
        site: site.name.clone(),
        per_storage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ReplicaFlags;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    #[derive(Default)]
    struct RecordingStaging {
        requests: Mutex<Vec<StagingPlan>>,
        next_id: AtomicU64,
        fail: AtomicBool,
    }

    impl RecordingStaging {
        fn requests(&self) -> Vec<StagingPlan> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StagingService for RecordingStaging {
        async fn request_staging(&self, plan: &StagingPlan) -> anyhow::Result<String> {
            if self.fail.load(Ordering::Relaxed) {
                anyhow::bail!("staging backend down");
            }
            self.requests.lock().unwrap().push(plan.clone());
            let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            Ok(format!("req-{id}"))
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum SinkEvent {
        Routed(u64, Vec<SiteName>),
        AwaitingStage(u64),
        Held(u64, String),
        Failed(u64, String),
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<SinkEvent>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<SinkEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobStateSink for RecordingSink {
        async fn route_to_demand(&self, job: u64, sites: &[SiteName]) -> anyhow::Result<()> {
            self.events
                .lock()
                .unwrap()
                .push(SinkEvent::Routed(job, sites.to_vec()));
            Ok(())
        }

        async fn set_awaiting_stage(&self, job: u64) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(SinkEvent::AwaitingStage(job));
            Ok(())
        }

        async fn hold(&self, job: u64, reason: &str) -> anyhow::Result<()> {
            self.events
                .lock()
                .unwrap()
                .push(SinkEvent::Held(job, reason.to_string()));
            Ok(())
        }

        async fn fail(&self, job: u64, reason: &str) -> anyhow::Result<()> {
            self.events
                .lock()
                .unwrap()
                .push(SinkEvent::Failed(job, reason.to_string()));
            Ok(())
        }
    }

    struct Harness {
        staging: Arc<RecordingStaging>,
        sink: Arc<RecordingSink>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                staging: Arc::new(RecordingStaging::default()),
                sink: Arc::new(RecordingSink::default()),
            }
        }

        fn engine(&self, opts: StagingOptions) -> StagingEngine {
            StagingEngine::new(opts, self.staging.clone(), self.sink.clone()).with_seed(7)
        }
    }

    fn site(name: &str, platforms: &[&str], storage: &[&str]) -> SiteInfo {
        SiteInfo {
            name: name.to_string(),
            platforms: platforms.iter().map(|p| p.to_string()).collect(),
            storage: storage.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn site_map(sites: Vec<SiteInfo>) -> HashMap<SiteName, SiteInfo> {
        sites.into_iter().map(|s| (s.name.clone(), s)).collect()
    }

    fn job(id: u64, files: &[&str]) -> JobDescriptor {
        JobDescriptor {
            id,
            kind: JobKind::User,
            sites: Vec::new(),
            banned_sites: Vec::new(),
            platform: None,
            input_files: files.iter().map(|f| f.to_string()).collect(),
        }
    }

    const DISK: ReplicaFlags = ReplicaFlags {
        on_disk: true,
        on_tape: false,
        protocol_ok: true,
    };
    const TAPE: ReplicaFlags = ReplicaFlags {
        on_disk: false,
        on_tape: true,
        protocol_ok: true,
    };

    #[tokio::test]
    async fn data_free_job_routes_directly() {
        let harness = Harness::new();
        let sites = site_map(vec![
            site("SITE_A", &[], &[]),
            site("SITE_B", &[], &[]),
        ]);
        let mask = SiteMask::new(["SITE_A", "SITE_B"]);
        let mut replicas = ReplicaTable::new();

        let mut engine = harness.engine(StagingOptions::default());
        let outcome = engine
            .route_job(&job(1, &[]), &sites, &mask, &mut replicas)
            .await;

        assert_eq!(
            outcome,
            RoutingOutcome::Direct {
                sites: vec!["SITE_A".to_string(), "SITE_B".to_string()],
            }
        );
        assert!(harness.staging.requests().is_empty());
        assert_eq!(
            harness.sink.events(),
            vec![SinkEvent::Routed(
                1,
                vec!["SITE_A".to_string(), "SITE_B".to_string()]
            )]
        );
    }

    #[tokio::test]
    async fn production_job_skips_replica_arbitration() {
        let harness = Harness::new();
        let sites = site_map(vec![site("SITE_A", &[], &["se-a"])]);
        let mask = SiteMask::new(["SITE_A"]);
        let mut replicas = ReplicaTable::new();

        let mut bulk = job(2, &["/data/f1"]);
        bulk.kind = JobKind::Production;

        let mut engine = harness.engine(StagingOptions::default());
        let outcome = engine.route_job(&bulk, &sites, &mask, &mut replicas).await;

        assert!(matches!(outcome, RoutingOutcome::Direct { .. }));
        assert!(harness.staging.requests().is_empty());
    }

    #[tokio::test]
    async fn disk_complete_site_needs_no_staging() {
        // Scenario: every file disk-resident at SITE_X.
        let harness = Harness::new();
        let sites = site_map(vec![site("SITE_X", &[], &["se-x-disk"])]);
        let mask = SiteMask::new(["SITE_X"]);
        let mut replicas = ReplicaTable::new();
        for file in ["/data/f1", "/data/f2", "/data/f3"] {
            replicas.insert(file, "se-x-disk", DISK);
        }

        let mut engine = harness.engine(StagingOptions::default());
        let outcome = engine
            .route_job(&job(3, &["/data/f1", "/data/f2", "/data/f3"]), &sites, &mask, &mut replicas)
            .await;

        assert_eq!(
            outcome,
            RoutingOutcome::Direct {
                sites: vec!["SITE_X".to_string()],
            }
        );
        assert!(harness.staging.requests().is_empty());
    }

    #[tokio::test]
    async fn max_disk_site_wins_the_staging_pick() {
        // Scenario: 5 files, SITE_Y holds 2 on disk and 3 on tape, SITE_Z
        // all 5 on tape only. Y maximizes disk replicas and is chosen.
        let harness = Harness::new();
        let sites = site_map(vec![
            site("SITE_Y", &[], &["se-y-disk", "se-y-tape"]),
            site("SITE_Z", &[], &["se-z-tape"]),
        ]);
        let mask = SiteMask::new(["SITE_Y", "SITE_Z"]);
        let files = ["/d/f1", "/d/f2", "/d/f3", "/d/f4", "/d/f5"];
        let mut replicas = ReplicaTable::new();
        replicas.insert("/d/f1", "se-y-disk", DISK);
        replicas.insert("/d/f2", "se-y-disk", DISK);
        for file in ["/d/f3", "/d/f4", "/d/f5"] {
            replicas.insert(file, "se-y-tape", TAPE);
        }
        for file in files {
            replicas.insert(file, "se-z-tape", TAPE);
        }

        let mut engine = harness.engine(StagingOptions::default());
        let outcome = engine
            .route_job(&job(4, &files), &sites, &mask, &mut replicas)
            .await;

        let RoutingOutcome::AwaitingStage { site, request } = outcome else {
            panic!("expected staging, got {outcome:?}");
        };
        assert_eq!(site, "SITE_Y");
        assert_eq!(request, "req-1");

        let requests = harness.staging.requests();
        assert_eq!(requests.len(), 1);
        let mut staged = requests[0].per_storage["se-y-tape"].clone();
        staged.sort();
        assert_eq!(staged, vec!["/d/f3", "/d/f4", "/d/f5"]);
        assert!(harness.sink.events().contains(&SinkEvent::AwaitingStage(4)));
    }

    #[tokio::test]
    async fn partial_coverage_site_is_not_eligible() {
        // SITE_P holds only 2 of 3 files; nothing else covers them: fail.
        let harness = Harness::new();
        let sites = site_map(vec![site("SITE_P", &[], &["se-p"])]);
        let mask = SiteMask::new(["SITE_P"]);
        let mut replicas = ReplicaTable::new();
        replicas.insert("/d/f1", "se-p", DISK);
        replicas.insert("/d/f2", "se-p", TAPE);

        let mut engine = harness.engine(StagingOptions::default());
        let outcome = engine
            .route_job(&job(5, &["/d/f1", "/d/f2", "/d/f3"]), &sites, &mask, &mut replicas)
            .await;

        assert!(matches!(outcome, RoutingOutcome::Failed { .. }));
        assert!(matches!(
            harness.sink.events().as_slice(),
            [SinkEvent::Failed(5, _)]
        ));
    }

    #[tokio::test]
    async fn inactive_user_sites_fail_the_job() {
        let harness = Harness::new();
        let sites = site_map(vec![site("SITE_A", &[], &[])]);
        let mask = SiteMask::new(["SITE_B"]); // SITE_A not usable.
        let mut replicas = ReplicaTable::new();

        let mut pinned = job(6, &[]);
        pinned.sites = vec!["SITE_A".to_string(), "SITE_MISSPELLED".to_string()];

        let mut engine = harness.engine(StagingOptions::default());
        let outcome = engine
            .route_job(&pinned, &sites, &mask, &mut replicas)
            .await;

        let RoutingOutcome::Failed { reason } = outcome else {
            panic!("expected failure");
        };
        assert!(reason.contains("inactive or unknown"));
    }

    #[tokio::test]
    async fn banned_sites_are_removed() {
        let harness = Harness::new();
        let sites = site_map(vec![
            site("SITE_A", &[], &[]),
            site("SITE_B", &[], &[]),
        ]);
        let mask = SiteMask::new(["SITE_A", "SITE_B"]);
        let mut replicas = ReplicaTable::new();

        let mut banned = job(7, &[]);
        banned.banned_sites = vec!["SITE_A".to_string()];

        let mut engine = harness.engine(StagingOptions::default());
        let outcome = engine
            .route_job(&banned, &sites, &mask, &mut replicas)
            .await;

        assert_eq!(
            outcome,
            RoutingOutcome::Direct {
                sites: vec!["SITE_B".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn platform_mismatch_discards_sites() {
        let harness = Harness::new();
        let sites = site_map(vec![
            site("SITE_A", &["el9-x86_64"], &[]),
            site("SITE_B", &["el8-x86_64"], &[]),
        ]);
        let mask = SiteMask::new(["SITE_A", "SITE_B"]);
        let mut replicas = ReplicaTable::new();

        let mut picky = job(8, &[]);
        picky.platform = Some("el9-x86_64".to_string());

        let opts = StagingOptions {
            check_platform: true,
            ..Default::default()
        };
        let mut engine = harness.engine(opts);
        let outcome = engine.route_job(&picky, &sites, &mask, &mut replicas).await;

        assert_eq!(
            outcome,
            RoutingOutcome::Direct {
                sites: vec!["SITE_A".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn unreachable_tape_fails_with_no_replicas() {
        let harness = Harness::new();
        let sites = site_map(vec![site("SITE_T", &[], &["se-t-tape"])]);
        let mask = SiteMask::new(["SITE_T"]);
        let mut replicas = ReplicaTable::new();
        replicas.insert(
            "/d/f1",
            "se-t-tape",
            ReplicaFlags {
                on_disk: false,
                on_tape: true,
                protocol_ok: false,
            },
        );

        let mut engine = harness.engine(StagingOptions::default());
        let outcome = engine
            .route_job(&job(9, &["/d/f1"]), &sites, &mask, &mut replicas)
            .await;

        let RoutingOutcome::Failed { reason } = outcome else {
            panic!("expected failure");
        };
        assert!(reason.contains("no tape replicas found"));
        assert!(harness.staging.requests().is_empty());
    }

    #[tokio::test]
    async fn inactive_staging_candidates_hold_the_job() {
        // The only covered site is masked out: soft hold, not failure.
        let harness = Harness::new();
        let sites = site_map(vec![site("SITE_T", &[], &["se-t-tape"])]);
        let mask = SiteMask::default();
        let mut replicas = ReplicaTable::new();
        replicas.insert("/d/f1", "se-t-tape", TAPE);

        let mut engine = harness.engine(StagingOptions::default());
        let outcome = engine
            .route_job(&job(10, &["/d/f1"]), &sites, &mask, &mut replicas)
            .await;

        assert_eq!(
            outcome,
            RoutingOutcome::Hold {
                reason: HoldReason::NoActiveCandidate,
            }
        );
        assert!(matches!(
            harness.sink.events().as_slice(),
            [SinkEvent::Held(10, _)]
        ));
    }

    #[tokio::test]
    async fn staging_backend_failure_holds_the_job() {
        let harness = Harness::new();
        harness.staging.fail.store(true, Ordering::Relaxed);
        let sites = site_map(vec![site("SITE_T", &[], &["se-t-tape"])]);
        let mask = SiteMask::new(["SITE_T"]);
        let mut replicas = ReplicaTable::new();
        replicas.insert("/d/f1", "se-t-tape", TAPE);

        let mut engine = harness.engine(StagingOptions::default());
        let outcome = engine
            .route_job(&job(11, &["/d/f1"]), &sites, &mask, &mut replicas)
            .await;

        assert!(matches!(
            outcome,
            RoutingOutcome::Hold {
                reason: HoldReason::StagingUnavailable(_),
            }
        ));
    }

    #[tokio::test]
    async fn staged_replicas_credit_sites_sharing_the_endpoint() {
        // SITE_Y and SITE_W share one tape endpoint. Staging for the first
        // job makes the second job disk-complete without a new request.
        let harness = Harness::new();
        let sites = site_map(vec![
            site("SITE_W", &[], &["se-shared"]),
            site("SITE_Y", &[], &["se-shared"]),
        ]);
        let mask = SiteMask::new(["SITE_W", "SITE_Y"]);
        let mut replicas = ReplicaTable::new();
        replicas.insert("/d/f1", "se-shared", TAPE);

        let mut engine = harness.engine(StagingOptions::default());
        let first = engine
            .route_job(&job(12, &["/d/f1"]), &sites, &mask, &mut replicas)
            .await;
        assert!(matches!(first, RoutingOutcome::AwaitingStage { .. }));

        let second = engine
            .route_job(&job(13, &["/d/f1"]), &sites, &mask, &mut replicas)
            .await;
        let RoutingOutcome::Direct { mut sites } = second else {
            panic!("expected direct routing after crediting");
        };
        sites.sort();
        assert_eq!(sites, vec!["SITE_W".to_string(), "SITE_Y".to_string()]);
        assert_eq!(harness.staging.requests().len(), 1);
    }

    #[tokio::test]
    async fn tie_break_is_deterministic_under_a_seed() {
        let build = |harness: &Harness| harness.engine(StagingOptions::default());
        let sites = site_map(vec![
            site("SITE_A", &[], &["se-a-tape"]),
            site("SITE_B", &[], &["se-b-tape"]),
        ]);
        let mask = SiteMask::new(["SITE_A", "SITE_B"]);

        let mut picks = Vec::new();
        for _ in 0..3 {
            let harness = Harness::new();
            let mut replicas = ReplicaTable::new();
            replicas.insert("/d/f1", "se-a-tape", TAPE);
            replicas.insert("/d/f1", "se-b-tape", TAPE);

            let mut engine = build(&harness);
            let outcome = engine
                .route_job(&job(14, &["/d/f1"]), &sites, &mask, &mut replicas)
                .await;
            let RoutingOutcome::AwaitingStage { site, .. } = outcome else {
                panic!("expected staging");
            };
            picks.push(site);
        }

        assert_eq!(picks[0], picks[1]);
        assert_eq!(picks[1], picks[2]);
    }
}
