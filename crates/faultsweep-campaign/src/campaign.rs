//! The campaign scheduler.
//!
//! Owns the site registry and the build slot pool, and drives the fixed
//! three-phase pipeline over a bounded worker pool.  Workers receive whole
//! testcases, perform the blocking build/run steps, and message the results
//! back; the coordinator is the only writer of the registry.
//!
//! Within one site the ordering is enforced by data dependency: a site's
//! injection testcases are only constructed after its profile run classified
//! as hit.  Across sites there is no ordering at all; results are consumed
//! in completion order, and the drain abandons the long tail once the
//! early-stop policy is satisfied.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use faultsweep_fault::{
    Category, FaultKind, FaultSpec, OutcomeData, OutcomeRecord, RunOutcome, UnitKind,
};
use faultsweep_protocol::{ENV_CC, ENV_CXX};

use crate::markers::{self, FunctionFilter, SiteMap};
use crate::pool::{DrainOutcome, StopPolicy, WorkerPool};
use crate::report;
use crate::runner::RunRecord;
use crate::sampling::{SamplingConfig, SamplingController};
use crate::site::{site_uid, InjectionRecord, SiteInfo};
use crate::slots::BuildSlotPool;
use crate::testcase::{Testcase, TestcaseContext};
use crate::testdef::TestDefinition;
use crate::CampaignError;

/// Full campaign or the reduced sanity-check variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestMode {
    /// Every eligible site, early-stopping at the configured fraction.
    Full,
    /// A fixed random subsample of sites, one canonical injection each.
    Lite,
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestMode::Full => write!(f, "full"),
            TestMode::Lite => write!(f, "lite"),
        }
    }
}

impl FromStr for TestMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(TestMode::Full),
            "lite" => Ok(TestMode::Lite),
            other => Err(format!("unknown test mode: {other}")),
        }
    }
}

/// Configuration for one campaign.
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    /// Campaign tag; names the scratch tree under `work_dir`.
    pub tag: String,
    /// Application under test (key into the test-definition manifest).
    pub app: String,
    /// Detector variant label, e.g. `orthrus`; keys the sampling baseline.
    pub variant: String,
    pub category: Category,
    pub mode: TestMode,
    /// Template source tree the build slots are seeded from.
    pub template_dir: PathBuf,
    /// Scratch root; the campaign works in `work_dir/tag/`.
    pub work_dir: PathBuf,
    /// Result file path.
    pub output: PathBuf,
    /// Directory for persisted sampling baselines.
    pub state_dir: PathBuf,
    /// Toolchain prefix exported as CC/CXX, when set.
    pub llvm_dir: Option<PathBuf>,
    /// Build slots and build-phase worker width.
    pub build_jobs: usize,
    /// Run-phase worker width.
    pub test_jobs: usize,
    /// Wall-clock bound per external invocation.
    pub run_timeout: Duration,
    /// Master seed; `None` draws one from entropy and logs it.
    pub seed: Option<u64>,
    /// Allow patterns for eligible functions (empty = all).
    pub allow_patterns: Vec<String>,
    /// Deny patterns, consulted before the allow list.
    pub deny_patterns: Vec<String>,
    /// Completion fraction at which full-mode phases stop waiting.
    pub stop_fraction: f64,
    /// Subsample size in lite mode.
    pub lite_sample: usize,
    /// Lite-mode phases stop once fewer than this many units remain.
    pub lite_tail: usize,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            tag: "campaign".to_string(),
            app: String::new(),
            variant: "orthrus".to_string(),
            category: Category::Computational,
            mode: TestMode::Full,
            template_dir: PathBuf::new(),
            work_dir: std::env::temp_dir().join("faultsweep"),
            output: PathBuf::from("output.json"),
            state_dir: std::env::temp_dir().join("faultsweep-state"),
            llvm_dir: None,
            build_jobs: 1,
            test_jobs: 32,
            run_timeout: Duration::from_secs(600),
            seed: None,
            allow_patterns: Vec::new(),
            deny_patterns: Vec::new(),
            stop_fraction: 0.99,
            lite_sample: 100,
            lite_tail: 2,
        }
    }
}

/// End-of-campaign counters.
#[derive(Debug, Clone)]
pub struct CampaignReport {
    pub tag: String,
    pub seed: u64,
    pub sites: usize,
    pub eligible: usize,
    pub hit: usize,
    pub finished: usize,
    pub injections: usize,
    pub verdicts: BTreeMap<String, usize>,
    pub interrupted: bool,
}

/// The campaign engine.
pub struct Campaign {
    config: CampaignConfig,
    ctx: TestcaseContext,
    slots: Arc<BuildSlotPool>,
    filter: FunctionFilter,
    sampler: SamplingController,
    registry: BTreeMap<String, SiteInfo>,
    budgets: BTreeMap<UnitKind, u32>,
    rng: ChaCha8Rng,
    seed: u64,
    cancel: Arc<AtomicBool>,
    cache_dir: PathBuf,
    test_dir: PathBuf,
    interrupted: bool,
}

impl Campaign {
    /// Set up the campaign scratch tree, slot pool and RNG.
    pub fn new(
        config: CampaignConfig,
        test_def: Arc<TestDefinition>,
    ) -> Result<Self, CampaignError> {
        if config.template_dir.as_os_str().is_empty() {
            warn!("CampaignConfig has empty template_dir, builds will fail");
        }

        let seed = config.seed.unwrap_or_else(|| {
            let drawn: u64 = rand::random();
            info!("no seed configured, drew {drawn} (pass --seed {drawn} to reproduce)");
            drawn
        });

        let root = config.work_dir.join(&config.tag);
        let cache_dir = root.join("cache");
        let test_dir = root.join("test");
        std::fs::create_dir_all(&cache_dir)?;
        std::fs::create_dir_all(&test_dir)?;

        let slots = Arc::new(BuildSlotPool::new(
            &config.template_dir,
            &root.join("build"),
            config.build_jobs,
        )?);

        let filter = FunctionFilter::new(&config.allow_patterns, &config.deny_patterns)?;
        let sampler = SamplingController::new(SamplingConfig::new(config.state_dir.clone()));

        let mut env = BTreeMap::new();
        if let Some(llvm_dir) = &config.llvm_dir {
            env.insert(
                ENV_CC.to_string(),
                llvm_dir.join("bin/clang").to_string_lossy().into_owned(),
            );
            env.insert(
                ENV_CXX.to_string(),
                llvm_dir.join("bin/clang++").to_string_lossy().into_owned(),
            );
        }

        let ctx = TestcaseContext {
            category: config.category,
            test_def,
            env,
            timeout: config.run_timeout,
        };

        info!("campaign tag: {}", config.tag);
        info!("campaign scratch dir: {}", root.display());

        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
            ctx,
            slots,
            filter,
            sampler,
            registry: BTreeMap::new(),
            budgets: BTreeMap::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            cache_dir,
            test_dir,
            interrupted: false,
            config,
        })
    }

    /// Cooperative cancellation flag; flip it from a signal handler to stop
    /// new submissions and trigger the partial dump.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run the full pipeline and persist the result map.
    pub fn run(&mut self) -> Result<CampaignReport, CampaignError> {
        info!(
            "starting campaign: app={} variant={} category={} mode={} seed={}",
            self.config.app, self.config.variant, self.config.category, self.config.mode, self.seed
        );

        let raw_map = self.inspect()?;
        self.register_sites(raw_map);

        if self.registry.is_empty() {
            warn!("no eligible sites after filtering, nothing to do");
            report::write_results(&self.config.output, &self.registry)?;
            return Ok(self.build_report());
        }

        let worklist = self.select_worklist();

        self.build_profiles(&worklist)?;

        if !self.cancelled() {
            let run_list: Vec<String> = worklist
                .iter()
                .filter(|uid| {
                    self.registry
                        .get(*uid)
                        .is_some_and(|site| site.unit.is_some())
                })
                .cloned()
                .collect();
            self.run_profiles(run_list);
        }

        if !self.cancelled() {
            self.budgets = self.sampler.budgets(
                &self.unit_tallies(),
                self.config.category,
                &self.config.app,
                &self.config.variant,
            )?;
            let hit_list: Vec<String> = worklist
                .iter()
                .filter(|uid| self.registry.get(*uid).is_some_and(|site| site.hit))
                .cloned()
                .collect();
            self.run_injections(hit_list)?;
        }

        // Always rewrite the accumulated result map: normal completion,
        // early stop and interruption all land here.  Unfinished sites are
        // omitted, never half-written.
        report::write_results(&self.config.output, &self.registry)?;
        info!("results written to {}", self.config.output.display());
        info!("\n{}", report::format_summary(&self.config.tag, &self.registry));

        Ok(self.build_report())
    }

    /// Phase 0 only: the filtered site map, for the `inspect` subcommand.
    pub fn inspect_eligible(&mut self) -> Result<SiteMap, CampaignError> {
        let raw = self.inspect()?;
        Ok(self.filter.apply(raw))
    }

    /// The human-readable summary of the current registry state.
    pub fn summary(&self) -> String {
        report::format_summary(&self.config.tag, &self.registry)
    }

    fn cancelled(&self) -> bool {
        self.interrupted || self.cancel.load(Ordering::SeqCst)
    }

    fn stop_policy(&self) -> StopPolicy {
        match self.config.mode {
            TestMode::Full => StopPolicy::Fraction(self.config.stop_fraction),
            TestMode::Lite => StopPolicy::Tail(self.config.lite_tail),
        }
    }

    // ── Phase 0: inspect ────────────────────────────────────────

    /// Build the inspect binary (or reuse the cached parse) and return the
    /// unfiltered function-to-instructions map.
    fn inspect(&mut self) -> Result<SiteMap, CampaignError> {
        let cache = self.cache_dir.join("site_map.json");
        if cache.exists() {
            match std::fs::read_to_string(&cache)
                .map_err(CampaignError::from)
                .and_then(|text| serde_json::from_str::<SiteMap>(&text).map_err(CampaignError::from))
            {
                Ok(map) => {
                    info!("using cached site map from {}", cache.display());
                    return Ok(map);
                }
                Err(err) => warn!("cached site map unreadable ({err}), re-inspecting"),
            }
        }

        info!("inspecting instrumented binary...");
        let mut testcase = Testcase::new(
            "inspect",
            &FaultSpec::Inspect,
            self.slots.acquire(),
            self.test_dir.join("inspect"),
            self.ctx.clone(),
            &mut self.rng,
        )?;
        let record = testcase.build()?;

        let map = markers::parse_inspect_dump(&record.stdout);
        std::fs::write(&cache, serde_json::to_string_pretty(&map)?)?;
        Ok(map)
    }

    fn register_sites(&mut self, raw_map: SiteMap) {
        let eligible = self.filter.apply(raw_map);

        let mut total = 0;
        for (function, insts) in &eligible {
            info!("Func({function}), pcs: {}", insts.len());
            total += insts.len();
            for inst in insts {
                let uid = site_uid(function, inst.pc);
                self.registry
                    .insert(uid, SiteInfo::new(function.clone(), inst.pc, inst.inst.clone()));
            }
        }
        info!("total eligible sites: {total}");
    }

    fn select_worklist(&mut self) -> Vec<String> {
        let uids: Vec<String> = self.registry.keys().cloned().collect();
        match self.config.mode {
            TestMode::Full => uids,
            TestMode::Lite => {
                let n = self.config.lite_sample.min(uids.len());
                let sampled: Vec<String> = uids
                    .choose_multiple(&mut self.rng, n)
                    .cloned()
                    .collect();
                info!("lite mode: sampled {n} of {} sites", self.registry.len());
                sampled
            }
        }
    }

    // ── Phase 1: prepare profile testcases ──────────────────────

    /// Create and build one profile testcase per worklist site on the build
    /// pool.  A failing build aborts the campaign.
    fn build_profiles(&mut self, worklist: &[String]) -> Result<(), CampaignError> {
        struct BuildDone {
            uid: String,
            testcase: Testcase,
            built: Result<RunRecord, CampaignError>,
        }

        let mut pool = WorkerPool::new(self.config.build_jobs, |(uid, mut testcase): (String, Testcase)| {
            let built = testcase.build();
            BuildDone {
                uid,
                testcase,
                built,
            }
        });

        for uid in worklist {
            let (function, pc) = match self.registry.get(uid) {
                Some(site) => (site.function.clone(), site.pc),
                None => continue,
            };
            let tag = format!("profile|{function}|{pc}");
            let spec = FaultSpec::Profile { function, pc };
            let testcase = Testcase::new(
                &tag,
                &spec,
                self.slots.acquire(),
                self.test_dir.join(&tag),
                self.ctx.clone(),
                &mut self.rng,
            )?;
            pool.submit((uid.clone(), testcase));
        }
        info!("submitted {} profile builds", pool.submitted());

        let cancel = Arc::clone(&self.cancel);
        let mut fatal: Option<CampaignError> = None;
        let (done, outcome) = pool.drain(StopPolicy::All, &cancel, |result: BuildDone| {
            match result.built {
                Ok(record) => {
                    let injectable = markers::parse_injectable_sites(&record.stdout);
                    debug!(
                        "testcase {}: {} statically injectable sites reported",
                        result.uid,
                        injectable.len()
                    );

                    let unit = match markers::parse_fault_unit(&record.stdout) {
                        Some(unit) if unit.unit_kind().is_none() => {
                            warn!(
                                "Testcase({}): unrecognized hardware unit '{}', ignoring site",
                                result.uid, unit.unit
                            );
                            None
                        }
                        Some(unit) => Some(unit),
                        None => {
                            info!("Testcase({}): cannot plant a fault here, ignoring", result.uid);
                            None
                        }
                    };

                    if let Some(site) = self.registry.get_mut(&result.uid) {
                        site.profile_testcase = Some(result.testcase);
                        site.unit = unit;
                    }
                }
                Err(err) => {
                    // Broken instrumentation build: stop pulling work and
                    // surface the first failure.
                    if fatal.is_none() {
                        fatal = Some(err);
                        cancel.store(true, Ordering::SeqCst);
                    }
                }
            }
        });

        if let Some(err) = fatal {
            return Err(err);
        }
        if outcome == DrainOutcome::Cancelled {
            self.interrupted = true;
        }
        debug!("profile build phase: {done} builds consumed");
        Ok(())
    }

    // ── Phase 2: profile runs ───────────────────────────────────

    fn run_profiles(&mut self, run_list: Vec<String>) {
        struct ProfileDone {
            uid: String,
            testcase: Testcase,
            outcome: OutcomeRecord,
        }

        let mut pool = WorkerPool::new(self.config.test_jobs, |(uid, mut testcase): (String, Testcase)| {
            let outcome = run_or_unknown(&mut testcase);
            ProfileDone {
                uid,
                testcase,
                outcome,
            }
        });

        for uid in run_list {
            let Some(site) = self.registry.get_mut(&uid) else {
                continue;
            };
            let Some(testcase) = site.profile_testcase.take() else {
                continue;
            };
            pool.submit((uid, testcase));
        }
        info!("submitted {} profile runs", pool.submitted());

        let cancel = Arc::clone(&self.cancel);
        let (done, outcome) = pool.drain(self.stop_policy(), &cancel, |result: ProfileDone| {
            if let Some(site) = self.registry.get_mut(&result.uid) {
                match result.outcome.outcome {
                    RunOutcome::SigTrap => {
                        info!("Testcase({}): profile hit", result.uid);
                        site.hit = true;
                    }
                    RunOutcome::Success => debug!("Testcase({}): profile not hit", result.uid),
                    other => warn!("Testcase({}): strange profile outcome {other}", result.uid),
                }
                site.profile_outcome = Some(result.outcome);
                site.profile_testcase = Some(result.testcase);
            }
        });

        if outcome == DrainOutcome::Cancelled {
            self.interrupted = true;
        }
        info!(
            "profile phase done ({done} runs, {} hit)",
            self.registry.values().filter(|s| s.hit).count()
        );
    }

    fn unit_tallies(&self) -> BTreeMap<UnitKind, usize> {
        let mut tallies = BTreeMap::new();
        for site in self.registry.values().filter(|site| site.hit) {
            if let Some(unit) = site.unit.as_ref().and_then(|report| report.unit_kind()) {
                *tallies.entry(unit).or_insert(0) += 1;
            }
        }
        tallies
    }

    // ── Phase 3: injections ─────────────────────────────────────

    /// For every hit site, build and run the planned injections.  The plan
    /// is fixed here, in the coordinator, so the RNG stays single-threaded
    /// and the descriptor widths are reproducible from the seed.
    fn run_injections(&mut self, hit_list: Vec<String>) -> Result<(), CampaignError> {
        struct InjectTask {
            uid: String,
            testcases: Vec<Testcase>,
        }
        struct InjectDone {
            uid: String,
            records: Result<Vec<InjectionRecord>, CampaignError>,
        }

        let mut pool = WorkerPool::new(self.config.test_jobs, |task: InjectTask| {
            let mut records = Vec::with_capacity(task.testcases.len());
            for mut testcase in task.testcases {
                match testcase.build() {
                    Ok(_) => {}
                    Err(err) => {
                        return InjectDone {
                            uid: task.uid,
                            records: Err(err),
                        }
                    }
                }
                let outcome = run_or_unknown(&mut testcase);
                records.push(InjectionRecord {
                    name: testcase.tag().to_string(),
                    descriptor: testcase.descriptor().clone(),
                    outcome,
                });
            }
            InjectDone {
                uid: task.uid,
                records: Ok(records),
            }
        });

        for uid in hit_list {
            let testcases = self.plan_injections(&uid)?;
            if testcases.is_empty() {
                continue;
            }
            pool.submit(InjectTask { uid, testcases });
        }
        info!("submitted injections for {} sites", pool.submitted());

        let cancel = Arc::clone(&self.cancel);
        let mut fatal: Option<CampaignError> = None;
        let (done, outcome) = pool.drain(self.stop_policy(), &cancel, |result: InjectDone| {
            match result.records {
                Ok(records) => {
                    if let Some(site) = self.registry.get_mut(&result.uid) {
                        site.injections = records;
                        site.finished = true;
                    }
                }
                Err(err) => {
                    if fatal.is_none() {
                        fatal = Some(err);
                        cancel.store(true, Ordering::SeqCst);
                    }
                }
            }
        });

        if let Some(err) = fatal {
            return Err(err);
        }
        if outcome == DrainOutcome::Cancelled {
            self.interrupted = true;
        }
        info!(
            "injection phase done ({done} sites, {} finished)",
            self.registry.values().filter(|s| s.finished).count()
        );
        Ok(())
    }

    /// The injection plan for one hit site: every supported canonical kind
    /// once (first kind only in lite mode), then random-width bit-flips up
    /// to the site's unit budget.
    fn plan_injections(&mut self, uid: &str) -> Result<Vec<Testcase>, CampaignError> {
        let (function, pc, unit) = match self.registry.get(uid) {
            Some(site) => match &site.unit {
                Some(unit) => (site.function.clone(), site.pc, unit.clone()),
                None => return Ok(Vec::new()),
            },
            None => return Ok(Vec::new()),
        };

        let budget = unit
            .unit_kind()
            .and_then(|kind| self.budgets.get(&kind).copied())
            .unwrap_or(0);

        let mut kinds: Vec<FaultKind> = self.ctx.test_def.fault_kinds.clone();
        if self.config.mode == TestMode::Lite {
            kinds.truncate(1);
        }

        let mut testcases = Vec::new();
        for kind in &kinds {
            let tag = format!(
                "injection|{function}|{pc}|{kind}|{}|{}",
                unit.unit, unit.instr_kind
            );
            testcases.push(self.injection_testcase(&tag, &function, pc, *kind)?);
        }

        if self.config.mode == TestMode::Full {
            let extra = (budget as usize).saturating_sub(kinds.len());
            for repeat in 0..extra {
                let tag = format!(
                    "injection|{function}|{pc}|{}|{repeat}|{}|{}",
                    FaultKind::BitflipRandom,
                    unit.unit,
                    unit.instr_kind
                );
                testcases.push(self.injection_testcase(
                    &tag,
                    &function,
                    pc,
                    FaultKind::BitflipRandom,
                )?);
            }
        }

        debug!("site {uid}: planned {} injections (budget {budget})", testcases.len());
        Ok(testcases)
    }

    fn injection_testcase(
        &mut self,
        tag: &str,
        function: &str,
        pc: u32,
        kind: FaultKind,
    ) -> Result<Testcase, CampaignError> {
        let spec = FaultSpec::Injection {
            function: function.to_string(),
            pc,
            kind,
        };
        Testcase::new(
            tag,
            &spec,
            self.slots.acquire(),
            self.test_dir.join(tag),
            self.ctx.clone(),
            &mut self.rng,
        )
    }

    fn build_report(&self) -> CampaignReport {
        CampaignReport {
            tag: self.config.tag.clone(),
            seed: self.seed,
            sites: self.registry.len(),
            eligible: self.registry.values().filter(|s| s.unit.is_some()).count(),
            hit: self.registry.values().filter(|s| s.hit).count(),
            finished: self.registry.values().filter(|s| s.finished).count(),
            injections: self
                .registry
                .values()
                .filter(|s| s.finished)
                .map(|s| s.injections.len())
                .sum(),
            verdicts: report::verdict_tallies(&self.registry),
            interrupted: self.interrupted,
        }
    }
}

/// Run a testcase, degrading infrastructure errors to an `Unknown` outcome.
/// Run-time trouble is data, not a reason to abort the campaign.
fn run_or_unknown(testcase: &mut Testcase) -> OutcomeRecord {
    match testcase.test() {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("testcase {}: run infrastructure error: {err}", testcase.tag());
            OutcomeRecord {
                outcome: RunOutcome::Unknown,
                data: OutcomeData {
                    rc: 0,
                    out: Vec::new(),
                    err: vec![err.to_string()],
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdef::{BuildDef, RunDef};

    /// A stub instrumented tree.  The build script reads the work mode from
    /// the descriptor and emits the matching toolchain markers; the produced
    /// binary traps in profile mode and prints a detection marker in
    /// injection mode.
    fn stub_template() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"#!/bin/sh
mkdir -p build
wm=$(grep -o '"workmode": *"[a-z]*"' "$FJ_CONFIG" | grep -o '[a-z]*"$' | tr -d '"')
case "$wm" in
inspect)
    echo 'Current Machine Function: _ZN3app3addEv  [Real: app::add()]'
    echo '[Inst.0]: $xmm0 = ADDSDrr $xmm0, $xmm1'
    echo '[Inst.1]: RET64'
    printf '#!/bin/sh\nexit 0\n' > build/app
    ;;
profile)
    echo '[FaultInject] Inst.0: $xmm0 = ADDSDrr $xmm0, $xmm1'
    echo '[FaultInfo]: fpu calc ADDSDrr'
    printf '#!/bin/sh\nkill -TRAP $$\n' > build/app
    ;;
injection)
    echo '[FaultInfo]: fpu calc ADDSDrr'
    printf '#!/bin/sh\necho Validation Failed\nexit 0\n' > build/app
    ;;
esac
chmod +x build/app
"#;
        std::fs::write(dir.path().join("build.sh"), script).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                dir.path().join("build.sh"),
                std::fs::Permissions::from_mode(0o755),
            )
            .unwrap();
        }
        dir
    }

    fn test_def(template: &std::path::Path) -> Arc<TestDefinition> {
        Arc::new(TestDefinition {
            fault_kinds: vec![FaultKind::Nop, FaultKind::Bitflip1],
            build: BuildDef {
                script: template.join("build.sh").to_string_lossy().into_owned(),
                binary: "build/app".to_string(),
            },
            run: RunDef {
                cmd: vec!["./app".to_string()],
            },
        })
    }

    fn config(template: &std::path::Path, work: &std::path::Path) -> CampaignConfig {
        CampaignConfig {
            tag: "test-campaign".to_string(),
            app: "stub".to_string(),
            variant: "orthrus".to_string(),
            template_dir: template.to_path_buf(),
            work_dir: work.join("work"),
            output: work.join("output.json"),
            state_dir: work.join("state"),
            build_jobs: 2,
            test_jobs: 4,
            run_timeout: Duration::from_secs(30),
            seed: Some(42),
            ..Default::default()
        }
    }

    #[cfg(unix)]
    #[test]
    fn full_pipeline_classifies_detected_faults() {
        let template = stub_template();
        let work = tempfile::tempdir().unwrap();

        let mut campaign = Campaign::new(
            config(template.path(), work.path()),
            test_def(template.path()),
        )
        .unwrap();
        let report = campaign.run().unwrap();

        assert_eq!(report.sites, 2);
        assert_eq!(report.eligible, 2);
        assert_eq!(report.hit, 2);
        assert_eq!(report.finished, 2);
        assert!(!report.interrupted);

        // fpu tally = 2 hits; baseline = 8; budget = round(8*0.25/2*5) = 5.
        // Two canonical kinds + three random-width flips per site.
        assert_eq!(report.injections, 10);
        assert_eq!(report.verdicts["SCEE_Detected"], 10);

        let results = crate::report::load_results(&work.path().join("output.json")).unwrap();
        assert_eq!(results.len(), 2);
        let site = &results["fn(_ZN3app3addEv)|pc(0)"];
        assert_eq!(site.profile, "SigTrap");
        assert_eq!(site.injection.len(), 5);
        assert!(site
            .injection
            .iter()
            .all(|inj| inj.result.outcome == faultsweep_fault::RunOutcome::ErrorDetected));
        // The exact descriptor each injection was built with rides along.
        assert_eq!(site.injection[0].fj_conf.workmode, "injection");
    }

    #[cfg(unix)]
    #[test]
    fn cancelled_campaign_writes_only_finished_sites() {
        let template = stub_template();
        let work = tempfile::tempdir().unwrap();

        let mut campaign = Campaign::new(
            config(template.path(), work.path()),
            test_def(template.path()),
        )
        .unwrap();
        campaign.cancel_flag().store(true, Ordering::SeqCst);
        let report = campaign.run().unwrap();

        assert!(report.interrupted);
        assert_eq!(report.finished, 0);

        let results = crate::report::load_results(&work.path().join("output.json")).unwrap();
        assert!(results.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn lite_mode_plans_one_canonical_injection_per_site() {
        let template = stub_template();
        let work = tempfile::tempdir().unwrap();

        let mut cfg = config(template.path(), work.path());
        cfg.mode = TestMode::Lite;
        cfg.lite_sample = 2;
        // Both sites must finish: with a tail of 1 the drain only abandons
        // the final straggler, which here completes anyway.
        cfg.lite_tail = 1;

        let mut campaign = Campaign::new(cfg, test_def(template.path())).unwrap();
        let report = campaign.run().unwrap();

        assert!(report.finished >= 1);
        let results = crate::report::load_results(&work.path().join("output.json")).unwrap();
        for site in results.values() {
            assert_eq!(site.injection.len(), 1);
            assert!(site.injection[0].name.contains("|nop|"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn second_run_reuses_cached_inspect_and_artifacts() {
        let template = stub_template();
        let work = tempfile::tempdir().unwrap();

        let mut first = Campaign::new(
            config(template.path(), work.path()),
            test_def(template.path()),
        )
        .unwrap();
        let a = first.run().unwrap();

        let mut second = Campaign::new(
            config(template.path(), work.path()),
            test_def(template.path()),
        )
        .unwrap();
        let b = second.run().unwrap();

        assert_eq!(a.sites, b.sites);
        assert_eq!(a.injections, b.injections);
        assert_eq!(a.verdicts, b.verdicts);
    }

    #[cfg(unix)]
    #[test]
    fn failing_build_aborts_the_campaign() {
        let template = stub_template();
        // Sabotage the build script after writing it.
        std::fs::write(template.path().join("build.sh"), "#!/bin/sh\nexit 7\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                template.path().join("build.sh"),
                std::fs::Permissions::from_mode(0o755),
            )
            .unwrap();
        }
        let work = tempfile::tempdir().unwrap();

        let mut campaign = Campaign::new(
            config(template.path(), work.path()),
            test_def(template.path()),
        )
        .unwrap();
        match campaign.run() {
            Err(CampaignError::BuildFailed { rc, .. }) => assert_eq!(rc, 7),
            other => panic!("expected BuildFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn inspect_eligible_honors_filters() {
        let template = stub_template();
        let work = tempfile::tempdir().unwrap();

        let mut cfg = config(template.path(), work.path());
        cfg.allow_patterns = vec![".*no_such_function.*".to_string()];

        let mut campaign = Campaign::new(cfg, test_def(template.path())).unwrap();
        let eligible = campaign.inspect_eligible().unwrap();
        assert!(eligible.is_empty());

        let report = campaign.run().unwrap();
        assert_eq!(report.sites, 0);
    }
}
