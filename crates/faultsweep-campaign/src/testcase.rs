//! Testcase lifecycle: build on a slot, run from a stable directory, cache
//! both steps on disk.
//!
//! A testcase's identity is its tag (site + phase + fault kind), and its
//! cache key is the stable output directory derived from that tag.  Cache
//! probing is by artifact presence, not by descriptor content; a descriptor
//! change under an existing tag serves the stale artifact.  Campaigns get a
//! fresh tree per campaign tag, which is what keeps this honest in practice.
//!
//! `build()` is campaign-fatal on a non-zero exit: a broken instrumentation
//! build means every later result would be noise.  `test()` never fails on
//! the child's behavior; crashes and timeouts are classified outcomes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use rand_chacha::ChaCha8Rng;

use faultsweep_fault::{classify_run, Category, FaultSpec, OutcomeRecord};
use faultsweep_protocol::{FaultDescriptor, ENV_DEBUG, ENV_FAULT_CONFIG};

use crate::runner::{run_command, RunRecord};
use crate::slots::BuildSlot;
use crate::testdef::TestDefinition;
use crate::CampaignError;

/// Build manifest cached in the stable output directory.
const BUILD_MANIFEST: &str = "build-output.json";
/// Classified run record cached in the stable output directory.
const RUN_RECORD: &str = "test-output.json";
/// Descriptor file name, both in the slot (for the build) and in the stable
/// directory (for the run).
const DESCRIPTOR_FILE: &str = "config.json";

/// Shared construction context: everything identical across the testcases of
/// one campaign.
#[derive(Clone)]
pub struct TestcaseContext {
    pub category: Category,
    pub test_def: Arc<TestDefinition>,
    /// Environment overrides merged over the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Wall-clock bound per external invocation.
    pub timeout: Duration,
}

/// One build/run unit.
pub struct Testcase {
    tag: String,
    descriptor: FaultDescriptor,
    slot: Arc<BuildSlot>,
    out_dir: PathBuf,
    ctx: TestcaseContext,
    built: bool,
    finished: bool,
}

impl Testcase {
    /// Create a testcase for `spec`, drawing any random descriptor options
    /// (the random bit-flip width) from `rng` now, so the descriptor is
    /// final from this point on.
    pub fn new(
        tag: impl Into<String>,
        spec: &FaultSpec,
        slot: Arc<BuildSlot>,
        out_dir: PathBuf,
        ctx: TestcaseContext,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self, CampaignError> {
        std::fs::create_dir_all(&out_dir)?;
        let descriptor = spec.descriptor(ctx.category, rng);
        Ok(Self {
            tag: tag.into(),
            descriptor,
            slot,
            out_dir,
            ctx,
            built: false,
            finished: false,
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn descriptor(&self) -> &FaultDescriptor {
        &self.descriptor
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// File name of the produced binary.
    fn binary_name(&self) -> String {
        Path::new(&self.ctx.test_def.build.binary)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.ctx.test_def.build.binary.clone())
    }

    /// Build the instrumented binary for this testcase.
    ///
    /// Holds the slot mutex for the whole step.  Idempotent: when the stable
    /// directory already holds the binary and a readable manifest, the cached
    /// record is returned without invoking the build; an unreadable manifest
    /// triggers a transparent rebuild.
    pub fn build(&mut self) -> Result<RunRecord, CampaignError> {
        let _dir = self.slot.acquire_dir();

        let stable_binary = self.out_dir.join(self.binary_name());
        let manifest = self.out_dir.join(BUILD_MANIFEST);

        if stable_binary.exists() && manifest.exists() {
            match read_json::<RunRecord>(&manifest) {
                Ok(record) => {
                    debug!("testcase {}: build cached, bypassing", self.tag);
                    self.built = true;
                    return Ok(record);
                }
                Err(err) => {
                    warn!("testcase {}: cached build manifest unreadable ({err}), rebuilding", self.tag);
                }
            }
        }

        let slot_descriptor = self.slot.dir().join(DESCRIPTOR_FILE);
        write_json(&slot_descriptor, &self.descriptor)?;

        let script = resolve_script(&self.ctx.test_def.build.script);
        let env = self.run_env(&slot_descriptor);

        let record = run_command(
            &[script.to_string_lossy().into_owned()],
            self.slot.dir(),
            &env,
            self.ctx.timeout,
        )?;

        if record.retcode != 0 {
            error!("testcase {}: instrumentation build failed (rc={})", self.tag, record.retcode);
            error!("  slot: {}", self.slot.dir().display());
            error!(
                "  descriptor: {}",
                serde_json::to_string(&self.descriptor).unwrap_or_default()
            );
            error!("  stdout:\n{}", record.stdout);
            error!("  stderr:\n{}", record.stderr);
            return Err(CampaignError::BuildFailed {
                tag: self.tag.clone(),
                rc: record.retcode,
            });
        }

        write_json(&manifest, &record)?;

        // Decouple the artifacts from slot reuse: the binary and the exact
        // descriptor it was built with move to the stable directory.
        let built_binary = self.slot.dir().join(&self.ctx.test_def.build.binary);
        move_file(&built_binary, &stable_binary)?;
        move_file(&slot_descriptor, &self.out_dir.join(DESCRIPTOR_FILE))?;

        debug!("testcase {}: built into {}", self.tag, self.out_dir.display());
        self.built = true;
        Ok(record)
    }

    /// Run the built binary and classify the outcome.
    ///
    /// Idempotent: a readable cached run record is returned unchanged; a
    /// corrupted one triggers a rerun.  Calling before `build()` is a
    /// contract violation.
    pub fn test(&mut self) -> Result<OutcomeRecord, CampaignError> {
        if !self.built {
            return Err(CampaignError::NotBuilt(self.tag.clone()));
        }

        let record_path = self.out_dir.join(RUN_RECORD);
        if record_path.exists() {
            match read_json::<OutcomeRecord>(&record_path) {
                Ok(record) => {
                    debug!("testcase {}: run cached, bypassing", self.tag);
                    self.finished = true;
                    return Ok(record);
                }
                Err(err) => {
                    warn!("testcase {}: cached run record unreadable ({err}), rerunning", self.tag);
                }
            }
        }

        let descriptor = self.out_dir.join(DESCRIPTOR_FILE);
        let env = self.run_env(&descriptor);

        let record = run_command(
            &self.ctx.test_def.run.cmd,
            &self.out_dir,
            &env,
            self.ctx.timeout,
        )?;
        info!("testcase {}: run result rc={}", self.tag, record.retcode);

        let outcome = classify_run(record.retcode, &record.stdout, &record.stderr);
        write_json(&record_path, &outcome)?;

        self.finished = true;
        Ok(outcome)
    }

    fn run_env(&self, descriptor: &Path) -> BTreeMap<String, String> {
        let mut env = self.ctx.env.clone();
        env.insert(ENV_DEBUG.to_string(), "ON".to_string());
        env.insert(
            ENV_FAULT_CONFIG.to_string(),
            descriptor.to_string_lossy().into_owned(),
        );
        env
    }
}

/// Build scripts are looked up relative to the campaign's launch directory.
fn resolve_script(script: &str) -> PathBuf {
    let path = Path::new(script);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CampaignError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), CampaignError> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text)?;
    Ok(())
}

/// `rename` with a copy+remove fallback for cross-filesystem moves.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to)?;
    std::fs::remove_file(from)
}
