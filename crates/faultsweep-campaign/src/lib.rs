//! Campaign orchestration engine for faultsweep.
//!
//! Drives large fault-injection campaigns against instrumented binaries and
//! decides whether the corruption detector under test catches the injected
//! faults.  The pipeline is fixed at three phases:
//!
//! ```text
//! 0. inspect  : build once in inspect mode, parse the instruction dump,
//!               filter functions, register every eligible site
//! 1. prepare  : one profile testcase per site, built on the slot pool
//! 2. profile  : run the no-op probes; a site is "hit" iff it traps;
//!               derive per-unit injection budgets from the hit tally
//! 3. inject   : per hit site: every canonical fault kind once, then
//!               random-width bit-flips up to the unit's budget
//! ```
//!
//! Workers are plain threads behind task/result channels; the campaign
//! coordinator is the only owner of the site registry, so results flow back
//! as messages and never through shared memory.  Builds serialize per slot,
//! run up to the pool width in parallel, and cache by each testcase's stable
//! output directory.  External process failures at run time are classified
//! outcomes; a failed instrumentation *build* aborts the whole campaign.
//!
//! # Module Structure
//!
//! - [`slots`]: fixed pool of build directories with per-slot mutexes
//! - [`testdef`]: per-application build/run definitions (JSON manifest)
//! - [`runner`]: bounded external process execution
//! - [`testcase`]: build/run unit with on-disk caching
//! - [`markers`]: instruction-dump parsing and function filters
//! - [`sampling`]: adaptive per-unit injection budgets
//! - [`pool`]: bounded worker pool with early-stop draining
//! - [`site`]: site registry entries
//! - [`campaign`]: the three-phase scheduler
//! - [`report`]: result persistence and the human summary

pub mod campaign;
pub mod markers;
pub mod pool;
pub mod report;
pub mod runner;
pub mod sampling;
pub mod site;
pub mod slots;
pub mod testcase;
pub mod testdef;

use std::path::PathBuf;

use thiserror::Error;

pub use campaign::{Campaign, CampaignConfig, CampaignReport, TestMode};
pub use site::{site_uid, InjectionRecord, SiteInfo};
pub use testcase::{Testcase, TestcaseContext};

/// Errors that abort a campaign.
///
/// Run-time process failures never appear here; they are classified into
/// outcomes.  These variants are reserved for broken infrastructure: a
/// failing instrumentation build, unusable configuration, or I/O trouble
/// outside the cached-artifact paths (those fall back to a rebuild).
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("instrumentation build failed for testcase {tag} (rc={rc})")]
    BuildFailed { tag: String, rc: i32 },

    #[error("testcase {0} was tested before being built")]
    NotBuilt(String),

    #[error("no test definition for application '{0}'")]
    UnknownApp(String),

    #[error("no sampling baseline at {path:?}; run a computational campaign for this app first")]
    MissingBaseline { path: PathBuf },

    #[error("invalid filter pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("result persistence error: {0}")]
    Persist(#[from] crate::report::PersistError),
}
