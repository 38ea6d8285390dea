//! Campaign result persistence and the human-readable summary.
//!
//! The result file is a JSON map from site id to the site's profile outcome
//! and its classified injections.  Only sites whose finished flag is set are
//! written; a site is either fully present or absent, never partial.  The
//! writer runs on interruption as well as on normal completion, so it is
//! deliberately dependency-free and cheap.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

use faultsweep_fault::{OutcomeRecord, SceeVerdict};
use faultsweep_protocol::FaultDescriptor;

use crate::site::SiteInfo;

/// Errors from result persistence.
#[derive(Debug, Snafu)]
pub enum PersistError {
    #[snafu(display("I/O error"), context(false))]
    Io { source: std::io::Error },

    #[snafu(display("JSON error"), context(false))]
    Json { source: serde_json::Error },
}

/// Persisted record of one site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteReport {
    /// Profile outcome name, e.g. `SigTrap`.
    pub profile: String,
    pub injection: Vec<InjectionReport>,
}

/// Persisted record of one injection at a site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionReport {
    pub name: String,
    pub result: OutcomeRecord,
    pub fj_conf: FaultDescriptor,
}

/// Build the persistable map from the registry: finished sites only.
pub fn collect_results(registry: &BTreeMap<String, SiteInfo>) -> BTreeMap<String, SiteReport> {
    registry
        .iter()
        .filter(|(_, site)| site.finished)
        .map(|(uid, site)| {
            let injection = site
                .injections
                .iter()
                .map(|record| InjectionReport {
                    name: record.name.clone(),
                    result: record.outcome.clone(),
                    fj_conf: record.descriptor.clone(),
                })
                .collect();
            (
                uid.clone(),
                SiteReport {
                    profile: site.profile_result().to_string(),
                    injection,
                },
            )
        })
        .collect()
}

/// Write the result map for every finished site to `path`.
pub fn write_results(
    path: &Path,
    registry: &BTreeMap<String, SiteInfo>,
) -> Result<(), PersistError> {
    let map = collect_results(registry);
    let json = serde_json::to_string_pretty(&map)?;
    fs::write(path, json)?;
    Ok(())
}

/// Load a previously written result map (used by tooling and tests).
pub fn load_results(path: &Path) -> Result<BTreeMap<String, SiteReport>, PersistError> {
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

/// Per-verdict tallies over every finished injection in the registry.
pub fn verdict_tallies(registry: &BTreeMap<String, SiteInfo>) -> BTreeMap<String, usize> {
    let mut tallies: BTreeMap<String, usize> = BTreeMap::new();
    for site in registry.values().filter(|site| site.finished) {
        let profile = site.profile_result();
        for injection in &site.injections {
            *tallies.entry(injection.verdict(profile).to_string()).or_default() += 1;
        }
    }
    tallies
}

/// Format the end-of-campaign summary for human consumption.
pub fn format_summary(tag: &str, registry: &BTreeMap<String, SiteInfo>) -> String {
    let total = registry.len();
    let eligible = registry.values().filter(|s| s.unit.is_some()).count();
    let profiled = registry.values().filter(|s| s.profile_outcome.is_some()).count();
    let hit = registry.values().filter(|s| s.hit).count();
    let finished = registry.values().filter(|s| s.finished).count();
    let injections: usize = registry
        .values()
        .filter(|s| s.finished)
        .map(|s| s.injections.len())
        .sum();

    let mut output = String::new();
    output.push_str("═══════════════════════════════════════════════════════════════════════\n");
    output.push_str(&format!("  faultsweep campaign: {tag}\n"));
    output.push_str("═══════════════════════════════════════════════════════════════════════\n\n");

    output.push_str(&format!("Registered sites:       {total}\n"));
    output.push_str(&format!("Eligible (unit known):  {eligible}\n"));
    output.push_str(&format!("Profiled:               {profiled}\n"));
    output.push_str(&format!("Hit (probe trapped):    {hit}\n"));
    output.push_str(&format!("Finished:               {finished}\n"));
    output.push_str(&format!("Injections classified:  {injections}\n"));
    output.push('\n');

    let tallies = verdict_tallies(registry);
    if tallies.is_empty() {
        output.push_str("─── No Verdicts ───────────────────────────────────────────────────────\n");
        output.push_str("No finished injections to evaluate.\n");
    } else {
        output.push_str("─── Verdicts ──────────────────────────────────────────────────────────\n");
        // Stable display order, interesting verdicts first.
        for verdict in [
            SceeVerdict::Detected,
            SceeVerdict::DetectedNonFatal,
            SceeVerdict::NotDetected,
            SceeVerdict::NoneScee,
            SceeVerdict::NotExecuted,
            SceeVerdict::Unknown,
        ] {
            let name = verdict.to_string();
            if let Some(count) = tallies.get(&name) {
                output.push_str(&format!("{name:<24}{count}\n"));
            }
        }
    }

    output.push_str("\n═══════════════════════════════════════════════════════════════════════\n");
    output
}
