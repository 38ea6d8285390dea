//! Per-application test definitions.
//!
//! A [`TestDefinition`] tells the campaign how to build and run one
//! instrumented application: which script produces the binary, where the
//! binary lands relative to the build directory, and which fault kinds the
//! application supports.  Definitions are immutable after load.
//!
//! Definitions come from a JSON manifest keyed by application name:
//!
//! ```json
//! {
//!   "wordcount": {
//!     "build": { "script": "build.wc.sh", "binary": "build/word_count/wc" },
//!     "run": { "cmd": ["./wc", "-i", "corpus/example.txt"] }
//!   }
//! }
//! ```
//!
//! `fault_kinds` defaults to the canonical seven when omitted.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use faultsweep_fault::{FaultKind, CANONICAL_FAULT_KINDS};

use crate::CampaignError;

/// How to build the instrumented binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDef {
    /// Build script, absolute or relative to the campaign's working
    /// directory at launch.
    pub script: String,
    /// Path of the produced binary, relative to the build slot.
    pub binary: String,
}

/// How to run the built binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDef {
    /// Command line; `cmd[0]` is resolved relative to the testcase's output
    /// directory, where the binary was moved after the build.
    pub cmd: Vec<String>,
}

/// Static descriptor for one application under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDefinition {
    #[serde(default = "canonical_kinds")]
    pub fault_kinds: Vec<FaultKind>,
    pub build: BuildDef,
    pub run: RunDef,
}

fn canonical_kinds() -> Vec<FaultKind> {
    CANONICAL_FAULT_KINDS.to_vec()
}

/// Load the manifest and look up one application.
pub fn load_definition(manifest: &Path, app: &str) -> Result<Arc<TestDefinition>, CampaignError> {
    let defs = load_manifest(manifest)?;
    defs.get(app)
        .cloned()
        .ok_or_else(|| CampaignError::UnknownApp(app.to_string()))
}

/// Load the whole manifest.
pub fn load_manifest(
    manifest: &Path,
) -> Result<BTreeMap<String, Arc<TestDefinition>>, CampaignError> {
    let text = std::fs::read_to_string(manifest)?;
    let defs: BTreeMap<String, TestDefinition> = serde_json::from_str(&text)?;
    Ok(defs.into_iter().map(|(k, v)| (k, Arc::new(v))).collect())
}
