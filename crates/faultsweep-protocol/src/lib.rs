//! Contract between faultsweep and the instrumentation toolchain.
//!
//! The build toolchain that produces instrumented binaries is a black box to
//! the campaign engine.  Everything the two sides agree on lives here:
//!
//! 1. The **fault descriptor** JSON file, written by the engine before every
//!    build and read by the instrumentation pass.  Its path is handed to the
//!    build and run steps via [`ENV_FAULT_CONFIG`].
//! 2. The **environment variables** consumed by the build/run scripts.
//! 3. The **textual markers** the instrumented toolchain and binaries emit on
//!    stdout/stderr, which the engine parses to discover injection sites and
//!    to override exit-code classification.
//!
//! The descriptor layout is fixed by the instrumentation pass; fields that the
//! engine never populates (match/select modes, per-fault instruction filters)
//! are still serialized so the pass sees the shape it expects.

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════
//  Environment variables
// ═══════════════════════════════════════════════════════════════════════

/// Path of the fault descriptor file, exported to build and run commands.
pub const ENV_FAULT_CONFIG: &str = "FJ_CONFIG";

/// Debug-mode flag understood by the instrumented runtime ("ON" enables it).
pub const ENV_DEBUG: &str = "KDEBUG";

/// C compiler override consumed by the build scripts.
pub const ENV_CC: &str = "CC";

/// C++ compiler override consumed by the build scripts.
pub const ENV_CXX: &str = "CXX";

// ═══════════════════════════════════════════════════════════════════════
//  Run-time markers
// ═══════════════════════════════════════════════════════════════════════
//
// Matched case-insensitively as substrings of stdout/stderr lines.  A
// detector may recover from a corruption and exit 0 while logging one of
// these, so they take precedence over the raw exit status.

/// The workload detected that its output is wrong (detector missed).
pub const MARKER_ERROR_NOT_DETECTED: &str = "Error Not Detected";

/// The detector caught the corruption.
pub const MARKER_VALIDATION_FAILED: &str = "Validation Failed";

/// The workload finished and its output checks out.
pub const MARKER_TEST_PASSED: &str = "Test Passed";

// ═══════════════════════════════════════════════════════════════════════
//  Build-time markers
// ═══════════════════════════════════════════════════════════════════════

/// Inspect-mode dump: starts a per-function instruction listing.
/// `Current Machine Function: <name> [Real: <demangled>]` (suffix optional).
pub const MARKER_MACHINE_FUNCTION: &str = "Current Machine Function:";

/// Inspect-mode dump: one instruction, `[Inst.<n>]: <text>`.
pub const MARKER_INST: &str = "[Inst.";

/// Profile-mode dump: a statically injectable site, `[FaultInject] Inst.<n>: <text>`.
pub const MARKER_FAULT_INJECT: &str = "[FaultInject]";

/// Profile-mode dump: runtime hardware unit of the instrumented instruction,
/// `[FaultInfo]: <unit> <instr-kind> [<instr-name>]`.
pub const MARKER_FAULT_INFO: &str = "[FaultInfo]:";

/// Wildcard target accepted by the instrumentation pass in inspect mode.
pub const WILDCARD_FUNCTION: &str = "*";

// ═══════════════════════════════════════════════════════════════════════
//  Fault descriptor wire format
// ═══════════════════════════════════════════════════════════════════════

/// Top-level fault descriptor, serialized to the file named by
/// [`ENV_FAULT_CONFIG`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultDescriptor {
    /// One of `inspect`, `profile`, `injection`.
    pub workmode: String,
    pub profiles: Vec<FaultProfile>,
    /// Global instruction allow-list (unused by the engine, kept for shape).
    #[serde(default)]
    pub insts_only: Vec<String>,
    /// Global instruction deny-list (unused by the engine, kept for shape).
    #[serde(default)]
    pub insts_ignore: Vec<String>,
}

/// Per-target profile inside a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultProfile {
    pub name: String,
    #[serde(default)]
    pub match_mode: Vec<String>,
    /// Target function name, or [`WILDCARD_FUNCTION`] in inspect mode.
    pub function: String,
    pub select_mode: String,
    pub faults: Vec<FaultEntry>,
}

/// A single fault to plant at one or more instruction indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultEntry {
    /// Advisory unit label; the pass derives the real unit itself.
    pub inject_type: String,
    pub category: String,
    pub repeat_count: u32,
    /// Fault kind as the pass spells it (`nop`, `bitflip`, `stuck_at_0`, ...).
    pub types: String,
    /// Instruction indices within the target function's listing.
    pub pc: Vec<u32>,
    /// Kind-specific options; for `bitflip`: `[width, contiguous]`.
    pub options: Vec<u32>,
    #[serde(default)]
    pub insts_only: Vec<String>,
    #[serde(default)]
    pub insts_ignore: Vec<String>,
}

impl FaultProfile {
    /// An empty profile targeting `function`, ready for fault entries.
    pub fn targeting(function: impl Into<String>) -> Self {
        Self {
            name: "faultsweep".to_string(),
            match_mode: Vec::new(),
            function: function.into(),
            select_mode: "all".to_string(),
            faults: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_serializes_with_expected_keys() {
        let desc = FaultDescriptor {
            workmode: "injection".to_string(),
            profiles: vec![FaultProfile {
                faults: vec![FaultEntry {
                    inject_type: "fpu".to_string(),
                    category: "computational".to_string(),
                    repeat_count: 1,
                    types: "bitflip".to_string(),
                    pc: vec![12],
                    options: vec![2, 1],
                    insts_only: Vec::new(),
                    insts_ignore: Vec::new(),
                }],
                ..FaultProfile::targeting("_ZN3app4mainEv")
            }],
            insts_only: Vec::new(),
            insts_ignore: Vec::new(),
        };

        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["workmode"], "injection");
        assert_eq!(json["profiles"][0]["function"], "_ZN3app4mainEv");
        assert_eq!(json["profiles"][0]["select_mode"], "all");
        assert_eq!(json["profiles"][0]["faults"][0]["types"], "bitflip");
        assert_eq!(json["profiles"][0]["faults"][0]["pc"][0], 12);
        assert_eq!(json["profiles"][0]["faults"][0]["options"][1], 1);
    }

    #[test]
    fn descriptor_roundtrips() {
        let desc = FaultDescriptor {
            workmode: "inspect".to_string(),
            profiles: vec![FaultProfile::targeting(WILDCARD_FUNCTION)],
            insts_only: Vec::new(),
            insts_ignore: Vec::new(),
        };

        let json = serde_json::to_string(&desc).unwrap();
        let back: FaultDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(desc, back);
    }

    #[test]
    fn optional_lists_default_to_empty() {
        let json = r#"{
            "workmode": "profile",
            "profiles": [{
                "name": "p",
                "function": "f",
                "select_mode": "all",
                "faults": []
            }]
        }"#;
        let desc: FaultDescriptor = serde_json::from_str(json).unwrap();
        assert!(desc.insts_only.is_empty());
        assert!(desc.profiles[0].match_mode.is_empty());
    }
}
