//! Process outcome classification.
//!
//! Two steps, in precedence order:
//!
//! 1. Coarse mapping of the raw return code to a [`RunOutcome`].  The runner
//!    reports a terminating signal `N` as `-N`, so the interesting faults
//!    (trap, segfault, FP exception, abort) arrive as small negatives.
//! 2. A textual override scan of stdout then stderr.  A detector can recover
//!    from a corruption and exit 0 while logging what actually happened, so
//!    the markers win over the exit status.  First matching line wins.

use std::fmt;

use serde::{Deserialize, Serialize};

use faultsweep_protocol::{
    MARKER_ERROR_NOT_DETECTED, MARKER_TEST_PASSED, MARKER_VALIDATION_FAILED,
};

/// Return code the runner synthesizes when a run exceeds its wall-clock
/// timeout.
pub const TIMEOUT_RETCODE: i32 = -4;

/// Classified result of one external run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Exit 0, or a "Test Passed" marker.
    Success,
    /// SIGTRAP; the probed site executed.
    SigTrap,
    /// "Validation Failed" marker; the detector caught the corruption.
    ErrorDetected,
    /// "Error Not Detected" marker; wrong output, detector silent.
    TestFailed,
    /// Wall-clock timeout.
    Timeout,
    /// SIGSEGV.
    SegmentFault,
    /// SIGFPE.
    FPError,
    /// SIGABRT.
    Abort,
    /// SIGTERM.
    Terminate,
    /// Any other nonzero exit.
    UnknownRetcode,
    /// Classification fell through (only via the verdict automaton).
    Unknown,
    /// Run never happened or does not apply (e.g. no mask run).
    Ignored,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A classified run plus the raw evidence it was classified from.
///
/// Serializes as `{"error": ..., "data": {...}}`, the shape the campaign
/// result file persists per injection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    #[serde(rename = "error")]
    pub outcome: RunOutcome,
    pub data: OutcomeData,
}

/// Raw evidence behind an [`OutcomeRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeData {
    pub rc: i32,
    pub out: Vec<String>,
    pub err: Vec<String>,
}

impl OutcomeRecord {
    /// A record for a run that never happened.
    pub fn ignored() -> Self {
        Self {
            outcome: RunOutcome::Ignored,
            data: OutcomeData {
                rc: 0,
                out: Vec::new(),
                err: Vec::new(),
            },
        }
    }
}

/// Step 1: coarse exit-status mapping.
pub fn classify_exit(rc: i32) -> RunOutcome {
    match rc {
        0 => RunOutcome::Success,
        -5 => RunOutcome::SigTrap,
        TIMEOUT_RETCODE => RunOutcome::Timeout,
        -11 => RunOutcome::SegmentFault,
        -8 => RunOutcome::FPError,
        -6 => RunOutcome::Abort,
        -15 => RunOutcome::Terminate,
        _ => RunOutcome::UnknownRetcode,
    }
}

/// Full classification: exit mapping, then the marker override scan.
pub fn classify_run(rc: i32, stdout: &str, stderr: &str) -> OutcomeRecord {
    let out: Vec<String> = stdout.lines().map(str::to_string).collect();
    let err: Vec<String> = stderr.lines().map(str::to_string).collect();

    let mut outcome = classify_exit(rc);

    'scan: for line in out.iter().chain(err.iter()) {
        let lower = line.to_ascii_lowercase();
        for (marker, forced) in [
            (MARKER_ERROR_NOT_DETECTED, RunOutcome::TestFailed),
            (MARKER_VALIDATION_FAILED, RunOutcome::ErrorDetected),
            (MARKER_TEST_PASSED, RunOutcome::Success),
        ] {
            if lower.contains(&marker.to_ascii_lowercase()) {
                outcome = forced;
                break 'scan;
            }
        }
    }

    OutcomeRecord {
        outcome,
        data: OutcomeData { rc, out, err },
    }
}
