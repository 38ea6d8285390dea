//! Detection-verdict automaton.
//!
//! Folds a (profile, injection, mask) outcome triple into a single verdict
//! about the corruption detector.  The profile run answers "was the site
//! reached at all", the injection run answers "what happened with a real
//! fault", and the optional mask run (detection logic disabled) separates
//! fatal from non-fatal detections.
//!
//! Total over all inputs: combinations outside the table degrade to
//! [`SceeVerdict::Unknown`] with a warning, never a panic or an error.

use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::classify::RunOutcome;

/// Verdict on whether a silent-corruption-class fault was caught.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SceeVerdict {
    /// The profile run never reached the site; nothing to evaluate.
    #[serde(rename = "NotExecuted")]
    NotExecuted,
    /// The detector caught the fault and stopped the run.
    #[serde(rename = "SCEE_Detected")]
    Detected,
    /// The detector caught the fault, and the masked run finished cleanly.
    #[serde(rename = "SCEE_Detected_NonFatal")]
    DetectedNonFatal,
    /// The output went wrong and the detector stayed silent.
    #[serde(rename = "SCEE_Not_Detected")]
    NotDetected,
    /// The fault escaped the detector's scope via crash or hang.
    #[serde(rename = "NoneSCEE")]
    NoneScee,
    /// Undecided: fault silently absorbed, or a table miss.
    #[serde(rename = "Unknown")]
    Unknown,
}

impl fmt::Display for SceeVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SceeVerdict::NotExecuted => "NotExecuted",
            SceeVerdict::Detected => "SCEE_Detected",
            SceeVerdict::DetectedNonFatal => "SCEE_Detected_NonFatal",
            SceeVerdict::NotDetected => "SCEE_Not_Detected",
            SceeVerdict::NoneScee => "NoneSCEE",
            SceeVerdict::Unknown => "Unknown",
        };
        write!(f, "{name}")
    }
}

/// Evaluate the verdict for one site and one injection.
///
/// `mask` is [`RunOutcome::Ignored`] when no mask run was performed.
pub fn scee_verdict(profile: RunOutcome, injection: RunOutcome, mask: RunOutcome) -> SceeVerdict {
    match profile {
        // Site never reached: the probe did not trap.
        RunOutcome::Success => SceeVerdict::NotExecuted,

        RunOutcome::SigTrap => match injection {
            // Fault absorbed without a trace.  Deliberately *not* counted
            // as masked, to avoid overclaiming detection coverage.
            RunOutcome::Success => SceeVerdict::Unknown,

            RunOutcome::ErrorDetected => match mask {
                RunOutcome::Success => SceeVerdict::DetectedNonFatal,
                _ => SceeVerdict::Detected,
            },

            RunOutcome::TestFailed => SceeVerdict::NotDetected,

            RunOutcome::Timeout
            | RunOutcome::SegmentFault
            | RunOutcome::FPError
            | RunOutcome::Terminate
            | RunOutcome::Abort
            | RunOutcome::UnknownRetcode => SceeVerdict::NoneScee,

            other => {
                warn!("no verdict entry for injection outcome {other}, treating as Unknown");
                SceeVerdict::Unknown
            }
        },

        other => {
            warn!("no verdict entry for profile outcome {other}, treating as Unknown");
            SceeVerdict::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_OUTCOMES: [RunOutcome; 12] = [
        RunOutcome::Success,
        RunOutcome::SigTrap,
        RunOutcome::ErrorDetected,
        RunOutcome::TestFailed,
        RunOutcome::Timeout,
        RunOutcome::SegmentFault,
        RunOutcome::FPError,
        RunOutcome::Abort,
        RunOutcome::Terminate,
        RunOutcome::UnknownRetcode,
        RunOutcome::Unknown,
        RunOutcome::Ignored,
    ];

    #[test]
    fn literal_scenarios() {
        use RunOutcome::*;
        assert_eq!(
            scee_verdict(SigTrap, ErrorDetected, Ignored),
            SceeVerdict::Detected
        );
        assert_eq!(
            scee_verdict(SigTrap, TestFailed, Ignored),
            SceeVerdict::NotDetected
        );
        assert_eq!(scee_verdict(SigTrap, Timeout, Ignored), SceeVerdict::NoneScee);
        assert_eq!(scee_verdict(Success, Success, Ignored), SceeVerdict::NotExecuted);
        assert_eq!(
            scee_verdict(SigTrap, ErrorDetected, Success),
            SceeVerdict::DetectedNonFatal
        );
    }

    #[test]
    fn silently_absorbed_fault_is_undecided() {
        assert_eq!(
            scee_verdict(RunOutcome::SigTrap, RunOutcome::Success, RunOutcome::Ignored),
            SceeVerdict::Unknown
        );
    }

    #[test]
    fn crashes_and_hangs_escape_the_detector() {
        use RunOutcome::*;
        for injection in [Timeout, SegmentFault, FPError, Terminate, Abort, UnknownRetcode] {
            assert_eq!(
                scee_verdict(SigTrap, injection, Ignored),
                SceeVerdict::NoneScee,
                "injection={injection}"
            );
        }
    }

    #[test]
    fn unreached_site_dominates_everything() {
        for injection in ALL_OUTCOMES {
            for mask in ALL_OUTCOMES {
                assert_eq!(
                    scee_verdict(RunOutcome::Success, injection, mask),
                    SceeVerdict::NotExecuted
                );
            }
        }
    }

    #[test]
    fn total_over_every_triple() {
        // Exhausts all 12^3 combinations; the point is that none panics and
        // each returns exactly one verdict.
        for profile in ALL_OUTCOMES {
            for injection in ALL_OUTCOMES {
                for mask in ALL_OUTCOMES {
                    let _ = scee_verdict(profile, injection, mask);
                }
            }
        }
    }

    #[test]
    fn strange_profile_outcome_is_unknown() {
        assert_eq!(
            scee_verdict(RunOutcome::Timeout, RunOutcome::TestFailed, RunOutcome::Ignored),
            SceeVerdict::Unknown
        );
    }

    #[test]
    fn verdict_display_names() {
        assert_eq!(SceeVerdict::Detected.to_string(), "SCEE_Detected");
        assert_eq!(
            SceeVerdict::DetectedNonFatal.to_string(),
            "SCEE_Detected_NonFatal"
        );
        assert_eq!(SceeVerdict::NoneScee.to_string(), "NoneSCEE");
    }
}
