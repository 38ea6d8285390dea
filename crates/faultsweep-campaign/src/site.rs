//! Site registry entries.
//!
//! One [`SiteInfo`] per eligible (function, pc) site, created in the inspect
//! phase and then written by exactly one profile worker result and one
//! injection worker result.  The campaign coordinator is the sole owner of
//! the registry; workers only ever see their own testcases.

use faultsweep_fault::{scee_verdict, OutcomeRecord, RunOutcome, SceeVerdict};
use faultsweep_protocol::FaultDescriptor;

use crate::markers::FaultUnitReport;
use crate::testcase::Testcase;

/// Stable site identifier used as the registry key and in the result file.
pub fn site_uid(function: &str, pc: u32) -> String {
    format!("fn({function})|pc({pc})")
}

/// One completed injection at a site.
pub struct InjectionRecord {
    /// Testcase tag, unique per site + fault kind (+ repeat index).
    pub name: String,
    /// Exact descriptor the injection was built with.
    pub descriptor: FaultDescriptor,
    pub outcome: OutcomeRecord,
}

impl InjectionRecord {
    /// Verdict for this injection against the site's profile outcome.
    pub fn verdict(&self, profile: RunOutcome) -> SceeVerdict {
        scee_verdict(profile, self.outcome.outcome, RunOutcome::Ignored)
    }
}

/// Everything known about one injection site.
pub struct SiteInfo {
    pub function: String,
    pub pc: u32,
    /// Instruction text from the inspect listing.
    pub inst: String,
    /// The site's profile testcase, returned from the build/run workers.
    pub profile_testcase: Option<Testcase>,
    pub profile_outcome: Option<OutcomeRecord>,
    /// Hardware unit reported by the profile build; `None` marks the site
    /// ineligible (the pass could not plant a fault there).
    pub unit: Option<FaultUnitReport>,
    /// Profile run trapped: the site executes.
    pub hit: bool,
    pub injections: Vec<InjectionRecord>,
    /// Every planned injection for this site ran and was classified.
    pub finished: bool,
}

impl SiteInfo {
    pub fn new(function: impl Into<String>, pc: u32, inst: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            pc,
            inst: inst.into(),
            profile_testcase: None,
            profile_outcome: None,
            unit: None,
            hit: false,
            injections: Vec::new(),
            finished: false,
        }
    }

    pub fn uid(&self) -> String {
        site_uid(&self.function, self.pc)
    }

    /// The profile outcome, or `Ignored` when the site never ran.
    pub fn profile_result(&self) -> RunOutcome {
        self.profile_outcome
            .as_ref()
            .map(|record| record.outcome)
            .unwrap_or(RunOutcome::Ignored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultsweep_fault::{OutcomeData, OutcomeRecord};
    use faultsweep_protocol::{FaultDescriptor, FaultProfile};

    fn outcome(outcome: RunOutcome) -> OutcomeRecord {
        OutcomeRecord {
            outcome,
            data: OutcomeData {
                rc: 0,
                out: Vec::new(),
                err: Vec::new(),
            },
        }
    }

    #[test]
    fn uid_encodes_function_and_pc() {
        assert_eq!(site_uid("_ZN3app3sumEv", 12), "fn(_ZN3app3sumEv)|pc(12)");
        let site = SiteInfo::new("_ZN3app3sumEv", 12, "ADDSDrr");
        assert_eq!(site.uid(), "fn(_ZN3app3sumEv)|pc(12)");
    }

    #[test]
    fn unprofiled_site_reports_ignored() {
        let site = SiteInfo::new("f", 0, "NOP");
        assert_eq!(site.profile_result(), RunOutcome::Ignored);
    }

    #[test]
    fn injection_verdict_uses_profile_outcome() {
        let record = InjectionRecord {
            name: "injection|f|0|bitflip1".to_string(),
            descriptor: FaultDescriptor {
                workmode: "injection".to_string(),
                profiles: vec![FaultProfile::targeting("f")],
                insts_only: Vec::new(),
                insts_ignore: Vec::new(),
            },
            outcome: outcome(RunOutcome::ErrorDetected),
        };
        assert_eq!(record.verdict(RunOutcome::SigTrap), SceeVerdict::Detected);
        assert_eq!(record.verdict(RunOutcome::Success), SceeVerdict::NotExecuted);
    }
}
