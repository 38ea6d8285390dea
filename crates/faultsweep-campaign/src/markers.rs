//! Parsers for the instrumentation toolchain's textual dumps.
//!
//! The inspect-mode build prints every machine function followed by its
//! instruction listing; the profile-mode build prints the statically
//! injectable sites and the hardware unit of the instrumented instruction.
//! These parsers turn that text into the site registry's raw material.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use faultsweep_fault::UnitKind;

use crate::CampaignError;

/// One instruction in a function's listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstRecord {
    /// Index in the intermediate instruction listing, not a memory address.
    pub pc: u32,
    pub inst: String,
}

/// Parsed inspect dump: function name to ordered instruction listing.
pub type SiteMap = BTreeMap<String, Vec<InstRecord>>;

fn func_with_real_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Current Machine Function: (.+)\s+\[Real: (.+)\]$").unwrap())
}

fn func_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Current Machine Function: (.+)$").unwrap())
}

fn inst_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[Inst\.(\d+)\]: (.+)$").unwrap())
}

fn fault_inject_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[FaultInject\]\s+Inst\.(\d+): (.+)").unwrap())
}

fn fault_info_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[FaultInfo\]:\s*(\S+)\s*(\S+)(?:\s*(\S+))?").unwrap())
}

/// Parse an inspect-mode build dump into a [`SiteMap`].
///
/// Instruction lines before any function header are dropped with a warning;
/// the dump format guarantees a header first, so this only fires on mangled
/// output.
pub fn parse_inspect_dump(stdout: &str) -> SiteMap {
    let mut map = SiteMap::new();
    let mut current: Option<String> = None;

    for line in stdout.lines() {
        let header = func_with_real_re()
            .captures(line)
            .or_else(|| func_re().captures(line));
        if let Some(caps) = header {
            let name = caps[1].trim().to_string();
            debug!("inspect: found function {name}");
            map.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }

        if let Some(caps) = inst_re().captures(line) {
            let Some(func) = current.as_ref() else {
                warn!("inspect: instruction line before any function header: {line}");
                continue;
            };
            let pc: u32 = match caps[1].parse() {
                Ok(pc) => pc,
                Err(_) => {
                    warn!("inspect: unparsable instruction index in: {line}");
                    continue;
                }
            };
            map.entry(func.clone()).or_default().push(InstRecord {
                pc,
                inst: caps[2].to_string(),
            });
        }
    }

    map
}

/// Parse the statically injectable sites from a profile-mode build dump.
pub fn parse_injectable_sites(stdout: &str) -> Vec<InstRecord> {
    stdout
        .lines()
        .filter_map(|line| fault_inject_re().captures(line))
        .filter_map(|caps| {
            Some(InstRecord {
                pc: caps[1].parse().ok()?,
                inst: caps[2].to_string(),
            })
        })
        .collect()
}

/// Runtime hardware unit report for an instrumented instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultUnitReport {
    /// Raw unit string as printed, e.g. `fpu`.
    pub unit: String,
    /// Instruction-level kind, e.g. `calc`.
    pub instr_kind: String,
    /// Concrete instruction name when printed, e.g. `ADDSDrr`.
    pub instr_name: String,
}

impl FaultUnitReport {
    /// The unit as a member of the closed set, if it is one.
    pub fn unit_kind(&self) -> Option<UnitKind> {
        self.unit.parse().ok()
    }
}

/// Find the first `[FaultInfo]:` line of a profile-mode build dump.
///
/// `None` means the instrumentation could not plant a fault at the site;
/// the site is ineligible for injection.
pub fn parse_fault_unit(stdout: &str) -> Option<FaultUnitReport> {
    stdout.lines().find_map(|line| {
        let caps = fault_info_re().captures(line)?;
        Some(FaultUnitReport {
            unit: caps[1].to_string(),
            instr_kind: caps[2].to_string(),
            instr_name: caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default(),
        })
    })
}

/// Allow/deny name filter for eligible functions.
///
/// Deny patterns are consulted first; an empty allow list accepts every
/// function that survives the deny list.
#[derive(Debug)]
pub struct FunctionFilter {
    allow: Vec<Regex>,
    deny: Vec<Regex>,
}

impl FunctionFilter {
    pub fn new(allow: &[String], deny: &[String]) -> Result<Self, CampaignError> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>, regex::Error> {
            patterns.iter().map(|p| Regex::new(p)).collect()
        };
        Ok(Self {
            allow: compile(allow)?,
            deny: compile(deny)?,
        })
    }

    /// Accept everything.
    pub fn permissive() -> Self {
        Self {
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }

    pub fn matches(&self, function: &str) -> bool {
        if self.deny.iter().any(|re| re.is_match(function)) {
            return false;
        }
        self.allow.is_empty() || self.allow.iter().any(|re| re.is_match(function))
    }

    /// Keep only matching functions of a parsed site map.
    pub fn apply(&self, map: SiteMap) -> SiteMap {
        map.into_iter()
            .filter(|(name, _)| {
                let keep = self.matches(name);
                if !keep {
                    debug!("filter: dropping function {name}");
                }
                keep
            })
            .collect()
    }
}
