//! Fault kind and category definitions.
//!
//! Each [`FaultKind`] models a hardware-like corruption applied to one
//! instruction of the instrumented binary.  Kinds are deterministic in the
//! descriptor: the random-width bit-flip fixes its width when the descriptor
//! is built, so a persisted descriptor replays the identical fault.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A fault that can be planted at an instruction site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    /// No-op probe; traps when the site executes but corrupts nothing.
    /// Used by the profile phase to test reachability.
    #[serde(rename = "nop")]
    Nop,
    /// Flip 1 contiguous bit of the target value.
    #[serde(rename = "bitflip1")]
    Bitflip1,
    /// Flip 2 contiguous bits.
    #[serde(rename = "bitflip2")]
    Bitflip2,
    /// Flip 3 contiguous bits.
    #[serde(rename = "bitflip3")]
    Bitflip3,
    /// Flip a contiguous run of bits whose width is drawn uniformly from
    /// `[1, 10]` when the descriptor is built.
    #[serde(rename = "bitflip_random")]
    BitflipRandom,
    /// Force the target value's bits to 0.
    #[serde(rename = "stuck_at_0")]
    StuckAt0,
    /// Force the target value's bits to 1.
    #[serde(rename = "stuck_at_1")]
    StuckAt1,
}

/// The canonical injection set: every kind is injected once per hit site
/// before any sampling budget tops up with extra random-width flips.
pub const CANONICAL_FAULT_KINDS: [FaultKind; 7] = [
    FaultKind::Nop,
    FaultKind::Bitflip1,
    FaultKind::Bitflip2,
    FaultKind::Bitflip3,
    FaultKind::BitflipRandom,
    FaultKind::StuckAt0,
    FaultKind::StuckAt1,
];

impl FaultKind {
    /// Fixed bit-flip width, if this kind has one.
    pub fn fixed_width(&self) -> Option<u32> {
        match self {
            FaultKind::Bitflip1 => Some(1),
            FaultKind::Bitflip2 => Some(2),
            FaultKind::Bitflip3 => Some(3),
            _ => None,
        }
    }

    /// Whether this kind is a bit-flip (fixed or random width).
    pub fn is_bitflip(&self) -> bool {
        matches!(
            self,
            FaultKind::Bitflip1
                | FaultKind::Bitflip2
                | FaultKind::Bitflip3
                | FaultKind::BitflipRandom
        )
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultKind::Nop => "nop",
            FaultKind::Bitflip1 => "bitflip1",
            FaultKind::Bitflip2 => "bitflip2",
            FaultKind::Bitflip3 => "bitflip3",
            FaultKind::BitflipRandom => "bitflip_random",
            FaultKind::StuckAt0 => "stuck_at_0",
            FaultKind::StuckAt1 => "stuck_at_1",
        };
        write!(f, "{name}")
    }
}

impl FromStr for FaultKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nop" => Ok(FaultKind::Nop),
            "bitflip1" => Ok(FaultKind::Bitflip1),
            "bitflip2" => Ok(FaultKind::Bitflip2),
            "bitflip3" => Ok(FaultKind::Bitflip3),
            "bitflip_random" => Ok(FaultKind::BitflipRandom),
            "stuck_at_0" => Ok(FaultKind::StuckAt0),
            "stuck_at_1" => Ok(FaultKind::StuckAt1),
            other => Err(format!("unknown fault kind: {other}")),
        }
    }
}

/// Hardware unit reported by the instrumentation for a site's instruction.
///
/// Closed set; an unrecognized unit string from the toolchain makes the site
/// ineligible rather than entering category accounting under a free-form key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UnitKind {
    Fpu,
    Alu,
    Simd,
    Cc,
}

/// All hardware units, in stable display order.
pub const ALL_UNITS: [UnitKind; 4] = [UnitKind::Fpu, UnitKind::Alu, UnitKind::Simd, UnitKind::Cc];

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitKind::Fpu => "fpu",
            UnitKind::Alu => "alu",
            UnitKind::Simd => "simd",
            UnitKind::Cc => "cc",
        };
        write!(f, "{name}")
    }
}

impl FromStr for UnitKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fpu" => Ok(UnitKind::Fpu),
            "alu" => Ok(UnitKind::Alu),
            "simd" => Ok(UnitKind::Simd),
            "cc" => Ok(UnitKind::Cc),
            other => Err(format!("unknown hardware unit: {other}")),
        }
    }
}

/// Campaign category: which sampling-budget derivation applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    /// Budgets balanced across units against per-unit target ratios.
    Computational,
    /// Budgets derived from a persisted computational baseline so two code
    /// variants with different site populations stay comparable.
    Consistency,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Computational => write!(f, "computational"),
            Category::Consistency => write!(f, "consistency"),
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "computational" => Ok(Category::Computational),
            "consistency" => Ok(Category::Consistency),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_set_has_seven_kinds() {
        assert_eq!(CANONICAL_FAULT_KINDS.len(), 7);
        assert!(CANONICAL_FAULT_KINDS.contains(&FaultKind::Nop));
        assert!(CANONICAL_FAULT_KINDS.contains(&FaultKind::BitflipRandom));
    }

    #[test]
    fn kind_display_roundtrips() {
        for kind in CANONICAL_FAULT_KINDS {
            let back: FaultKind = kind.to_string().parse().unwrap();
            assert_eq!(kind, back);
        }
    }

    #[test]
    fn fixed_widths() {
        assert_eq!(FaultKind::Bitflip1.fixed_width(), Some(1));
        assert_eq!(FaultKind::Bitflip3.fixed_width(), Some(3));
        assert_eq!(FaultKind::BitflipRandom.fixed_width(), None);
        assert_eq!(FaultKind::StuckAt0.fixed_width(), None);
    }

    #[test]
    fn unit_parse_rejects_unknown() {
        assert_eq!("fpu".parse::<UnitKind>().unwrap(), UnitKind::Fpu);
        assert!("gpu".parse::<UnitKind>().is_err());
        assert!("".parse::<UnitKind>().is_err());
    }

    #[test]
    fn category_parse() {
        assert_eq!(
            "computational".parse::<Category>().unwrap(),
            Category::Computational
        );
        assert!("chaotic".parse::<Category>().is_err());
    }
}
