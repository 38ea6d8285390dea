//! Fault descriptor construction.
//!
//! [`FaultSpec`] is the phase-tagged view of "what to inject where".  The
//! wire descriptor has phase-dependent optional fields; the tagged union
//! makes the required ones unrepresentable-when-missing: an injection spec
//! cannot exist without a target function and pc.

use faultsweep_protocol::{
    FaultDescriptor, FaultEntry, FaultProfile, WILDCARD_FUNCTION,
};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::kinds::{Category, FaultKind};

/// Bounds of the width drawn for [`FaultKind::BitflipRandom`], inclusive.
pub const RANDOM_FLIP_WIDTH: std::ops::RangeInclusive<u32> = 1..=10;

/// Phase-tagged fault specification for one testcase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultSpec {
    /// Dump the instruction listing of every function; no fault planted.
    Inspect,
    /// No-op probe at one site, to learn whether the site executes.
    Profile { function: String, pc: u32 },
    /// A real fault at one site.
    Injection {
        function: String,
        pc: u32,
        kind: FaultKind,
    },
}

impl FaultSpec {
    /// Work mode string as the instrumentation pass spells it.
    pub fn work_mode(&self) -> &'static str {
        match self {
            FaultSpec::Inspect => "inspect",
            FaultSpec::Profile { .. } => "profile",
            FaultSpec::Injection { .. } => "injection",
        }
    }

    /// The fault kind this spec plants, if any.
    pub fn kind(&self) -> Option<FaultKind> {
        match self {
            FaultSpec::Inspect => None,
            FaultSpec::Profile { .. } => Some(FaultKind::Nop),
            FaultSpec::Injection { kind, .. } => Some(*kind),
        }
    }

    /// Build the wire descriptor for this spec.
    ///
    /// The random-width bit-flip draws its width *here*, from the campaign
    /// RNG, so the persisted descriptor replays bit-for-bit.
    pub fn descriptor(&self, category: Category, rng: &mut ChaCha8Rng) -> FaultDescriptor {
        let profile = match self {
            FaultSpec::Inspect => FaultProfile::targeting(WILDCARD_FUNCTION),
            FaultSpec::Profile { function, pc } => {
                let mut profile = FaultProfile::targeting(function.clone());
                profile
                    .faults
                    .push(fault_entry(FaultKind::Nop, *pc, category, rng));
                profile
            }
            FaultSpec::Injection { function, pc, kind } => {
                let mut profile = FaultProfile::targeting(function.clone());
                profile.faults.push(fault_entry(*kind, *pc, category, rng));
                profile
            }
        };

        FaultDescriptor {
            workmode: self.work_mode().to_string(),
            profiles: vec![profile],
            insts_only: Vec::new(),
            insts_ignore: Vec::new(),
        }
    }
}

/// One wire fault entry for `kind` at instruction index `pc`.
fn fault_entry(kind: FaultKind, pc: u32, category: Category, rng: &mut ChaCha8Rng) -> FaultEntry {
    // Bit-flips collapse onto the single "bitflip" pass type; the width and
    // the contiguous flag travel in `options`.
    let (types, options) = match kind {
        FaultKind::BitflipRandom => {
            let width = rng.gen_range(RANDOM_FLIP_WIDTH);
            ("bitflip".to_string(), vec![width, 1])
        }
        _ if kind.is_bitflip() => {
            let width = kind.fixed_width().unwrap_or(1);
            ("bitflip".to_string(), vec![width, 1])
        }
        _ => (kind.to_string(), Vec::new()),
    };

    FaultEntry {
        // Ignored by the pass; it derives the unit from the instruction.
        inject_type: "fpu".to_string(),
        category: category.to_string(),
        repeat_count: 1,
        types,
        pc: vec![pc],
        options,
        insts_only: Vec::new(),
        insts_ignore: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(7)
    }

    #[test]
    fn work_mode_and_kind_follow_the_phase() {
        assert_eq!(FaultSpec::Inspect.work_mode(), "inspect");
        assert_eq!(FaultSpec::Inspect.kind(), None);

        let profile = FaultSpec::Profile {
            function: "f".to_string(),
            pc: 1,
        };
        assert_eq!(profile.work_mode(), "profile");
        assert_eq!(profile.kind(), Some(FaultKind::Nop));

        let injection = FaultSpec::Injection {
            function: "f".to_string(),
            pc: 1,
            kind: FaultKind::StuckAt0,
        };
        assert_eq!(injection.work_mode(), "injection");
        assert_eq!(injection.kind(), Some(FaultKind::StuckAt0));
    }

    #[test]
    fn inspect_targets_wildcard_with_no_faults() {
        let desc = FaultSpec::Inspect.descriptor(Category::Computational, &mut rng());
        assert_eq!(desc.workmode, "inspect");
        assert_eq!(desc.profiles.len(), 1);
        assert_eq!(desc.profiles[0].function, WILDCARD_FUNCTION);
        assert!(desc.profiles[0].faults.is_empty());
    }

    #[test]
    fn profile_plants_nop_probe_at_site() {
        let spec = FaultSpec::Profile {
            function: "_ZN3app3sumEv".to_string(),
            pc: 34,
        };
        let desc = spec.descriptor(Category::Computational, &mut rng());
        assert_eq!(desc.workmode, "profile");
        let fault = &desc.profiles[0].faults[0];
        assert_eq!(fault.types, "nop");
        assert_eq!(fault.pc, vec![34]);
        assert!(fault.options.is_empty());
    }

    #[test]
    fn fixed_width_flips_carry_width_and_contiguous() {
        for (kind, width) in [
            (FaultKind::Bitflip1, 1),
            (FaultKind::Bitflip2, 2),
            (FaultKind::Bitflip3, 3),
        ] {
            let spec = FaultSpec::Injection {
                function: "f".to_string(),
                pc: 0,
                kind,
            };
            let desc = spec.descriptor(Category::Computational, &mut rng());
            let fault = &desc.profiles[0].faults[0];
            assert_eq!(fault.types, "bitflip");
            assert_eq!(fault.options, vec![width, 1]);
        }
    }

    #[test]
    fn stuck_at_kinds_keep_their_own_type() {
        let spec = FaultSpec::Injection {
            function: "f".to_string(),
            pc: 3,
            kind: FaultKind::StuckAt1,
        };
        let desc = spec.descriptor(Category::Consistency, &mut rng());
        let fault = &desc.profiles[0].faults[0];
        assert_eq!(fault.types, "stuck_at_1");
        assert!(fault.options.is_empty());
        assert_eq!(fault.category, "consistency");
    }

    #[test]
    fn random_width_is_drawn_at_build_time_and_in_range() {
        let spec = FaultSpec::Injection {
            function: "f".to_string(),
            pc: 9,
            kind: FaultKind::BitflipRandom,
        };
        for seed in 0..32 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let desc = spec.descriptor(Category::Computational, &mut rng);
            let fault = &desc.profiles[0].faults[0];
            assert_eq!(fault.types, "bitflip");
            assert_eq!(fault.options.len(), 2);
            assert!(RANDOM_FLIP_WIDTH.contains(&fault.options[0]));
            assert_eq!(fault.options[1], 1);
        }
    }

    #[test]
    fn random_width_is_deterministic_per_seed() {
        let spec = FaultSpec::Injection {
            function: "f".to_string(),
            pc: 9,
            kind: FaultKind::BitflipRandom,
        };
        let a = spec.descriptor(Category::Computational, &mut ChaCha8Rng::seed_from_u64(42));
        let b = spec.descriptor(Category::Computational, &mut ChaCha8Rng::seed_from_u64(42));
        assert_eq!(a, b);
    }
}
