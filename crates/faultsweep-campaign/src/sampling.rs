//! Adaptive per-unit sampling budgets.
//!
//! After profiling, hit sites are tallied per hardware unit.  Units with few
//! reachable sites get proportionally more injections per site, so the
//! campaign's unit mix approaches the configured target ratios instead of
//! mirroring whatever the binary happens to contain.
//!
//! Computational campaigns also persist their largest raw per-unit tally as
//! a baseline, keyed by application and detector variant.  A consistency
//! campaign over a different code variant then derives its budgets from that
//! baseline, so the two runs stay comparable even when their reachable-site
//! populations differ.

use std::collections::BTreeMap;
use std::path::PathBuf;

use log::{info, warn};

use faultsweep_fault::{Category, UnitKind, ALL_UNITS};

use crate::CampaignError;

/// Sampling parameters.
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    /// Target share per unit; defaults to an even 0.25 split.
    pub ratios: BTreeMap<UnitKind, f64>,
    /// Per-site multiplier in computational mode.
    pub computational_scale: f64,
    /// Per-site multiplier in consistency mode.
    pub consistency_scale: f64,
    /// Directory holding persisted baselines.
    pub state_dir: PathBuf,
}

impl SamplingConfig {
    pub fn new(state_dir: PathBuf) -> Self {
        let ratios = ALL_UNITS.iter().map(|&unit| (unit, 0.25)).collect();
        Self {
            ratios,
            computational_scale: 5.0,
            consistency_scale: 10.0,
            state_dir,
        }
    }
}

/// Computes per-unit injection budgets from profile-phase hit tallies.
#[derive(Debug)]
pub struct SamplingController {
    config: SamplingConfig,
}

impl SamplingController {
    pub fn new(config: SamplingConfig) -> Self {
        Self { config }
    }

    /// Per-unit injection budget for this campaign.
    ///
    /// `counts` holds hit-site tallies per unit; units absent from it get no
    /// budget.  Computational mode persists the peak raw tally for `app` +
    /// `variant`; consistency mode requires that baseline to exist.
    pub fn budgets(
        &self,
        counts: &BTreeMap<UnitKind, usize>,
        category: Category,
        app: &str,
        variant: &str,
    ) -> Result<BTreeMap<UnitKind, u32>, CampaignError> {
        if counts.is_empty() {
            warn!("no hit sites in any unit, budgets are empty");
            return Ok(BTreeMap::new());
        }

        for (unit, count) in counts {
            info!("hit sites by unit: {unit}, count: {count}");
        }

        match category {
            Category::Computational => self.computational_budgets(counts, app, variant),
            Category::Consistency => self.consistency_budgets(counts, app, variant),
        }
    }

    fn computational_budgets(
        &self,
        counts: &BTreeMap<UnitKind, usize>,
        app: &str,
        variant: &str,
    ) -> Result<BTreeMap<UnitKind, u32>, CampaignError> {
        // The unit furthest above its target share sets the normalizing
        // baseline; every budget is scaled relative to it.
        let mut baseline = 0f64;
        let mut peak = 0usize;
        for (unit, &count) in counts {
            baseline = baseline.max(count as f64 / self.ratio(*unit));
            peak = peak.max(count);
        }

        let scale = self.config.computational_scale;
        let budgets = counts
            .iter()
            .map(|(&unit, &count)| {
                let budget = (baseline * self.ratio(unit) / count as f64 * scale).round() as u32;
                (unit, budget)
            })
            .collect();

        info!("sampling baseline: {baseline}, peak unit tally: {peak}");
        info!("per-unit budgets: {budgets:?}");

        let path = self.baseline_path(app, variant);
        std::fs::create_dir_all(&self.config.state_dir)?;
        std::fs::write(&path, peak.to_string())?;
        info!("persisted sampling baseline to {}", path.display());

        Ok(budgets)
    }

    fn consistency_budgets(
        &self,
        counts: &BTreeMap<UnitKind, usize>,
        app: &str,
        variant: &str,
    ) -> Result<BTreeMap<UnitKind, u32>, CampaignError> {
        let path = self.baseline_path(app, variant);
        let baseline: f64 = std::fs::read_to_string(&path)
            .map_err(|_| CampaignError::MissingBaseline { path: path.clone() })?
            .trim()
            .parse()
            .map_err(|_| CampaignError::MissingBaseline { path: path.clone() })?;

        let scale = self.config.consistency_scale;
        let budgets = counts
            .iter()
            .map(|(&unit, &count)| {
                let budget = ((baseline / count as f64).round() * scale) as u32;
                (unit, budget)
            })
            .collect();

        info!("consistency baseline {baseline} from {}", path.display());
        info!("per-unit budgets: {budgets:?}");
        Ok(budgets)
    }

    fn ratio(&self, unit: UnitKind) -> f64 {
        self.config.ratios.get(&unit).copied().unwrap_or(0.25)
    }

    fn baseline_path(&self, app: &str, variant: &str) -> PathBuf {
        self.config
            .state_dir
            .join(format!("{app}_{variant}_peak_sites.txt"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(fpu: usize, alu: usize, simd: usize, cc: usize) -> BTreeMap<UnitKind, usize> {
        let mut map = BTreeMap::new();
        for (unit, count) in [
            (UnitKind::Fpu, fpu),
            (UnitKind::Alu, alu),
            (UnitKind::Simd, simd),
            (UnitKind::Cc, cc),
        ] {
            if count > 0 {
                map.insert(unit, count);
            }
        }
        map
    }

    fn controller(state_dir: &std::path::Path) -> SamplingController {
        SamplingController::new(SamplingConfig::new(state_dir.to_path_buf()))
    }

    #[test]
    fn computational_budgets_favor_scarce_units() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());

        // count/ratio per unit: fpu 40, alu 160, simd 20, cc 180.
        let budgets = ctl
            .budgets(
                &counts(10, 40, 5, 45),
                Category::Computational,
                "wordcount",
                "orthrus",
            )
            .unwrap();

        // baseline = 180; budget = round(180 * 0.25 / count * 5)
        assert_eq!(budgets[&UnitKind::Fpu], 23);
        assert_eq!(budgets[&UnitKind::Alu], 6);
        assert_eq!(budgets[&UnitKind::Simd], 45);
        assert_eq!(budgets[&UnitKind::Cc], 5);

        // Scarcer units always get the larger per-site budget.
        assert!(budgets[&UnitKind::Simd] > budgets[&UnitKind::Fpu]);
        assert!(budgets[&UnitKind::Fpu] > budgets[&UnitKind::Alu]);
        assert!(budgets[&UnitKind::Alu] > budgets[&UnitKind::Cc]);
    }

    #[test]
    fn computational_persists_peak_tally() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());
        ctl.budgets(
            &counts(10, 40, 5, 45),
            Category::Computational,
            "wordcount",
            "orthrus",
        )
        .unwrap();

        let persisted =
            std::fs::read_to_string(dir.path().join("wordcount_orthrus_peak_sites.txt")).unwrap();
        assert_eq!(persisted, "45");
    }

    #[test]
    fn consistency_reads_the_persisted_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());

        // Computational run on variant A establishes the baseline (peak 45).
        ctl.budgets(
            &counts(10, 40, 5, 45),
            Category::Computational,
            "wordcount",
            "orthrus",
        )
        .unwrap();

        // Consistency run on variant A's baseline with a different site
        // population: budget = round(45 / count) * 10.
        let budgets = ctl
            .budgets(
                &counts(9, 30, 0, 15),
                Category::Consistency,
                "wordcount",
                "orthrus",
            )
            .unwrap();
        assert_eq!(budgets[&UnitKind::Fpu], 50);
        assert_eq!(budgets[&UnitKind::Alu], 20);
        assert_eq!(budgets[&UnitKind::Cc], 30);
        assert!(!budgets.contains_key(&UnitKind::Simd));
    }

    #[test]
    fn consistency_without_baseline_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());
        assert!(matches!(
            ctl.budgets(&counts(1, 1, 1, 1), Category::Consistency, "fresh", "rbv"),
            Err(CampaignError::MissingBaseline { .. })
        ));
    }

    #[test]
    fn empty_tallies_yield_empty_budgets() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());
        let budgets = ctl
            .budgets(
                &BTreeMap::new(),
                Category::Computational,
                "wordcount",
                "orthrus",
            )
            .unwrap();
        assert!(budgets.is_empty());
    }
}
