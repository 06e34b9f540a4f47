//! Shared domain types.
//!
//! These types are kept lightweight and (where useful downstream)
//! serializable so they can be used in-memory during fitting and exported
//! to JSON for the correction tooling.

use serde::{Deserialize, Serialize};

use crate::error::BhcError;
use crate::physics::MaterialAttenuation;

/// The four parameter groups of the fit, in their fixed vector order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Target,
    Detector,
    Filter,
    Energy,
}

impl Group {
    pub const ALL: [Group; 4] = [Group::Target, Group::Detector, Group::Filter, Group::Energy];

    pub fn display_name(self) -> &'static str {
        match self {
            Group::Target => "target",
            Group::Detector => "detector",
            Group::Filter => "filter",
            Group::Energy => "energy",
        }
    }
}

/// Polynomial order (in line number) of each parameter group.
///
/// A group with order `-1` is disabled: it contributes no entries to the
/// parameter vector and is held at its fixed baseline during prediction.
/// An enabled group of order `n` contributes `n + 1` coefficients, lowest
/// order first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaryOrders {
    pub target: i32,
    pub detector: i32,
    pub filter: i32,
    pub energy: i32,
}

impl Default for VaryOrders {
    /// Constant widths for target/detector/filter, energy dependence
    /// disabled.
    fn default() -> Self {
        Self {
            target: 0,
            detector: 0,
            filter: 0,
            energy: -1,
        }
    }
}

impl VaryOrders {
    pub fn order(&self, group: Group) -> i32 {
        match group {
            Group::Target => self.target,
            Group::Detector => self.detector,
            Group::Filter => self.filter,
            Group::Energy => self.energy,
        }
    }

    pub fn set_order(&mut self, group: Group, order: i32) {
        match group {
            Group::Target => self.target = order,
            Group::Detector => self.detector = order,
            Group::Filter => self.filter = order,
            Group::Energy => self.energy = order,
        }
    }

    /// Coefficient count contributed by one group.
    pub fn group_len(&self, group: Group) -> usize {
        let order = self.order(group);
        if order < 0 { 0 } else { order as usize + 1 }
    }

    /// Total parameter-vector length over all enabled groups.
    pub fn param_len(&self) -> usize {
        Group::ALL.iter().map(|&g| self.group_len(g)).sum()
    }
}

/// How to react to overflow/invalid values in the exponential terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumericMode {
    /// Clamp the Beer-Lambert exponent and carry on.
    #[default]
    Production,
    /// Raise `NumericInstability` on out-of-range exponents.
    Debug,
}

/// One reference sample mounted on the carousel.
#[derive(Debug, Clone)]
pub struct CarouselSample {
    pub material: MaterialAttenuation,
    /// Density in g/cm3 (may differ from the material's tabulated density).
    pub density: f64,
    /// Thickness along the beam in mm.
    pub thickness_mm: f64,
}

/// The ordered set of carousel samples plus geometry and exclusion mask.
///
/// User-facing sample indices are 1-based; index 0 is the synthetic "null"
/// sample (unattenuated beam) which has no record here and is never fitted.
/// The mask is stored 0-based over the real samples.
#[derive(Debug, Clone)]
pub struct CarouselSet {
    pub samples: Vec<CarouselSample>,
    pub mask: Vec<bool>,
    /// Detector lines (image rows) in each calibration image.
    pub lines: usize,
    /// Columns in each calibration image.
    pub columns: usize,
}

impl CarouselSet {
    pub fn new(samples: Vec<CarouselSample>, lines: usize, columns: usize) -> Self {
        let mask = vec![false; samples.len()];
        Self {
            samples,
            mask,
            lines,
            columns,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// True when the real sample at 0-based index `sample` is excluded.
    pub fn is_masked(&self, sample: usize) -> bool {
        self.mask.get(sample).copied().unwrap_or(false)
    }

    /// Apply a user-facing mask selection: a positive value `n` masks
    /// sample `n`, a negative value `-n` unmasks sample `n`. Selection 0
    /// (the null sample) is rejected.
    pub fn apply_mask_selection(&mut self, selection: i32) -> Result<(), BhcError> {
        if selection == 0 {
            return Err(BhcError::IndexOutOfRange(
                "sample 0 is the null sample and cannot be masked".into(),
            ));
        }
        let idx = selection.unsigned_abs() as usize;
        if idx > self.samples.len() {
            return Err(BhcError::IndexOutOfRange(format!(
                "sample {idx} outside 1..={}",
                self.samples.len()
            )));
        }
        self.mask[idx - 1] = selection > 0;
        Ok(())
    }

    pub fn clear_mask(&mut self) {
        self.mask.fill(false);
    }

    /// 0-based indices of samples included in the fit.
    pub fn unmasked_indices(&self) -> Vec<usize> {
        (0..self.samples.len()).filter(|&i| !self.mask[i]).collect()
    }
}

/// Solver termination classification.
///
/// Success codes: 1 = gradient tolerance, 2 = step tolerance, 3 = both,
/// 4 = residual-reduction tolerance. Failure codes: 0 = not run,
/// 5 = iteration limit, 6 = singular normal equations, 7 = numeric
/// breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOutcome {
    pub code: i32,
    pub message: String,
}

impl FitOutcome {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Recognized success range. Anything else is a hard failure.
    pub fn is_success(&self) -> bool {
        (1..=4).contains(&self.code)
    }
}

/// Per-line summed-square error statistics over unmasked samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorStats {
    /// Summed squared residual per fitted line.
    pub per_line: Vec<f64>,
    pub average: f64,
    pub max: f64,
}

/// Output of one fit invocation. Immutable once produced; a subsequent fit
/// replaces it entirely.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// Vary configuration the vector was fitted under.
    pub vary: VaryOrders,
    /// Fitted parameter vector (layout per `vary`).
    pub params: Vec<f64>,
    /// Scaled covariance of the parameters, row-major `p x p`, if the
    /// normal equations were invertible at the solution.
    pub covariance: Option<Vec<Vec<f64>>>,
    /// Model prediction per (line, sample), `nlines x nsamples`.
    pub predicted: Vec<Vec<f64>>,
    /// Number of fitted lines.
    pub nlines: usize,
    pub outcome: FitOutcome,
    pub iterations: usize,
    /// Final summed squared residual.
    pub sse: f64,
}

/// The correction deliverable: per-line pairing of observed polychromatic
/// attenuation against single-energy attenuation, plus the fitted
/// polynomial coefficients (lowest order first).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionTable {
    /// Observed (model) attenuation per line and sweep point.
    pub xtab: Vec<Vec<f64>>,
    /// Reference single-energy attenuation per sweep point (shared by all
    /// lines by construction).
    pub ytab: Vec<f64>,
    /// Polynomial coefficients per line, `nlines x (order + 1)`.
    pub polyfit: Vec<Vec<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vary_orders_length_arithmetic() {
        let vary = VaryOrders::default();
        // target/detector/filter order 0, energy disabled.
        assert_eq!(vary.param_len(), 3);

        let all_constant = VaryOrders {
            target: 0,
            detector: 0,
            filter: 0,
            energy: 0,
        };
        assert_eq!(all_constant.param_len(), 4);

        // Disabling a group removes exactly order+1 entries.
        let mut vary = VaryOrders {
            target: 2,
            detector: 1,
            filter: 0,
            energy: -1,
        };
        let before = vary.param_len();
        assert_eq!(before, 3 + 2 + 1);
        vary.set_order(Group::Target, -1);
        assert_eq!(before - vary.param_len(), 3);
    }

    #[test]
    fn outcome_success_range() {
        for code in 1..=4 {
            assert!(FitOutcome::new(code, "ok").is_success());
        }
        for code in [0, 5, 6, 7, -1] {
            assert!(!FitOutcome::new(code, "bad").is_success());
        }
    }

    #[test]
    fn mask_selection_is_one_based_and_signed() {
        let mat = MaterialAttenuation::new(
            "Al",
            2.70,
            vec![(10.0, 26.23), (100.0, 0.1704)],
        )
        .unwrap();
        let sample = CarouselSample {
            material: mat,
            density: 2.70,
            thickness_mm: 1.0,
        };
        let mut set = CarouselSet::new(vec![sample.clone(), sample.clone(), sample], 10, 32);

        set.apply_mask_selection(2).unwrap();
        assert!(set.is_masked(1));
        assert_eq!(set.unmasked_indices(), vec![0, 2]);

        set.apply_mask_selection(-2).unwrap();
        assert!(!set.is_masked(1));

        assert!(set.apply_mask_selection(0).is_err());
        assert!(set.apply_mask_selection(4).is_err());
    }
}
