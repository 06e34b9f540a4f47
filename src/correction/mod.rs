//! Correction-curve synthesis from a fitted model.
//!
//! For each fitted line the correction material is swept over a thickness
//! range; each thickness yields a pair of
//! (polychromatic model attenuation, single-energy reference attenuation).
//! A low-order polynomial fitted to that pairing per line maps observed
//! production-scan attenuation onto the equivalent single-energy value,
//! the deliverable consumed by downstream correction tooling.
//!
//! Lines are independent (each reads only its own sweep row), so the sweep
//! and regression run in parallel across lines.

use rayon::prelude::*;

use crate::domain::{CorrectionTable, FitResult};
use crate::error::BhcError;
use crate::math::{linspace, polyfit};
use crate::models::ForwardModel;
use crate::physics::{MaterialAttenuation, MM_TO_CM};

#[derive(Debug, Clone)]
pub struct CorrectionConfig {
    /// Sweep points over the thickness range.
    pub num_points: usize,
    /// Largest swept thickness (mm).
    pub max_thickness_mm: f64,
    /// Order of the per-line correction polynomial.
    pub poly_order: usize,
}

impl Default for CorrectionConfig {
    /// The standard sweep run after every fit.
    fn default() -> Self {
        Self {
            num_points: 300,
            max_thickness_mm: 12.0,
            poly_order: 5,
        }
    }
}

/// Build the per-line correction table from a fit result.
///
/// `material`/`density` describe the correction material dominating the
/// production samples; `energy_kev` is the single reference energy all
/// measurements are mapped to.
pub fn build_correction_table(
    model: &ForwardModel,
    fit: &FitResult,
    material: &MaterialAttenuation,
    density: f64,
    energy_kev: f64,
    config: &CorrectionConfig,
) -> Result<CorrectionTable, BhcError> {
    model.layout().check(&fit.params)?;
    if config.num_points <= config.poly_order {
        return Err(BhcError::Configuration(format!(
            "{} sweep points cannot fit an order {} polynomial",
            config.num_points, config.poly_order
        )));
    }
    if !(config.max_thickness_mm > 0.0) {
        return Err(BhcError::Configuration(format!(
            "max thickness must be positive, got {}",
            config.max_thickness_mm
        )));
    }

    let thicknesses = linspace(0.0, config.max_thickness_mm, config.num_points);

    // Monochromatic reference attenuation; identical for every line by
    // construction.
    let mu = material.mu(energy_kev);
    let ytab: Vec<f64> = thicknesses
        .iter()
        .map(|&t| mu * density * t * MM_TO_CM)
        .collect();

    let rows: Vec<(Vec<f64>, Vec<f64>)> = (0..fit.nlines)
        .into_par_iter()
        .map(|line| -> Result<(Vec<f64>, Vec<f64>), BhcError> {
            let values = model.line_values(&fit.params, line)?;
            let mut xrow = Vec::with_capacity(thicknesses.len());
            for &t in &thicknesses {
                xrow.push(model.predict_with_values(&values, Some((material, density, t)))?);
            }
            let coeffs = polyfit(&xrow, &ytab, config.poly_order).map_err(|_| {
                BhcError::NumericInstability(format!(
                    "correction polynomial fit singular at line {line}"
                ))
            })?;
            Ok((xrow, coeffs))
        })
        .collect::<Result<_, _>>()?;

    let (xtab, polyfit_rows): (Vec<_>, Vec<_>) = rows.into_iter().unzip();

    Ok(CorrectionTable {
        xtab,
        ytab,
        polyfit: polyfit_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitOutcome, NumericMode, VaryOrders};
    use crate::math::polyval;
    use crate::models::forward::tests::{test_material, test_model};

    fn fit_result(model: &ForwardModel, params: &[f64], nlines: usize) -> FitResult {
        FitResult {
            vary: model.vary,
            params: params.to_vec(),
            covariance: None,
            predicted: Vec::new(),
            nlines,
            outcome: FitOutcome::new(1, "converged"),
            iterations: 3,
            sse: 0.0,
        }
    }

    #[test]
    fn single_line_sweep_has_default_shape() {
        let model = test_model(VaryOrders::default(), NumericMode::Production);
        let fit = fit_result(&model, &[0.1, 0.6f64.ln(), 0.05], 1);
        let cor = test_material("CaHA", 0.7);

        let config = CorrectionConfig::default();
        let table = build_correction_table(&model, &fit, &cor, 1.8, 60.0, &config).unwrap();

        assert_eq!(table.xtab.len(), 1);
        assert_eq!(table.xtab[0].len(), 300);
        assert_eq!(table.ytab.len(), 300);
        assert_eq!(table.polyfit.len(), 1);
        assert_eq!(table.polyfit[0].len(), 6);

        // Thickness 0 gives zero attenuation on both axes, so the fitted
        // polynomial must pass near the origin.
        assert!(table.xtab[0][0].abs() < 1e-12);
        assert!(table.ytab[0].abs() < 1e-12);
        let at_origin = polyval(&table.polyfit[0], table.xtab[0][0]);
        let y_span = table.ytab[299];
        assert!(
            at_origin.abs() < 5e-3 * y_span,
            "polynomial at origin: {at_origin}, span {y_span}"
        );
    }

    #[test]
    fn xtab_is_monotonic_in_thickness() {
        let model = test_model(VaryOrders::default(), NumericMode::Production);
        let fit = fit_result(&model, &[0.1, 0.6f64.ln(), 0.05], 2);
        let cor = test_material("Al", 0.5);

        let table = build_correction_table(
            &model,
            &fit,
            &cor,
            2.7,
            50.0,
            &CorrectionConfig::default(),
        )
        .unwrap();

        for row in &table.xtab {
            for pair in row.windows(2) {
                assert!(pair[1] > pair[0]);
            }
        }
    }

    #[test]
    fn correction_recovers_reference_attenuation_along_the_sweep() {
        // Evaluating the fitted polynomial at each swept x must land close
        // to the corresponding single-energy y across the whole range.
        let model = test_model(VaryOrders::default(), NumericMode::Production);
        let fit = fit_result(&model, &[0.0, 0.6f64.ln(), 0.0], 1);
        let cor = test_material("Al", 0.5);

        let table = build_correction_table(
            &model,
            &fit,
            &cor,
            2.7,
            60.0,
            &CorrectionConfig::default(),
        )
        .unwrap();

        let y_span = table.ytab[299];
        for (x, y) in table.xtab[0].iter().zip(&table.ytab) {
            let mapped = polyval(&table.polyfit[0], *x);
            assert!(
                (mapped - y).abs() < 1e-2 * y_span,
                "mapped {mapped} vs reference {y}"
            );
        }
    }

    #[test]
    fn degenerate_configs_are_rejected() {
        let model = test_model(VaryOrders::default(), NumericMode::Production);
        let fit = fit_result(&model, &[0.1, 0.6f64.ln(), 0.05], 1);
        let cor = test_material("Al", 0.5);

        let bad_points = CorrectionConfig {
            num_points: 4,
            poly_order: 5,
            ..CorrectionConfig::default()
        };
        assert!(build_correction_table(&model, &fit, &cor, 2.7, 50.0, &bad_points).is_err());

        let bad_range = CorrectionConfig {
            max_thickness_mm: 0.0,
            ..CorrectionConfig::default()
        };
        assert!(build_correction_table(&model, &fit, &cor, 2.7, 50.0, &bad_range).is_err());

        let wrong_params = fit_result(&model, &[0.0; 7], 1);
        assert!(
            build_correction_table(&model, &wrong_params, &cor, 2.7, 50.0, &CorrectionConfig::default())
                .is_err()
        );
    }
}
