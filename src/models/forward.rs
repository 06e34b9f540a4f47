//! Polychromatic forward model.
//!
//! `predict` turns a parameter vector and a (line, slab) pair into the
//! log-attenuation the detector would report: evaluate each vary group's
//! polynomial at the line number to get that line's effective target,
//! detector and filter widths (and optionally an energy-axis distortion),
//! apply them together with the slab as Beer-Lambert attenuators to the
//! filtered source spectrum, integrate against the detector response, and
//! take the log ratio against the unattenuated integral.

use crate::domain::{Group, NumericMode, VaryOrders};
use crate::error::BhcError;
use crate::models::params::ParamLayout;
use crate::physics::{MaterialAttenuation, Spectrum, MM_TO_CM};

/// Largest Beer-Lambert exponent magnitude accepted before the production
/// clamp (or the debug error) kicks in; e^709 overflows f64.
const EXP_LIMIT: f64 = 700.0;

/// A slab of material in the beam: `(material, density g/cm3, thickness mm)`.
pub type Slab<'a> = (&'a MaterialAttenuation, f64, f64);

/// Per-line effective model values after polynomial evaluation.
#[derive(Debug, Clone, Copy)]
pub struct LineValues {
    /// Extra target filtration width (mm).
    pub target_width_mm: f64,
    /// Detector scintillator width (mm); fitted in log space.
    pub detector_width_mm: f64,
    /// Extra fit-filter width (mm).
    pub filter_width_mm: f64,
    /// Multiplicative distortion of the energy axis for attenuation
    /// lookups; 1.0 when the energy group is disabled.
    pub energy_scale: f64,
}

#[derive(Debug, Clone)]
pub struct ForwardModel {
    /// Source spectrum after the fixed, configured filter stack.
    pub spectrum: Spectrum,
    /// Tube target material (fitted extra filtration).
    pub target: MaterialAttenuation,
    pub target_density: f64,
    /// Material of the fitted filter width (default Cu).
    pub fit_filter: MaterialAttenuation,
    pub fit_filter_density: f64,
    /// Detector scintillator.
    pub detector: MaterialAttenuation,
    pub detector_density: f64,
    /// Configured detector width (mm), the baseline when the detector
    /// group is disabled.
    pub detector_width_mm: f64,
    pub vary: VaryOrders,
    pub mode: NumericMode,
}

impl ForwardModel {
    pub fn layout(&self) -> ParamLayout {
        ParamLayout::new(self.vary)
    }

    /// Evaluate the vary-group polynomials at a line number.
    pub fn line_values(&self, params: &[f64], line: usize) -> Result<LineValues, BhcError> {
        let layout = self.layout();
        layout.check(params)?;

        let target_width_mm = layout.eval(params, Group::Target, line).unwrap_or(0.0);
        // The detector group fits ln(width) so the width stays positive
        // throughout the search.
        let detector_width_mm = match layout.eval(params, Group::Detector, line) {
            Some(ln_w) => ln_w.exp(),
            None => self.detector_width_mm,
        };
        let filter_width_mm = layout.eval(params, Group::Filter, line).unwrap_or(0.0);
        let energy_scale = 1.0 + layout.eval(params, Group::Energy, line).unwrap_or(0.0);

        Ok(LineValues {
            target_width_mm,
            detector_width_mm,
            filter_width_mm,
            energy_scale,
        })
    }

    /// Predicted log-attenuation `ln(I0/I)` at `(line, slab)`.
    ///
    /// `slab = None` predicts the null sample, which is 0 by construction.
    pub fn predict(
        &self,
        params: &[f64],
        line: usize,
        slab: Option<Slab<'_>>,
    ) -> Result<f64, BhcError> {
        let values = self.line_values(params, line)?;
        self.predict_with_values(&values, slab)
    }

    /// Same as `predict` but with the per-line values already evaluated;
    /// the correction sweep reuses one `LineValues` for many thicknesses.
    pub fn predict_with_values(
        &self,
        values: &LineValues,
        slab: Option<Slab<'_>>,
    ) -> Result<f64, BhcError> {
        let mut detected_open = 0.0;
        let mut detected_slab = 0.0;

        for (&e, &s) in self
            .spectrum
            .energies()
            .iter()
            .zip(self.spectrum.intensities())
        {
            // The energy group distorts the lookup axis only; bin weights
            // and the response's leading E stay on the true axis.
            let e_lookup = e * values.energy_scale;

            let beam_exp = self.guard(
                self.target.mu(e_lookup) * self.target_density * values.target_width_mm * MM_TO_CM
                    + self.fit_filter.mu(e_lookup)
                        * self.fit_filter_density
                        * values.filter_width_mm
                        * MM_TO_CM,
            )?;

            let det_exp = self.guard(
                self.detector.mu(e_lookup)
                    * self.detector_density
                    * values.detector_width_mm
                    * MM_TO_CM,
            )?;
            let response = e * (1.0 - (-det_exp).exp());

            let open = s * (-beam_exp).exp() * response;
            detected_open += open;

            match slab {
                Some((material, density, thickness_mm)) => {
                    let slab_exp =
                        self.guard(material.mu(e_lookup) * density * thickness_mm * MM_TO_CM)?;
                    detected_slab += open * (-slab_exp).exp();
                }
                None => detected_slab += open,
            }
        }

        if !(detected_open > 0.0 && detected_slab > 0.0)
            || !detected_open.is_finite()
            || !detected_slab.is_finite()
        {
            return Err(BhcError::NumericInstability(format!(
                "detected intensities degenerate (open={detected_open}, slab={detected_slab})"
            )));
        }

        Ok((detected_open / detected_slab).ln())
    }

    /// Overflow guard on a Beer-Lambert exponent. Production clamps,
    /// debug raises.
    fn guard(&self, exponent: f64) -> Result<f64, BhcError> {
        if exponent.is_finite() && exponent.abs() <= EXP_LIMIT {
            return Ok(exponent);
        }
        match self.mode {
            NumericMode::Production => Ok(exponent.clamp(-EXP_LIMIT, EXP_LIMIT)),
            NumericMode::Debug => Err(BhcError::NumericInstability(format!(
                "attenuation exponent {exponent} out of range"
            ))),
        }
    }
}
