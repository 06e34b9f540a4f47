//! Source emission spectra and the transforms applied to them.
//!
//! A `Spectrum` is the tabulated tube output S(E) for a given
//! target/voltage/angle, on an ascending fixed-step energy grid. Filters
//! attenuate it by Beer-Lambert factors; the detector response weights it
//! by `E * (1 - exp(-mu_det * rho * w))`. All of these are pure functions
//! returning new spectra.

use crate::error::BhcError;
use crate::physics::material::{MaterialAttenuation, MM_TO_CM};

/// A physical filter in the beam path.
#[derive(Debug, Clone)]
pub struct Filter {
    pub material: MaterialAttenuation,
    pub width_mm: f64,
    /// Density in g/cm3 (may differ from the material's tabulated value).
    pub density: f64,
}

#[derive(Debug, Clone)]
pub struct Spectrum {
    energies: Vec<f64>,
    intensities: Vec<f64>,
}

impl Spectrum {
    pub fn new(energies: Vec<f64>, intensities: Vec<f64>) -> Result<Self, BhcError> {
        if energies.len() != intensities.len() {
            return Err(BhcError::InvalidTable(format!(
                "spectrum: {} energies but {} intensities",
                energies.len(),
                intensities.len()
            )));
        }
        if energies.len() < 2 {
            return Err(BhcError::InvalidTable(
                "spectrum: need at least 2 energy bins".into(),
            ));
        }
        let step = energies[1] - energies[0];
        if step <= 0.0 {
            return Err(BhcError::InvalidTable(
                "spectrum: energies must be ascending".into(),
            ));
        }
        for pair in energies.windows(2) {
            if ((pair[1] - pair[0]) - step).abs() > 1e-6 * step.max(1.0) {
                return Err(BhcError::InvalidTable(
                    "spectrum: energy bins must have fixed width".into(),
                ));
            }
        }
        if intensities.iter().any(|&v| !v.is_finite() || v < 0.0) {
            return Err(BhcError::InvalidTable(
                "spectrum: intensities must be finite and non-negative".into(),
            ));
        }
        Ok(Self {
            energies,
            intensities,
        })
    }

    pub fn energies(&self) -> &[f64] {
        &self.energies
    }

    pub fn intensities(&self) -> &[f64] {
        &self.intensities
    }

    pub fn len(&self) -> usize {
        self.energies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.energies.is_empty()
    }

    pub fn bin_width(&self) -> f64 {
        self.energies[1] - self.energies[0]
    }

    pub fn total_intensity(&self) -> f64 {
        self.intensities.iter().sum()
    }

    /// Intensity-weighted mean energy (keV).
    pub fn mean_energy(&self) -> f64 {
        let total = self.total_intensity();
        if total <= 0.0 {
            return f64::NAN;
        }
        self.energies
            .iter()
            .zip(&self.intensities)
            .map(|(&e, &s)| e * s)
            .sum::<f64>()
            / total
    }

    /// Standard deviation of the energy distribution (keV).
    pub fn energy_std_dev(&self) -> f64 {
        let total = self.total_intensity();
        if total <= 0.0 {
            return f64::NAN;
        }
        let mean = self.mean_energy();
        let second: f64 = self
            .energies
            .iter()
            .zip(&self.intensities)
            .map(|(&e, &s)| e * e * s)
            .sum::<f64>()
            / total;
        (second - mean * mean).max(0.0).sqrt()
    }

    /// Apply Beer-Lambert attenuation for each filter in order.
    pub fn filtered(&self, filters: &[Filter]) -> Spectrum {
        let mut intensities = self.intensities.clone();
        for f in filters {
            for (i, &e) in self.energies.iter().enumerate() {
                let exponent = f.material.mu(e) * f.density * f.width_mm * MM_TO_CM;
                intensities[i] *= (-exponent).exp();
            }
        }
        Spectrum {
            energies: self.energies.clone(),
            intensities,
        }
    }

    /// Response-weighted ("measured") spectrum:
    /// `S(E) * E * (1 - exp(-mu_det(E) * rho * w))`.
    ///
    /// Used only for diagnostics (mean detected energy etc.); the forward
    /// model integrates the response inline instead.
    pub fn detected(&self, detector: &MaterialAttenuation, density: f64, width_mm: f64) -> Spectrum {
        let intensities = self
            .energies
            .iter()
            .zip(&self.intensities)
            .map(|(&e, &s)| {
                let exponent = detector.mu(e) * density * width_mm * MM_TO_CM;
                s * e * (1.0 - (-exponent).exp())
            })
            .collect();
        Spectrum {
            energies: self.energies.clone(),
            intensities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_spectrum() -> Spectrum {
        let energies: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        let intensities = vec![1.0; 100];
        Spectrum::new(energies, intensities).unwrap()
    }

    fn absorber() -> MaterialAttenuation {
        // Strongly decreasing mu with energy, like any real material below
        // the pair-production regime.
        MaterialAttenuation::new(
            "Cu",
            8.96,
            vec![(1.0, 1000.0), (10.0, 100.0), (50.0, 1.0), (150.0, 0.1)],
        )
        .unwrap()
    }

    #[test]
    fn validation_rejects_mismatched_and_negative() {
        assert!(Spectrum::new(vec![1.0, 2.0], vec![1.0]).is_err());
        assert!(Spectrum::new(vec![1.0, 2.0, 4.0], vec![1.0, 1.0, 1.0]).is_err());
        assert!(Spectrum::new(vec![1.0, 2.0], vec![1.0, -0.5]).is_err());
    }

    #[test]
    fn filtering_hardens_the_beam() {
        let spec = flat_spectrum();
        let filt = spec.filtered(&[Filter {
            material: absorber(),
            width_mm: 1.0,
            density: 8.96,
        }]);

        // Attenuation removes intensity overall...
        assert!(filt.total_intensity() < spec.total_intensity());
        // ...and removes proportionally more at low energy, so the mean
        // energy shifts upward (beam hardening).
        assert!(filt.mean_energy() > spec.mean_energy());
    }

    #[test]
    fn zero_width_filter_is_identity() {
        let spec = flat_spectrum();
        let filt = spec.filtered(&[Filter {
            material: absorber(),
            width_mm: 0.0,
            density: 8.96,
        }]);
        for (a, b) in filt.intensities().iter().zip(spec.intensities()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn detected_spectrum_weights_by_energy_and_absorption() {
        let spec = flat_spectrum();
        let det = spec.detected(&absorber(), 4.51, 0.6);
        assert_eq!(det.len(), spec.len());
        // A thin detector absorbs a fraction in (0, 1), so every bin is
        // bounded by E * S(E).
        for ((&e, &s), &d) in spec
            .energies()
            .iter()
            .zip(spec.intensities())
            .zip(det.intensities())
        {
            assert!(d >= 0.0 && d <= e * s + 1e-12);
        }
    }
}
