//! The calibration session: one object owning everything a fit needs.
//!
//! The loaded carousel, calibration images, vary configuration and last
//! fit result live together in an explicit value owned by the caller, so
//! independent sessions can coexist and nothing couples invocations
//! behind the scenes.

use log::{info, warn};

use crate::calib::CalibrationImages;
use crate::domain::{CarouselSet, ErrorStats, FitResult, NumericMode, VaryOrders};
use crate::error::BhcError;
use crate::fit::fitter::{FitOptions, Fitter};
use crate::fit::lm::LmConfig;
use crate::models::ForwardModel;
use crate::physics::{Filter, MaterialAttenuation, Spectrum};

/// Beam-path hardware description from the calibration run file.
#[derive(Debug, Clone)]
pub struct BeamSetup {
    /// Tube target material (extra filtration fitted by the target group).
    pub target: MaterialAttenuation,
    pub target_density: f64,
    /// Fixed, configured filters between tube and sample.
    pub filters: Vec<Filter>,
    /// Material whose width the filter group fits (default Cu).
    pub fit_filter: MaterialAttenuation,
    pub fit_filter_density: f64,
    /// Detector scintillator.
    pub detector: MaterialAttenuation,
    pub detector_density: f64,
    pub detector_width_mm: f64,
}

pub struct Session {
    pub carousel: CarouselSet,
    pub images: CalibrationImages,
    /// Raw source spectrum for the run's target/voltage/angle.
    pub source: Spectrum,
    pub beam: BeamSetup,
    pub vary: VaryOrders,
    /// Averaging half-width (pixels) around the image centre column.
    pub half_width: f64,
    pub mode: NumericMode,
    pub lm: LmConfig,
    last_fit: Option<FitResult>,
}

impl Session {
    pub fn new(
        carousel: CarouselSet,
        images: CalibrationImages,
        source: Spectrum,
        beam: BeamSetup,
    ) -> Result<Self, BhcError> {
        if carousel.len() != images.n_samples() {
            return Err(BhcError::Configuration(format!(
                "carousel defines {} samples but calibration data has {} images",
                carousel.len(),
                images.n_samples()
            )));
        }
        if carousel.lines != images.lines() || carousel.columns != images.columns() {
            return Err(BhcError::Configuration(format!(
                "carousel geometry {}x{} does not match image geometry {}x{}",
                carousel.lines,
                carousel.columns,
                images.lines(),
                images.columns()
            )));
        }
        Ok(Self {
            carousel,
            images,
            source,
            beam,
            vary: VaryOrders::default(),
            half_width: 5.0,
            mode: NumericMode::default(),
            lm: LmConfig::default(),
            last_fit: None,
        })
    }

    /// Forward model for the current beam setup and vary configuration.
    /// The fixed filter stack is folded into the spectrum once here.
    pub fn forward_model(&self) -> ForwardModel {
        ForwardModel {
            spectrum: self.source.filtered(&self.beam.filters),
            target: self.beam.target.clone(),
            target_density: self.beam.target_density,
            fit_filter: self.beam.fit_filter.clone(),
            fit_filter_density: self.beam.fit_filter_density,
            detector: self.beam.detector.clone(),
            detector_density: self.beam.detector_density,
            detector_width_mm: self.beam.detector_width_mm,
            vary: self.vary,
            mode: self.mode,
        }
    }

    /// Initial parameter vector for the next fit.
    ///
    /// An explicit `[target, ln(detector), filter]` guess seeds the
    /// constant coefficient of each enabled width group. Otherwise the
    /// previous fit's solution is reused when its layout still matches,
    /// falling back to zeros.
    pub fn initial_guess(&self, explicit: Option<[f64; 3]>) -> Vec<f64> {
        let len = self.vary.param_len();
        if let Some([target, detector, filter]) = explicit {
            let mut guess = vec![0.0; len];
            let mut offset = 0;
            for (order, value) in [
                (self.vary.target, target),
                (self.vary.detector, detector),
                (self.vary.filter, filter),
            ] {
                if order >= 0 {
                    guess[offset] = value;
                    offset += order as usize + 1;
                }
            }
            return guess;
        }

        match &self.last_fit {
            Some(prev) if prev.params.len() == len => {
                info!("resuming from previous fit solution");
                prev.params.clone()
            }
            Some(_) => {
                warn!("vary configuration changed; using zero initial guess");
                vec![0.0; len]
            }
            None => vec![0.0; len],
        }
    }

    /// Run the fit over `nlines` lines and store the result, superseding
    /// any previous one.
    pub fn run_fit(
        &mut self,
        nlines: usize,
        explicit_guess: Option<[f64; 3]>,
    ) -> Result<&FitResult, BhcError> {
        let initial = self.initial_guess(explicit_guess);
        let model = self.forward_model();
        let options = FitOptions {
            half_width: self.half_width,
            lm: self.lm.clone(),
        };
        let fitter = Fitter::new(&model, &self.carousel, &self.images, options)?;
        let result = fitter.fit(nlines, initial)?;
        self.last_fit = Some(result);
        Ok(self.last_fit.as_ref().unwrap())
    }

    pub fn last_fit(&self) -> Option<&FitResult> {
        self.last_fit.as_ref()
    }

    /// The latest fit result, required before building correction tables.
    pub fn require_fit(&self) -> Result<&FitResult, BhcError> {
        self.last_fit.as_ref().ok_or_else(|| {
            BhcError::Configuration("no fit result available; run a fit first".into())
        })
    }

    pub fn error_stats(&self) -> Result<ErrorStats, BhcError> {
        let result = self.require_fit()?;
        let model = self.forward_model();
        let options = FitOptions {
            half_width: self.half_width,
            lm: self.lm.clone(),
        };
        let fitter = Fitter::new(&model, &self.carousel, &self.images, options)?;
        fitter.error_stats(result)
    }

    /// Convert raw image intensities to log-attenuation against `i0`.
    /// Must be called before fitting when the run stored raw counts.
    pub fn transform(&mut self, i0: f64) -> Result<Vec<usize>, BhcError> {
        self.images.transform(i0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CarouselSample;
    use crate::models::forward::tests::{test_material, test_model};

    fn test_session() -> Session {
        let nlines = 6;
        let columns = 8;
        let model = test_model(VaryOrders::default(), NumericMode::Production);
        let material = test_material("Al", 0.5);
        let truth = [0.1, 0.6f64.ln(), 0.05];

        let thicknesses = [1.0, 2.0, 4.0];
        let samples: Vec<CarouselSample> = thicknesses
            .iter()
            .map(|&t| CarouselSample {
                material: material.clone(),
                density: 2.7,
                thickness_mm: t,
            })
            .collect();

        let mut images = Vec::new();
        for s in &samples {
            let mut img = Vec::new();
            for line in 0..nlines {
                let v = model
                    .predict(&truth, line, Some((&s.material, s.density, s.thickness_mm)))
                    .unwrap();
                img.extend(std::iter::repeat(v as f32).take(columns));
            }
            images.push(img);
        }

        let beam = BeamSetup {
            target: model.target.clone(),
            target_density: model.target_density,
            filters: Vec::new(),
            fit_filter: model.fit_filter.clone(),
            fit_filter_density: model.fit_filter_density,
            detector: model.detector.clone(),
            detector_density: model.detector_density,
            detector_width_mm: model.detector_width_mm,
        };

        Session::new(
            CarouselSet::new(samples, nlines, columns),
            CalibrationImages::new(nlines, columns, images).unwrap(),
            model.spectrum.clone(),
            beam,
        )
        .unwrap()
    }

    #[test]
    fn explicit_guess_lands_on_constant_coefficients() {
        let mut session = test_session();
        session.vary = VaryOrders {
            target: 1,
            detector: 0,
            filter: 2,
            energy: -1,
        };
        let guess = session.initial_guess(Some([0.5, -0.2, 0.8]));
        assert_eq!(guess, vec![0.5, 0.0, -0.2, 0.8, 0.0, 0.0]);
    }

    #[test]
    fn fit_is_required_before_correction() {
        let session = test_session();
        assert!(matches!(
            session.require_fit(),
            Err(BhcError::Configuration(_))
        ));
    }

    #[test]
    fn resume_uses_previous_solution_only_when_layout_matches() {
        let mut session = test_session();
        session.run_fit(6, Some([0.1, 0.6f64.ln(), 0.05])).unwrap();
        let solution = session.last_fit().unwrap().params.clone();

        assert_eq!(session.initial_guess(None), solution);

        // Changing the vary configuration invalidates the resume vector.
        session.vary.target = 1;
        assert_eq!(session.initial_guess(None), vec![0.0; 4]);
    }

    #[test]
    fn run_fit_converges_on_synthetic_data() {
        let mut session = test_session();
        let result = session.run_fit(6, Some([0.1, 0.6f64.ln(), 0.05])).unwrap();
        assert!(result.outcome.is_success(), "{:?}", result.outcome);
        assert!(result.sse < 1e-8);

        let stats = session.error_stats().unwrap();
        assert!(stats.average < 1e-8);
    }

    #[test]
    fn mismatched_geometry_is_rejected() {
        let session = test_session();
        let carousel = CarouselSet::new(session.carousel.samples.clone(), 5, 8);
        assert!(matches!(
            Session::new(
                carousel,
                session.images.clone(),
                session.source.clone(),
                session.beam.clone(),
            ),
            Err(BhcError::Configuration(_))
        ));
    }
}
