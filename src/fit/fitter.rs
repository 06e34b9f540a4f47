//! Fit of the forward-model parameter vector to calibration observations.
//!
//! The objective is the summed squared difference between
//! `ForwardModel::predict` and the line-averaged observed attenuation,
//! over lines `0..nlines` and all unmasked samples. Masked samples are
//! omitted entirely: they contribute neither to the objective nor to any
//! reported error statistic.

use log::info;
use nalgebra::DVector;

use crate::calib::CalibrationImages;
use crate::domain::{CarouselSet, ErrorStats, FitResult};
use crate::error::BhcError;
use crate::fit::lm::{minimize, LmConfig};
use crate::math::pseudo_inverse;
use crate::models::ForwardModel;

#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Half-width (pixels) of the column window averaged per line.
    pub half_width: f64,
    pub lm: LmConfig,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            half_width: 5.0,
            lm: LmConfig::default(),
        }
    }
}

pub struct Fitter<'a> {
    model: &'a ForwardModel,
    carousel: &'a CarouselSet,
    images: &'a CalibrationImages,
    options: FitOptions,
}

impl<'a> Fitter<'a> {
    pub fn new(
        model: &'a ForwardModel,
        carousel: &'a CarouselSet,
        images: &'a CalibrationImages,
        options: FitOptions,
    ) -> Result<Self, BhcError> {
        if carousel.len() != images.n_samples() {
            return Err(BhcError::Configuration(format!(
                "carousel has {} samples but calibration data has {} images",
                carousel.len(),
                images.n_samples()
            )));
        }
        Ok(Self {
            model,
            carousel,
            images,
            options,
        })
    }

    /// Fit the parameter vector over `nlines` detector lines.
    ///
    /// The returned `FitResult` always carries the classified outcome;
    /// callers decide whether a non-success code is fatal (see
    /// `FitResult`-consuming code in the pipeline).
    pub fn fit(&self, nlines: usize, initial: Vec<f64>) -> Result<FitResult, BhcError> {
        if nlines < 1 || nlines > self.images.lines() {
            return Err(BhcError::IndexOutOfRange(format!(
                "fit lines must be 1..={}, got {nlines}",
                self.images.lines()
            )));
        }
        let layout = self.model.layout();
        layout.check(&initial)?;

        let active = self.carousel.unmasked_indices();
        if active.is_empty() {
            return Err(BhcError::Configuration(
                "all samples are masked; nothing to fit".into(),
            ));
        }
        let m = nlines * active.len();
        if m < layout.len() {
            return Err(BhcError::Configuration(format!(
                "{m} observations cannot determine {} parameters",
                layout.len()
            )));
        }

        // Line-averaged observations, gathered once up front.
        let mut observed = Vec::with_capacity(m);
        for line in 0..nlines {
            for &s in &active {
                observed.push(self.images.observed_attenuation(
                    line,
                    s + 1,
                    self.options.half_width,
                )?);
            }
        }

        info!(
            "fitting {} parameters to {m} observations ({nlines} lines, {} samples)",
            layout.len(),
            active.len()
        );

        let residual_fn = |params: &DVector<f64>| -> Result<DVector<f64>, BhcError> {
            let flat: Vec<f64> = params.iter().copied().collect();
            let mut residuals = DVector::<f64>::zeros(m);
            let mut k = 0;
            for line in 0..nlines {
                let values = self.model.line_values(&flat, line)?;
                for &s in &active {
                    let sample = &self.carousel.samples[s];
                    let predicted = self.model.predict_with_values(
                        &values,
                        Some((&sample.material, sample.density, sample.thickness_mm)),
                    )?;
                    residuals[k] = predicted - observed[k];
                    k += 1;
                }
            }
            Ok(residuals)
        };

        let report = minimize(
            &residual_fn,
            DVector::from_vec(initial),
            &self.options.lm,
        )?;

        let solution: Vec<f64> = report.params.iter().copied().collect();

        // Scaled covariance at the solution: (J^T J)^-1 * SSE / (m - p).
        let p = layout.len();
        let covariance = if m > p {
            let jtj = report.jacobian.transpose() * &report.jacobian;
            pseudo_inverse(&jtj).map(|inv| {
                let scale = report.sse / (m - p) as f64;
                (0..p)
                    .map(|i| (0..p).map(|j| inv[(i, j)] * scale).collect())
                    .collect()
            })
        } else {
            None
        };

        // Predictions for every real sample, masked ones included, so the
        // caller can inspect what the masked samples would have looked like.
        let mut predicted = Vec::with_capacity(nlines);
        for line in 0..nlines {
            let values = self.model.line_values(&solution, line)?;
            let mut row = Vec::with_capacity(self.carousel.len());
            for sample in &self.carousel.samples {
                row.push(self.model.predict_with_values(
                    &values,
                    Some((&sample.material, sample.density, sample.thickness_mm)),
                )?);
            }
            predicted.push(row);
        }

        Ok(FitResult {
            vary: self.model.vary,
            params: solution,
            covariance,
            predicted,
            nlines,
            outcome: report.outcome,
            iterations: report.iterations,
            sse: report.sse,
        })
    }

    /// Per-line summed-square error between fitted predictions and
    /// observations, skipping masked samples.
    pub fn error_stats(&self, result: &FitResult) -> Result<ErrorStats, BhcError> {
        let active = self.carousel.unmasked_indices();
        let mut per_line = Vec::with_capacity(result.nlines);
        let mut total = 0.0;
        let mut max = 0.0f64;

        for line in 0..result.nlines {
            let mut sumsq = 0.0;
            for &s in &active {
                let obs =
                    self.images
                        .observed_attenuation(line, s + 1, self.options.half_width)?;
                let diff = result.predicted[line][s] - obs;
                sumsq += diff * diff;
            }
            total += sumsq;
            max = max.max(sumsq);
            per_line.push(sumsq);
        }

        Ok(ErrorStats {
            average: total / result.nlines as f64,
            max,
            per_line,
        })
    }
}
