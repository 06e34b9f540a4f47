//! Calibration image store and line averaging.
//!
//! Holds one 2D image (lines x columns) per real carousel sample. The
//! store owns the pixel data exclusively; the only mutation is the
//! explicit `transform` that converts raw intensities to log-attenuation.
//! Everything the fit reads goes through `observed_attenuation`.

use log::warn;

use crate::error::BhcError;

/// Floor applied to non-positive raw readings before taking the logarithm.
const RAW_FLOOR: f32 = 1e-4;

#[derive(Debug, Clone)]
pub struct CalibrationImages {
    lines: usize,
    columns: usize,
    /// Row-major `lines x columns` pixels per real sample.
    images: Vec<Vec<f32>>,
}

impl CalibrationImages {
    pub fn new(lines: usize, columns: usize, images: Vec<Vec<f32>>) -> Result<Self, BhcError> {
        if lines == 0 || columns == 0 {
            return Err(BhcError::Configuration(format!(
                "calibration geometry {lines}x{columns} is empty"
            )));
        }
        for (i, img) in images.iter().enumerate() {
            if img.len() != lines * columns {
                return Err(BhcError::Configuration(format!(
                    "sample {} image has {} pixels, geometry {lines}x{columns} needs {}",
                    i + 1,
                    img.len(),
                    lines * columns
                )));
            }
        }
        Ok(Self {
            lines,
            columns,
            images,
        })
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Number of real samples with image data.
    pub fn n_samples(&self) -> usize {
        self.images.len()
    }

    /// Pixel row `line` of the image for the real sample at 0-based index.
    pub fn image_row(&self, sample: usize, line: usize) -> Result<&[f32], BhcError> {
        if sample >= self.images.len() {
            return Err(BhcError::IndexOutOfRange(format!(
                "sample {} outside loaded images 1..={}",
                sample + 1,
                self.images.len()
            )));
        }
        if line >= self.lines {
            return Err(BhcError::IndexOutOfRange(format!(
                "line {line} outside 0..{}",
                self.lines
            )));
        }
        let start = line * self.columns;
        Ok(&self.images[sample][start..start + self.columns])
    }

    /// Observed log-attenuation at `(line, sample)`, averaged over columns
    /// within `half_width` pixels of the image centre.
    ///
    /// `sample` is the user-facing index: 0 is the synthetic null sample
    /// (unattenuated beam) and is by definition 0.0; samples `1..=n` map to
    /// the stored images.
    pub fn observed_attenuation(
        &self,
        line: usize,
        sample: usize,
        half_width: f64,
    ) -> Result<f64, BhcError> {
        if line >= self.lines {
            return Err(BhcError::IndexOutOfRange(format!(
                "line {line} outside 0..{}",
                self.lines
            )));
        }
        if sample == 0 {
            return Ok(0.0);
        }
        let row = self.image_row(sample - 1, line)?;

        let centre = (self.columns as f64 - 1.0) / 2.0;
        let half_width = half_width.max(0.0);
        let mut sum = 0.0;
        let mut count = 0usize;
        for (c, &v) in row.iter().enumerate() {
            if (c as f64 - centre).abs() <= half_width {
                sum += v as f64;
                count += 1;
            }
        }
        // half_width < 0.5 on an even-width image selects nothing; fall
        // back to the two centre pixels.
        if count == 0 {
            let c = self.columns / 2;
            sum = row[c] as f64;
            count = 1;
            if c > 0 {
                sum += row[c - 1] as f64;
                count = 2;
            }
        }
        Ok(sum / count as f64)
    }

    /// Convert stored raw intensities to log-attenuation in place:
    /// `v = ln(I0) - ln(max(v, 1e-4))`.
    ///
    /// Returns the number of clamped (non-positive) pixels per sample as a
    /// diagnostic; non-zero counts usually mean dead detector pixels or a
    /// wrong `I0`.
    pub fn transform(&mut self, i0: f64) -> Result<Vec<usize>, BhcError> {
        if !(i0.is_finite() && i0 > 0.0) {
            return Err(BhcError::Configuration(format!(
                "transform: I0 must be positive and finite, got {i0}"
            )));
        }
        let ln_i0 = i0.ln();
        let mut clamped = Vec::with_capacity(self.images.len());
        for (i, img) in self.images.iter_mut().enumerate() {
            let mut count = 0usize;
            for v in img.iter_mut() {
                let raw = if *v <= 0.0 {
                    count += 1;
                    RAW_FLOOR
                } else {
                    *v
                };
                *v = (ln_i0 - (raw as f64).ln()) as f32;
            }
            if count > 0 {
                warn!("transform: sample {} had {count} non-positive pixels", i + 1);
            }
            clamped.push(count);
        }
        Ok(clamped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_2x4(values: &[f32]) -> CalibrationImages {
        CalibrationImages::new(2, 4, vec![values.to_vec()]).unwrap()
    }

    #[test]
    fn averaging_uses_columns_around_centre() {
        let store = store_2x4(&[
            1.0, 2.0, 4.0, 8.0, // line 0
            0.0, 0.0, 0.0, 0.0, // line 1
        ]);
        // centre = 1.5; half_width 0.5 selects columns 1 and 2.
        let v = store.observed_attenuation(0, 1, 0.5).unwrap();
        assert!((v - 3.0).abs() < 1e-9);
        // A wide half-width averages the whole row.
        let v = store.observed_attenuation(0, 1, 10.0).unwrap();
        assert!((v - 3.75).abs() < 1e-9);
    }

    #[test]
    fn null_sample_is_zero_and_bounds_are_checked() {
        let store = store_2x4(&[0.0; 8]);
        assert_eq!(store.observed_attenuation(1, 0, 2.0).unwrap(), 0.0);

        assert!(matches!(
            store.observed_attenuation(2, 1, 2.0),
            Err(BhcError::IndexOutOfRange(_))
        ));
        assert!(matches!(
            store.observed_attenuation(0, 2, 2.0),
            Err(BhcError::IndexOutOfRange(_))
        ));
    }

    #[test]
    fn transform_clamps_and_counts_non_positive_pixels() {
        let mut store = store_2x4(&[100.0, 0.0, -3.0, 100.0, 100.0, 100.0, 100.0, 100.0]);
        let clamped = store.transform(100.0).unwrap();
        assert_eq!(clamped, vec![2]);

        // ln(100) - ln(100) = 0 for the untouched pixels.
        let row = store.image_row(0, 1).unwrap();
        for &v in row {
            assert!(v.abs() < 1e-6);
        }
        // The clamped pixels become ln(100) - ln(1e-4), strongly positive.
        let row0 = store.image_row(0, 0).unwrap();
        assert!(row0[1] > 10.0 && row0[2] > 10.0);
    }

    #[test]
    fn transform_rejects_bad_i0() {
        let mut store = store_2x4(&[1.0; 8]);
        assert!(store.transform(0.0).is_err());
        assert!(store.transform(f64::NAN).is_err());
    }

    #[test]
    fn geometry_mismatch_is_rejected_at_construction() {
        assert!(CalibrationImages::new(2, 4, vec![vec![0.0; 7]]).is_err());
    }
}
