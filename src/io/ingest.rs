//! File ingest and validation.
//!
//! This module turns the on-disk calibration inputs into clean in-memory
//! structures that are safe to fit:
//!
//! - material attenuation tables (`<name>.txt`: optional `density` line,
//!   then `energy_keV mu_over_rho` pairs)
//! - source spectra (`energy_keV intensity` pairs)
//! - the carousel definition (geometry + one record per sample)
//! - the calibration run header + its raw little-endian f32 image file
//!
//! Design goals, same as the rest of the crate: strict schemas with line
//! numbers in every error, and no fitting logic here.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::calib::CalibrationImages;
use crate::domain::{CarouselSample, CarouselSet};
use crate::error::BhcError;
use crate::physics::{MaterialAttenuation, Spectrum};

fn read_to_string(path: &Path) -> Result<String, BhcError> {
    fs::read_to_string(path)
        .map_err(|e| BhcError::Io(format!("failed to read '{}': {e}", path.display())))
}

/// Non-empty, non-comment lines with their 1-based line numbers.
fn content_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
}

fn parse_f64(token: &str, path: &Path, lineno: usize) -> Result<f64, BhcError> {
    token.parse::<f64>().map_err(|_| {
        BhcError::InvalidTable(format!(
            "'{}' line {lineno}: expected a number, got '{token}'",
            path.display()
        ))
    })
}

/// Load a material attenuation table.
///
/// The material name is the file stem; an optional `density <g/cm3>` line
/// overrides the default density of 1.0 (correction materials are often
/// tabulated per unit density).
pub fn load_material(path: &Path) -> Result<MaterialAttenuation, BhcError> {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let text = read_to_string(path)?;

    let mut density = 1.0;
    let mut table = Vec::new();
    for (lineno, line) in content_lines(&text) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["density", value] => density = parse_f64(value, path, lineno)?,
            [energy, mu] => {
                table.push((parse_f64(energy, path, lineno)?, parse_f64(mu, path, lineno)?));
            }
            _ => {
                return Err(BhcError::InvalidTable(format!(
                    "'{}' line {lineno}: expected 'energy mu' pair, got '{line}'",
                    path.display()
                )));
            }
        }
    }

    MaterialAttenuation::new(name, density, table)
}

/// Resolve a material name to its table file under `materials_dir`.
pub fn material_path(materials_dir: &Path, name: &str) -> PathBuf {
    materials_dir.join(format!("{}.txt", name.to_lowercase()))
}

/// Cache of loaded material tables, so a material shared by several
/// samples/filters is parsed once.
#[derive(Default)]
pub struct MaterialStore {
    materials_dir: PathBuf,
    loaded: HashMap<String, MaterialAttenuation>,
}

impl MaterialStore {
    pub fn new(materials_dir: impl Into<PathBuf>) -> Self {
        Self {
            materials_dir: materials_dir.into(),
            loaded: HashMap::new(),
        }
    }

    pub fn get(&mut self, name: &str) -> Result<MaterialAttenuation, BhcError> {
        let key = name.to_lowercase();
        if let Some(mat) = self.loaded.get(&key) {
            return Ok(mat.clone());
        }
        let mat = load_material(&material_path(&self.materials_dir, name))?;
        self.loaded.insert(key, mat.clone());
        Ok(mat)
    }
}

/// Load a source spectrum table.
pub fn load_spectrum(path: &Path) -> Result<Spectrum, BhcError> {
    let text = read_to_string(path)?;
    let mut energies = Vec::new();
    let mut intensities = Vec::new();
    for (lineno, line) in content_lines(&text) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let [energy, intensity] = tokens.as_slice() else {
            return Err(BhcError::InvalidTable(format!(
                "'{}' line {lineno}: expected 'energy intensity' pair, got '{line}'",
                path.display()
            )));
        };
        energies.push(parse_f64(energy, path, lineno)?);
        intensities.push(parse_f64(intensity, path, lineno)?);
    }
    Spectrum::new(energies, intensities)
}

/// Conventional spectrum file name for a target/voltage/angle triple,
/// e.g. `W_80kV_11deg.spc`.
pub fn spectrum_path(spectra_dir: &Path, target: &str, voltage: f64, angle: f64) -> PathBuf {
    spectra_dir.join(format!("{target}_{voltage:.0}kV_{angle:.0}deg.spc"))
}

/// Load the carousel definition: geometry plus one record per sample.
pub fn load_carousel(path: &Path, materials: &mut MaterialStore) -> Result<CarouselSet, BhcError> {
    let text = read_to_string(path)?;

    let mut lines_geom: Option<usize> = None;
    let mut columns_geom: Option<usize> = None;
    let mut declared: Option<usize> = None;
    let mut samples = Vec::new();

    for (lineno, line) in content_lines(&text) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["samples", value] => {
                declared = Some(parse_usize(value, path, lineno)?);
            }
            ["lines", value] => {
                lines_geom = Some(parse_usize(value, path, lineno)?);
            }
            ["columns", value] => {
                columns_geom = Some(parse_usize(value, path, lineno)?);
            }
            [material, density, thickness] => {
                samples.push(CarouselSample {
                    material: materials.get(material)?,
                    density: parse_f64(density, path, lineno)?,
                    thickness_mm: parse_f64(thickness, path, lineno)?,
                });
            }
            _ => {
                return Err(BhcError::InvalidTable(format!(
                    "'{}' line {lineno}: unrecognized record '{line}'",
                    path.display()
                )));
            }
        }
    }

    let lines = lines_geom.ok_or_else(|| {
        BhcError::InvalidTable(format!("'{}': missing 'lines' geometry", path.display()))
    })?;
    let columns = columns_geom.ok_or_else(|| {
        BhcError::InvalidTable(format!("'{}': missing 'columns' geometry", path.display()))
    })?;
    if let Some(n) = declared {
        if n != samples.len() {
            return Err(BhcError::InvalidTable(format!(
                "'{}': declares {n} samples but lists {}",
                path.display(),
                samples.len()
            )));
        }
    }
    if samples.is_empty() {
        return Err(BhcError::InvalidTable(format!(
            "'{}': no sample records",
            path.display()
        )));
    }

    Ok(CarouselSet::new(samples, lines, columns))
}

fn parse_usize(token: &str, path: &Path, lineno: usize) -> Result<usize, BhcError> {
    token.parse::<usize>().map_err(|_| {
        BhcError::InvalidTable(format!(
            "'{}' line {lineno}: expected an integer, got '{token}'",
            path.display()
        ))
    })
}

/// Parsed calibration run header. Materials stay as names here; the
/// pipeline resolves them through the `MaterialStore`.
#[derive(Debug, Clone)]
pub struct CalibrationRun {
    pub target_name: String,
    pub target_density: f64,
    pub voltage: f64,
    pub angle: f64,
    /// `(material, width_mm, density)` per fixed filter.
    pub filters: Vec<(String, f64, f64)>,
    pub detector_name: String,
    pub detector_width_mm: f64,
    pub detector_density: f64,
    /// Image file path, relative to the run file's directory.
    pub image_file: PathBuf,
}

/// Load a calibration run header file.
pub fn load_calibration_run(path: &Path) -> Result<CalibrationRun, BhcError> {
    let text = read_to_string(path)?;

    let mut target: Option<(String, f64)> = None;
    let mut voltage: Option<f64> = None;
    let mut angle: Option<f64> = None;
    let mut filters = Vec::new();
    let mut detector: Option<(String, f64, f64)> = None;
    let mut image_file: Option<PathBuf> = None;

    for (lineno, line) in content_lines(&text) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["target", name, density] => {
                target = Some((name.to_string(), parse_f64(density, path, lineno)?));
            }
            ["voltage", value] => voltage = Some(parse_f64(value, path, lineno)?),
            ["angle", value] => angle = Some(parse_f64(value, path, lineno)?),
            ["filter", name, width, density] => {
                filters.push((
                    name.to_string(),
                    parse_f64(width, path, lineno)?,
                    parse_f64(density, path, lineno)?,
                ));
            }
            ["detector", name, width, density] => {
                detector = Some((
                    name.to_string(),
                    parse_f64(width, path, lineno)?,
                    parse_f64(density, path, lineno)?,
                ));
            }
            ["images", file] => {
                let dir = path.parent().unwrap_or_else(|| Path::new("."));
                image_file = Some(dir.join(file));
            }
            _ => {
                return Err(BhcError::InvalidTable(format!(
                    "'{}' line {lineno}: unrecognized record '{line}'",
                    path.display()
                )));
            }
        }
    }

    let missing = |field: &str| {
        BhcError::InvalidTable(format!("'{}': missing '{field}' record", path.display()))
    };
    let (target_name, target_density) = target.ok_or_else(|| missing("target"))?;
    let (detector_name, detector_width_mm, detector_density) =
        detector.ok_or_else(|| missing("detector"))?;

    Ok(CalibrationRun {
        target_name,
        target_density,
        voltage: voltage.ok_or_else(|| missing("voltage"))?,
        angle: angle.ok_or_else(|| missing("angle"))?,
        filters,
        detector_name,
        detector_width_mm,
        detector_density,
        image_file: image_file.ok_or_else(|| missing("images"))?,
    })
}

/// Load the raw per-sample image stack: little-endian f32,
/// `samples x lines x columns`, sample-major.
pub fn load_images(
    path: &Path,
    samples: usize,
    lines: usize,
    columns: usize,
) -> Result<CalibrationImages, BhcError> {
    let bytes = fs::read(path)
        .map_err(|e| BhcError::Io(format!("failed to read '{}': {e}", path.display())))?;

    let expected = samples * lines * columns * 4;
    if bytes.len() != expected {
        return Err(BhcError::InvalidTable(format!(
            "'{}': {} bytes, geometry {samples}x{lines}x{columns} (f32) needs {expected}",
            path.display(),
            bytes.len()
        )));
    }

    let per_image = lines * columns;
    let mut pixels = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]));

    let mut images = Vec::with_capacity(samples);
    for _ in 0..samples {
        images.push(pixels.by_ref().take(per_image).collect());
    }

    CalibrationImages::new(lines, columns, images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("bhc_test_{name}_{}", std::process::id()));
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    #[test]
    fn material_file_round_trip() {
        let path = write_temp(
            "al.txt",
            b"# aluminium, xcom-derived\ndensity 2.70\n10.0 26.23\n20.0 3.441\n40.0 0.5685\n",
        );
        let mat = load_material(&path).unwrap();
        assert!((mat.density - 2.70).abs() < 1e-12);
        assert!((mat.mu(20.0) - 3.441).abs() < 1e-12);
        fs::remove_file(path).ok();
    }

    #[test]
    fn malformed_material_file_stops_the_pipeline() {
        let path = write_temp("bad.txt", b"10.0 26.23\nnot-a-number 3.4\n");
        assert!(matches!(
            load_material(&path),
            Err(BhcError::InvalidTable(_))
        ));
        fs::remove_file(path).ok();
    }

    #[test]
    fn spectrum_file_parses_pairs() {
        let path = write_temp("spec.spc", b"# W 80kV\n10 0.0\n20 1.5\n30 2.5\n40 1.0\n");
        let spec = load_spectrum(&path).unwrap();
        assert_eq!(spec.len(), 4);
        assert!((spec.total_intensity() - 5.0).abs() < 1e-12);
        fs::remove_file(path).ok();
    }

    #[test]
    fn spectrum_path_convention() {
        let p = spectrum_path(Path::new("spectra"), "W", 80.0, 11.0);
        assert_eq!(p, Path::new("spectra").join("W_80kV_11deg.spc"));
    }

    #[test]
    fn calibration_run_header_parses() {
        let path = write_temp(
            "run.def",
            b"target W 19.3\nvoltage 80\nangle 11\nfilter Cu 0.1 8.96\nfilter Al 2.0 2.70\ndetector CsI 0.6 4.51\nimages calib.img\n",
        );
        let run = load_calibration_run(&path).unwrap();
        assert_eq!(run.target_name, "W");
        assert_eq!(run.filters.len(), 2);
        assert!((run.voltage - 80.0).abs() < 1e-12);
        assert_eq!(run.detector_name, "CsI");
        assert!(run.image_file.ends_with("calib.img"));
        fs::remove_file(path).ok();
    }

    #[test]
    fn image_stack_size_must_match_geometry() {
        let pixels: Vec<u8> = (0..2 * 2 * 3)
            .flat_map(|i| (i as f32).to_le_bytes())
            .collect();
        let path = write_temp("calib.img", &pixels);

        let images = load_images(&path, 2, 2, 3).unwrap();
        assert_eq!(images.n_samples(), 2);
        assert_eq!(images.image_row(1, 1).unwrap(), &[9.0, 10.0, 11.0]);

        assert!(matches!(
            load_images(&path, 2, 3, 3),
            Err(BhcError::InvalidTable(_))
        ));
        fs::remove_file(path).ok();
    }
}
