//! Correction-coefficient artifacts.
//!
//! Two renditions of the same table are written side by side: a JSON
//! document carrying the run metadata for humans and downstream scripts,
//! and a compact binary file for reconstruction codes that want to mmap
//! the coefficients straight into the correction loop.

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::CorrectionTable;
use crate::error::BhcError;

/// JSON envelope around the coefficient matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionFile {
    pub tool: String,
    /// UTC timestamp of the run, RFC 3339.
    pub generated: String,
    /// Correction material name and the target single energy in keV.
    pub material: String,
    pub energy_kev: f64,
    pub lines: usize,
    /// Polynomial order; every row of `coefficients` has `order + 1`
    /// entries, lowest order first.
    pub order: usize,
    pub coefficients: Vec<Vec<f64>>,
}

impl CorrectionFile {
    pub fn from_table(table: &CorrectionTable, material: &str, energy_kev: f64) -> Self {
        let order = table.polyfit.first().map(|c| c.len() - 1).unwrap_or(0);
        Self {
            tool: format!("carousel-bhc {}", env!("CARGO_PKG_VERSION")),
            generated: Utc::now().to_rfc3339(),
            material: material.to_string(),
            energy_kev,
            lines: table.polyfit.len(),
            order,
            coefficients: table.polyfit.clone(),
        }
    }
}

/// Write the JSON rendition.
pub fn write_correction_json(path: &Path, file: &CorrectionFile) -> Result<(), BhcError> {
    let json = serde_json::to_string_pretty(file)
        .map_err(|e| BhcError::Io(format!("failed to serialize correction table: {e}")))?;
    fs::write(path, json)
        .map_err(|e| BhcError::Io(format!("failed to write '{}': {e}", path.display())))
}

/// Write the binary rendition: `u32 lines`, `u32 ncoef`, then the
/// row-major coefficient matrix as little-endian f64.
pub fn write_correction_bin(path: &Path, table: &CorrectionTable) -> Result<(), BhcError> {
    let lines = table.polyfit.len();
    let ncoef = table.polyfit.first().map(Vec::len).unwrap_or(0);
    if table.polyfit.iter().any(|row| row.len() != ncoef) {
        return Err(BhcError::Io(
            "correction table rows have inconsistent lengths".to_string(),
        ));
    }

    let mut buf = Vec::with_capacity(8 + lines * ncoef * 8);
    buf.extend_from_slice(&(lines as u32).to_le_bytes());
    buf.extend_from_slice(&(ncoef as u32).to_le_bytes());
    for row in &table.polyfit {
        for c in row {
            buf.extend_from_slice(&c.to_le_bytes());
        }
    }

    let mut f = fs::File::create(path)
        .map_err(|e| BhcError::Io(format!("failed to create '{}': {e}", path.display())))?;
    f.write_all(&buf)
        .map_err(|e| BhcError::Io(format!("failed to write '{}': {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> CorrectionTable {
        CorrectionTable {
            xtab: vec![vec![0.0, 0.5, 1.0]; 2],
            ytab: vec![0.0, 0.4, 0.8],
            polyfit: vec![vec![0.0, 0.8, 0.01], vec![0.0, 0.79, 0.012]],
        }
    }

    #[test]
    fn json_envelope_carries_shape_metadata() {
        let file = CorrectionFile::from_table(&sample_table(), "al", 40.0);
        assert_eq!(file.lines, 2);
        assert_eq!(file.order, 2);
        assert_eq!(file.material, "al");

        let json = serde_json::to_string(&file).unwrap();
        let back: CorrectionFile = serde_json::from_str(&json).unwrap();
        assert_eq!(back.coefficients, file.coefficients);
    }

    #[test]
    fn binary_rendition_round_trips() {
        let table = sample_table();
        let path = std::env::temp_dir().join(format!("bhc_test_poly_{}.bin", std::process::id()));
        write_correction_bin(&path, &table).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 8 + 2 * 3 * 8);
        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 3);
        let first = f64::from_le_bytes(bytes[8..16].try_into().unwrap());
        assert_eq!(first, table.polyfit[0][0]);
        fs::remove_file(path).ok();
    }
}
