//! Per-material mass-attenuation coefficient as a function of photon energy.
//!
//! Tables hold discrete `(energy_keV, mu/rho)` samples, typically derived
//! from standard attenuation databases (xcom-style). Lookups interpolate
//! linearly between bracketing samples; requests outside the tabulated
//! domain return the nearest boundary value rather than extrapolating.

use crate::error::BhcError;

/// Conversion from user-facing mm widths/thicknesses to the cm the
/// `cm^2/g` mass-attenuation units expect.
pub const MM_TO_CM: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct MaterialAttenuation {
    pub name: String,
    /// Tabulated density in g/cm3.
    pub density: f64,
    /// `(energy_keV, mu/rho cm^2/g)`, strictly increasing in energy.
    table: Vec<(f64, f64)>,
}

impl MaterialAttenuation {
    pub fn new(
        name: impl Into<String>,
        density: f64,
        table: Vec<(f64, f64)>,
    ) -> Result<Self, BhcError> {
        let name = name.into();
        if table.len() < 2 {
            return Err(BhcError::InvalidTable(format!(
                "material '{name}': need at least 2 samples, got {}",
                table.len()
            )));
        }
        for pair in table.windows(2) {
            if pair[1].0 <= pair[0].0 {
                return Err(BhcError::InvalidTable(format!(
                    "material '{name}': energies must be strictly increasing ({} then {})",
                    pair[0].0, pair[1].0
                )));
            }
        }
        if table
            .iter()
            .any(|&(e, mu)| !e.is_finite() || !mu.is_finite())
        {
            return Err(BhcError::InvalidTable(format!(
                "material '{name}': non-finite table entry"
            )));
        }
        Ok(Self {
            name,
            density,
            table,
        })
    }

    pub fn energy_range(&self) -> (f64, f64) {
        (self.table[0].0, self.table[self.table.len() - 1].0)
    }

    /// Mass-attenuation coefficient mu/rho (cm^2/g) at the given energy
    /// (keV). Clamped to the boundary values outside the tabulated range.
    pub fn mu(&self, energy_kev: f64) -> f64 {
        let first = self.table[0];
        let last = self.table[self.table.len() - 1];
        if energy_kev <= first.0 {
            return first.1;
        }
        if energy_kev >= last.0 {
            return last.1;
        }

        // Binary search for the bracketing pair.
        let idx = self
            .table
            .partition_point(|&(e, _)| e < energy_kev);
        let (e0, mu0) = self.table[idx - 1];
        let (e1, mu1) = self.table[idx];
        let frac = (energy_kev - e0) / (e1 - e0);
        mu0 + frac * (mu1 - mu0)
    }

    /// Linear attenuation exponent for a slab of this material:
    /// `mu/rho * density * thickness`, with thickness given in mm.
    pub fn attenuation_exponent(&self, energy_kev: f64, density: f64, thickness_mm: f64) -> f64 {
        self.mu(energy_kev) * density * thickness_mm * MM_TO_CM
    }
}
