//! Parameter-vector layout for the vary groups.
//!
//! The flat vector is the concatenation, in fixed group order (target,
//! detector, filter, energy), of each enabled group's polynomial
//! coefficients in line number, lowest order first. Disabled groups
//! (order -1) are omitted entirely.

use crate::domain::{Group, VaryOrders};
use crate::error::BhcError;
use crate::math::polyval;

#[derive(Debug, Clone, Copy)]
pub struct ParamLayout {
    vary: VaryOrders,
}

impl ParamLayout {
    pub fn new(vary: VaryOrders) -> Self {
        Self { vary }
    }

    pub fn vary(&self) -> VaryOrders {
        self.vary
    }

    pub fn len(&self) -> usize {
        self.vary.param_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offset of a group's coefficients within the flat vector.
    fn offset(&self, group: Group) -> usize {
        let mut offset = 0;
        for &g in &Group::ALL {
            if g == group {
                break;
            }
            offset += self.vary.group_len(g);
        }
        offset
    }

    /// Validate a flat vector against this layout.
    pub fn check(&self, params: &[f64]) -> Result<(), BhcError> {
        if params.len() != self.len() {
            return Err(BhcError::Configuration(format!(
                "parameter vector has {} entries, vary orders require {}",
                params.len(),
                self.len()
            )));
        }
        Ok(())
    }

    /// The coefficient slice of a group, or `None` when disabled.
    pub fn group_coeffs<'a>(&self, params: &'a [f64], group: Group) -> Option<&'a [f64]> {
        let len = self.vary.group_len(group);
        if len == 0 {
            return None;
        }
        let offset = self.offset(group);
        Some(&params[offset..offset + len])
    }

    /// Evaluate a group's polynomial at the given line number, or `None`
    /// when the group is disabled.
    pub fn eval(&self, params: &[f64], group: Group, line: usize) -> Option<f64> {
        self.group_coeffs(params, group)
            .map(|coeffs| polyval(coeffs, line as f64))
    }
}
