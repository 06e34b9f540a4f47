//! Error taxonomy for the calibration engine.
//!
//! Each failure class is a distinct variant so callers can tell a
//! configuration mistake from a numerical breakdown from an I/O problem.
//! Exit codes follow the binary's convention: 2 = bad input data,
//! 3 = bad request/configuration, 4 = numerical failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BhcError {
    /// Malformed or non-monotonic attenuation/spectrum table.
    #[error("invalid table: {0}")]
    InvalidTable(String),

    /// Line or sample selection outside the loaded geometry.
    #[error("index out of range: {0}")]
    IndexOutOfRange(String),

    /// Parameter-vector length mismatch against the enabled polynomial
    /// groups, or an otherwise inconsistent engine configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Overflow or invalid value in the exponential terms. Raised in debug
    /// numeric mode; production mode clamps instead.
    #[error("numeric instability: {0}")]
    NumericInstability(String),

    /// The least-squares solver terminated with a code outside the accepted
    /// success range. Carries the solver's message and iteration count.
    #[error("fit failed to converge (code {code}, {iterations} iterations): {message}")]
    ConvergenceFailure {
        code: i32,
        iterations: usize,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(String),
}

impl BhcError {
    /// Process exit code for the `bhc` binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            BhcError::InvalidTable(_) | BhcError::Io(_) => 2,
            BhcError::IndexOutOfRange(_) | BhcError::Configuration(_) => 3,
            BhcError::NumericInstability(_) | BhcError::ConvergenceFailure { .. } => 4,
        }
    }
}
