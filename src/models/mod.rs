//! The physical forward model and its parameterization.
//!
//! The fitter relies on two primitive operations:
//! - split/evaluate the flat parameter vector per group at a line number
//! - predict the log-attenuation of a slab through the modelled beam
//!
//! Parameters are not per-line free variables but coefficients of a low
//! order polynomial in line number, one polynomial per group. That is the
//! device that keeps the parameter count tractable across hundreds of
//! detector lines.

pub mod forward;
pub mod params;

pub use forward::*;
pub use params::*;
