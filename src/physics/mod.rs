//! X-ray physics primitives: mass-attenuation tables and spectra.

pub mod material;
pub mod spectrum;

pub use material::*;
pub use spectrum::*;
