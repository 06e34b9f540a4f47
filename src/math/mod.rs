//! Mathematical utilities: least-squares solves and polynomial helpers.

pub mod ols;
pub mod poly;

pub use ols::*;
pub use poly::*;
