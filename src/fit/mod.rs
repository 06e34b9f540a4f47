//! Nonlinear least-squares fitting of the forward model.
//!
//! Responsibilities:
//!
//! - the Levenberg-Marquardt core (`lm`)
//! - residual assembly over lines x unmasked samples, covariance and error
//!   statistics (`fitter`)
//! - the explicit session object owning all calibration state (`session`)

pub mod fitter;
pub mod lm;
pub mod session;

pub use fitter::*;
pub use lm::*;
pub use session::*;
