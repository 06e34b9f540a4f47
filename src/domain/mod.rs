//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the carousel sample set and its exclusion mask
//! - the "vary" polynomial-order configuration per parameter group
//! - fit outputs (`FitOutcome`, `FitResult`, `ErrorStats`)
//! - the correction-table deliverable

pub mod types;

pub use types::*;
