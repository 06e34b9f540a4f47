//! Input/output helpers.
//!
//! - text-table and raw-image ingest + validation (`ingest`)
//! - correction-coefficient artifacts (`export`)

pub mod export;
pub mod ingest;

pub use export::*;
pub use ingest::*;
