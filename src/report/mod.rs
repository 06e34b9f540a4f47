//! Run reports: the fit log and the parameter log.

pub mod format;

pub use format::*;
