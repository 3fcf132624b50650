//! # Mathematical Functions
//!
//! Checked decimal arithmetic and amount conversions used by the formula
//! engine and the ledger.

pub mod safe_math;

// Re-export commonly used functions
pub use safe_math::*;
