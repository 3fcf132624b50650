//! # Core Type Definitions
//!
//! Data model shared by the formula engine, the treasury ledger and the
//! claim authorization service.

pub mod accrual;
pub mod address;
pub mod claim;
pub mod ledger;
pub mod position;

// Re-export all types
pub use accrual::*;
pub use address::*;
pub use claim::*;
pub use ledger::*;
pub use position::*;
