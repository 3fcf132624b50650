//! # Rewards Core - Shared Reward Logic
//!
//! This crate contains the pure, deterministic half of the liquidity-mining
//! program. It provides:
//!
//! - Type definitions for positions, accrual records and ledger state
//! - The position eligibility classifier
//! - The multiplicative reward formula
//! - Constants and validation helpers
//!
//! ## Feature Flags
//!
//! - `client`: Enables serde serialization for off-chain storage and APIs

// Re-export all modules
pub mod constants;
pub mod eligibility;
pub mod errors;
pub mod formula;
pub mod math;
pub mod types;

// Re-export commonly used items
pub use constants::*;
pub use eligibility::{Classification, ClassifierParams, Confidence, EligibilityClassifier, PositionType};
pub use errors::{CoreResult, RewardsCoreError};
pub use formula::{AccrualBreakdown, FormulaParams, RewardFormula};
pub use types::*;
