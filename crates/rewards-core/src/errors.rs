//! # Core Error Types
//!
//! Errors raised by the pure reward logic. The engine wraps these into its
//! own taxonomy; every variant here maps to an invalid upstream input.

use thiserror::Error;

#[cfg(feature = "client")]
use serde::Serialize;

/// Core reward-logic errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "client", derive(Serialize))]
pub enum RewardsCoreError {
    // ========================================================================
    // Math Errors
    // ========================================================================

    #[error("Math overflow")]
    MathOverflow,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Conversion error")]
    ConversionError,

    // ========================================================================
    // Validation Errors
    // ========================================================================

    #[error("Negative value for {0}")]
    NegativeValue(&'static str),

    #[error("Non-finite value for {0}")]
    NonFiniteValue(&'static str),

    #[error("Invalid price range: lower {lower} must be below upper {upper}")]
    InvalidPriceRange { lower: String, upper: String },

    #[error("Multiplier {0} outside [0, 1]")]
    InvalidMultiplier(String),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Result type using core errors
pub type CoreResult<T> = Result<T, RewardsCoreError>;

// Helper functions for creating specific errors
impl RewardsCoreError {
    /// Create an invalid parameter error with reason
    pub fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// Create an invalid price range error
    pub fn invalid_price_range(lower: f64, upper: f64) -> Self {
        Self::InvalidPriceRange {
            lower: lower.to_string(),
            upper: upper.to_string(),
        }
    }
}
