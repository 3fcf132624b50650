//! # Position Eligibility Classifier
//!
//! Classifies a position as double-sided, single-sided or unknown from its
//! token balances and price range, and derives the in-range reward
//! multiplier. Out-of-range positions and positions with unverifiable data
//! get a zero multiplier.

use rust_decimal::Decimal;

use crate::constants::*;
use crate::math::normalize_balance;
use crate::types::Position;

#[cfg(feature = "client")]
use serde::{Deserialize, Serialize};

/// Shape of the liquidity provided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "client", derive(Serialize, Deserialize))]
pub enum PositionType {
    DoubleSided,
    SingleSided,
    Unknown,
}

/// How much the classification can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "client", derive(Serialize, Deserialize))]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Classifier output for one position
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "client", derive(Serialize, Deserialize))]
pub struct Classification {
    pub position_type: PositionType,
    pub in_range: bool,
    /// Reward multiplier, exactly 0 or 1
    pub multiplier: Decimal,
    pub confidence: Confidence,
    /// token0 share of the position value, when computable
    pub balance_ratio: Option<f64>,
    pub expected_ratio: Option<f64>,
}

impl Classification {
    fn unknown() -> Self {
        Self {
            position_type: PositionType::Unknown,
            in_range: false,
            multiplier: Decimal::ZERO,
            confidence: Confidence::Low,
            balance_ratio: None,
            expected_ratio: None,
        }
    }

    fn with_range(position_type: PositionType, confidence: Confidence, in_range: bool) -> Self {
        Self {
            position_type,
            in_range,
            multiplier: if in_range { Decimal::ONE } else { Decimal::ZERO },
            confidence,
            balance_ratio: None,
            expected_ratio: None,
        }
    }
}

/// Tunable classifier thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "client", derive(Serialize, Deserialize))]
pub struct ClassifierParams {
    pub ratio_tolerance: f64,
    pub single_sided_threshold: f64,
    pub full_range_floor: f64,
    pub full_range_ceiling: f64,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            ratio_tolerance: DOUBLE_SIDED_RATIO_TOLERANCE,
            single_sided_threshold: SINGLE_SIDED_RATIO_THRESHOLD,
            full_range_floor: FULL_RANGE_PRICE_FLOOR,
            full_range_ceiling: FULL_RANGE_PRICE_CEILING,
        }
    }
}

/// Stateless position classifier
#[derive(Debug, Clone, Default)]
pub struct EligibilityClassifier {
    params: ClassifierParams,
}

impl EligibilityClassifier {
    pub fn new(params: ClassifierParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ClassifierParams {
        &self.params
    }

    /// Classify a position from its raw token balances
    pub fn classify(
        &self,
        position: &Position,
        token0_balance: Decimal,
        token1_balance: Decimal,
        token0_decimals: u32,
        token1_decimals: u32,
    ) -> Classification {
        if position.validate().is_err() || position.current_pool_price < 0.0 {
            return Classification::unknown();
        }

        let price = position.current_pool_price;
        let lower = position.price_range_lower;
        let upper = position.price_range_upper;

        if self.is_full_range(lower, upper) {
            return Classification::with_range(PositionType::DoubleSided, Confidence::High, true);
        }

        let (amount0, amount1) = match (
            normalize_balance(token0_balance, token0_decimals),
            normalize_balance(token1_balance, token1_decimals),
        ) {
            (Ok(a0), Ok(a1)) if a0.is_finite() && a1.is_finite() => (a0, a1),
            _ => return Classification::unknown(),
        };

        let in_range = position.is_in_range();

        if amount0 == 0.0 || amount1 == 0.0 {
            return Classification::with_range(PositionType::SingleSided, Confidence::High, in_range);
        }

        // Value both legs in token1 terms
        let value0 = amount0 * price;
        let total = value0 + amount1;
        if !total.is_finite() || total <= 0.0 {
            return Classification::unknown();
        }
        let balance_ratio = value0 / total;
        let expected_ratio = expected_ratio(price, lower, upper);

        let (position_type, confidence) = if (balance_ratio - expected_ratio).abs() <= self.params.ratio_tolerance {
            (PositionType::DoubleSided, Confidence::High)
        } else if balance_ratio <= self.params.single_sided_threshold
            || balance_ratio >= 1.0 - self.params.single_sided_threshold
        {
            (PositionType::SingleSided, Confidence::High)
        } else if price < lower || price > upper {
            (PositionType::SingleSided, Confidence::Medium)
        } else {
            (PositionType::DoubleSided, Confidence::Medium)
        };

        Classification {
            balance_ratio: Some(balance_ratio),
            expected_ratio: Some(expected_ratio),
            ..Classification::with_range(position_type, confidence, in_range)
        }
    }

    /// Open-ended ranges are always treated as in range
    pub fn is_full_range(&self, lower: f64, upper: f64) -> bool {
        lower <= self.params.full_range_floor && upper >= self.params.full_range_ceiling
    }
}

/// Expected token0 value share for a price inside `[lower, upper]`
pub fn expected_ratio(price: f64, lower: f64, upper: f64) -> f64 {
    if price <= lower {
        return EXPECTED_RATIO_AT_LOWER;
    }
    if price >= upper {
        return EXPECTED_RATIO_AT_UPPER;
    }
    let t = (price - lower) / (upper - lower);
    EXPECTED_RATIO_AT_LOWER + (EXPECTED_RATIO_AT_UPPER - EXPECTED_RATIO_AT_LOWER) * t
}
