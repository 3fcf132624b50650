//! # Reward Formula Engine
//!
//! Daily accrual for one position:
//!
//! ```text
//! accrued = (liquidity / total_liquidity) * time_coefficient(days) * daily_budget * multiplier
//! time_coefficient(d) = min_c + (max_c - min_c) * min(d / horizon_days, 1)
//! ```
//!
//! The time coefficient scales an already proportional liquidity share, so
//! enrollment time alone can never make a dust position earn a large share.
//! All arithmetic is exact decimal: identical inputs give identical outputs.

use rust_decimal::Decimal;

use crate::constants::*;
use crate::errors::{CoreResult, RewardsCoreError};
use crate::math::{ensure_non_negative, safe_div, safe_mul, safe_sub};

#[cfg(feature = "client")]
use serde::{Deserialize, Serialize};

/// Formula parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "client", derive(Serialize, Deserialize))]
pub struct FormulaParams {
    pub min_coefficient: Decimal,
    pub max_coefficient: Decimal,
    pub enrollment_horizon_days: u32,
}

impl Default for FormulaParams {
    fn default() -> Self {
        Self {
            min_coefficient: MIN_TIME_COEFFICIENT,
            max_coefficient: MAX_TIME_COEFFICIENT,
            enrollment_horizon_days: DEFAULT_ENROLLMENT_HORIZON_DAYS,
        }
    }
}

impl FormulaParams {
    pub fn validate(&self) -> CoreResult<()> {
        ensure_non_negative("min_coefficient", self.min_coefficient)?;
        if self.min_coefficient > self.max_coefficient {
            return Err(RewardsCoreError::invalid_parameter(
                "min_coefficient",
                format!("{} exceeds max_coefficient {}", self.min_coefficient, self.max_coefficient),
            ));
        }
        if self.max_coefficient > Decimal::ONE {
            return Err(RewardsCoreError::invalid_parameter("max_coefficient", "must not exceed 1.0"));
        }
        if self.enrollment_horizon_days == 0 {
            return Err(RewardsCoreError::invalid_parameter("enrollment_horizon_days", "must be positive"));
        }
        Ok(())
    }
}

/// Intermediate values of one accrual computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "client", derive(Serialize, Deserialize))]
pub struct AccrualBreakdown {
    pub liquidity_share: Decimal,
    pub time_coefficient: Decimal,
    pub amount: Decimal,
}

/// Pure reward formula
#[derive(Debug, Clone, Default)]
pub struct RewardFormula {
    params: FormulaParams,
}

impl RewardFormula {
    pub fn new(params: FormulaParams) -> CoreResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &FormulaParams {
        &self.params
    }

    /// Bounded, monotonic coefficient for the enrollment duration
    pub fn time_coefficient(&self, days_enrolled: Decimal) -> CoreResult<Decimal> {
        ensure_non_negative("days_enrolled", days_enrolled)?;
        let horizon = Decimal::from(self.params.enrollment_horizon_days);
        let progress = safe_div(days_enrolled, horizon)?.min(Decimal::ONE);
        let span = safe_sub(self.params.max_coefficient, self.params.min_coefficient)?;
        let coefficient = self.params.min_coefficient + safe_mul(span, progress)?;
        Ok(coefficient.min(self.params.max_coefficient))
    }

    /// Daily accrual in program tokens
    pub fn compute_daily_accrual(
        &self,
        liquidity_value_usd: Decimal,
        total_pool_liquidity_usd: Decimal,
        days_enrolled: Decimal,
        in_range_multiplier: Decimal,
        daily_budget: Decimal,
    ) -> CoreResult<Decimal> {
        self.breakdown(
            liquidity_value_usd,
            total_pool_liquidity_usd,
            days_enrolled,
            in_range_multiplier,
            daily_budget,
        )
        .map(|b| b.amount)
    }

    /// Same as `compute_daily_accrual`, keeping the intermediate values
    pub fn breakdown(
        &self,
        liquidity_value_usd: Decimal,
        total_pool_liquidity_usd: Decimal,
        days_enrolled: Decimal,
        in_range_multiplier: Decimal,
        daily_budget: Decimal,
    ) -> CoreResult<AccrualBreakdown> {
        ensure_non_negative("liquidity_value_usd", liquidity_value_usd)?;
        ensure_non_negative("total_pool_liquidity_usd", total_pool_liquidity_usd)?;
        ensure_non_negative("daily_budget", daily_budget)?;
        if in_range_multiplier < Decimal::ZERO || in_range_multiplier > Decimal::ONE {
            return Err(RewardsCoreError::InvalidMultiplier(in_range_multiplier.to_string()));
        }
        let time_coefficient = self.time_coefficient(days_enrolled)?;

        if total_pool_liquidity_usd.is_zero() {
            return Ok(AccrualBreakdown {
                liquidity_share: Decimal::ZERO,
                time_coefficient,
                amount: Decimal::ZERO,
            });
        }
        if liquidity_value_usd > total_pool_liquidity_usd {
            return Err(RewardsCoreError::invalid_parameter(
                "liquidity_value_usd",
                format!("{} exceeds total pool liquidity {}", liquidity_value_usd, total_pool_liquidity_usd),
            ));
        }

        let liquidity_share = safe_div(liquidity_value_usd, total_pool_liquidity_usd)?;
        if in_range_multiplier.is_zero() {
            return Ok(AccrualBreakdown {
                liquidity_share,
                time_coefficient,
                amount: Decimal::ZERO,
            });
        }

        let amount = safe_mul(
            safe_mul(safe_mul(liquidity_share, time_coefficient)?, daily_budget)?,
            in_range_multiplier,
        )?;

        Ok(AccrualBreakdown {
            liquidity_share,
            time_coefficient,
            amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_time_coefficient_bounds() {
        let f = RewardFormula::default();
        assert_eq!(f.time_coefficient(Decimal::ZERO).unwrap(), d("0.6"));
        assert_eq!(f.time_coefficient(Decimal::from(365)).unwrap(), Decimal::ONE);
        assert_eq!(f.time_coefficient(Decimal::from(10_000)).unwrap(), Decimal::ONE);
        let mid = f.time_coefficient(Decimal::from(180)).unwrap();
        assert!(mid > d("0.797") && mid < d("0.798"));
    }

    #[test]
    fn test_half_year_example() {
        let f = RewardFormula::default();
        let accrued = f
            .compute_daily_accrual(
                Decimal::from(1_000),
                Decimal::from(100_000),
                Decimal::from(180),
                Decimal::ONE,
                Decimal::from(7_960),
            )
            .unwrap();
        assert!(accrued > d("63.46") && accrued < d("63.47"), "got {}", accrued);
    }

    #[test]
    fn test_full_horizon_example() {
        let f = RewardFormula::default();
        let accrued = f
            .compute_daily_accrual(
                Decimal::from(1_000),
                Decimal::from(100_000),
                Decimal::from(365),
                Decimal::ONE,
                Decimal::from(7_960),
            )
            .unwrap();
        assert_eq!(accrued, d("79.6"));
    }

    #[test]
    fn test_zero_total_liquidity_yields_zero() {
        let f = RewardFormula::default();
        let accrued = f
            .compute_daily_accrual(Decimal::from(10), Decimal::ZERO, Decimal::ONE, Decimal::ONE, Decimal::from(100))
            .unwrap();
        assert_eq!(accrued, Decimal::ZERO);
    }

    #[test]
    fn test_negative_inputs_are_errors() {
        let f = RewardFormula::default();
        assert!(f
            .compute_daily_accrual(Decimal::from(-1), Decimal::from(10), Decimal::ONE, Decimal::ONE, Decimal::from(100))
            .is_err());
        assert!(f
            .compute_daily_accrual(Decimal::ONE, Decimal::from(10), Decimal::from(-2), Decimal::ONE, Decimal::from(100))
            .is_err());
        assert!(f
            .compute_daily_accrual(Decimal::ONE, Decimal::from(10), Decimal::ONE, d("1.5"), Decimal::from(100))
            .is_err());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = FormulaParams {
            min_coefficient: d("0.9"),
            max_coefficient: d("0.5"),
            enrollment_horizon_days: 365,
        };
        assert!(RewardFormula::new(params).is_err());
    }
}
