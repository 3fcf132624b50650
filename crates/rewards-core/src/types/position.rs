//! # Position Types
//!
//! Concentrated-liquidity positions as seen by the reward program: the raw
//! snapshot handed over by the valuation feed, the pool state it is priced
//! against, and the assembled `Position` the formula consumes.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::constants::SECONDS_PER_DAY;
use crate::errors::{CoreResult, RewardsCoreError};
use crate::math::{ensure_finite, ensure_non_negative, safe_div};
use crate::types::address::Address;

#[cfg(feature = "client")]
use serde::{Deserialize, Serialize};

/// Opaque external position identifier (NFT id on the host chain)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "client", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "client", serde(transparent))]
pub struct PositionId(pub String);

impl PositionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-position data pushed by the external valuation service
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "client", derive(Serialize, Deserialize))]
pub struct PositionSnapshot {
    pub position_id: PositionId,
    pub owner: Address,
    /// Raw token0 balance in base units
    pub token0_balance: Decimal,
    /// Raw token1 balance in base units
    pub token1_balance: Decimal,
    pub price_range_lower: f64,
    pub price_range_upper: f64,
    /// USD value of both token balances
    pub liquidity_value_usd: Decimal,
    pub is_active: bool,
}

/// Pool-wide state from the pool feed
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "client", derive(Serialize, Deserialize))]
pub struct PoolState {
    pub total_pool_liquidity_usd: Decimal,
    /// Price of token0 denominated in token1
    pub current_pool_price: f64,
    pub token0_decimals: u32,
    pub token1_decimals: u32,
    pub observed_at: DateTime<Utc>,
}

impl PoolState {
    /// Validate pool-level invariants
    pub fn validate(&self) -> CoreResult<()> {
        ensure_non_negative("total_pool_liquidity_usd", self.total_pool_liquidity_usd)?;
        let price = ensure_finite("current_pool_price", self.current_pool_price)?;
        if price < 0.0 {
            return Err(RewardsCoreError::NegativeValue("current_pool_price"));
        }
        Ok(())
    }
}

/// Registration of a position with the program
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "client", derive(Serialize, Deserialize))]
pub struct Enrollment {
    pub position_id: PositionId,
    pub owner: Address,
    pub enrolled_at: DateTime<Utc>,
}

/// One enrolled concentrated-liquidity position
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "client", derive(Serialize, Deserialize))]
pub struct Position {
    pub position_id: PositionId,
    pub owner: Address,
    pub liquidity_value_usd: Decimal,
    pub price_range_lower: f64,
    pub price_range_upper: f64,
    pub current_pool_price: f64,
    pub enrolled_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Position {
    /// Assemble a position from its enrollment, latest snapshot and pool price
    pub fn from_snapshot(
        enrollment: &Enrollment,
        snapshot: &PositionSnapshot,
        pool: &PoolState,
    ) -> CoreResult<Self> {
        if enrollment.position_id != snapshot.position_id {
            return Err(RewardsCoreError::invalid_parameter(
                "position_id",
                format!("snapshot {} does not match enrollment {}", snapshot.position_id, enrollment.position_id),
            ));
        }
        if enrollment.owner != snapshot.owner {
            return Err(RewardsCoreError::invalid_parameter(
                "owner",
                format!("snapshot owner {} differs from enrolled owner {}", snapshot.owner, enrollment.owner),
            ));
        }

        let position = Self {
            position_id: snapshot.position_id.clone(),
            owner: snapshot.owner,
            liquidity_value_usd: snapshot.liquidity_value_usd,
            price_range_lower: snapshot.price_range_lower,
            price_range_upper: snapshot.price_range_upper,
            current_pool_price: pool.current_pool_price,
            enrolled_at: enrollment.enrolled_at,
            is_active: snapshot.is_active,
        };
        position.validate()?;
        Ok(position)
    }

    /// Check `lower < upper`, finite prices and non-negative value
    pub fn validate(&self) -> CoreResult<()> {
        ensure_non_negative("liquidity_value_usd", self.liquidity_value_usd)?;
        let lower = ensure_finite("price_range_lower", self.price_range_lower)?;
        let upper = ensure_finite("price_range_upper", self.price_range_upper)?;
        ensure_finite("current_pool_price", self.current_pool_price)?;
        if lower < 0.0 {
            return Err(RewardsCoreError::NegativeValue("price_range_lower"));
        }
        if lower >= upper {
            return Err(RewardsCoreError::invalid_price_range(lower, upper));
        }
        Ok(())
    }

    /// Whether the pool price sits inside the configured bounds
    pub fn is_in_range(&self) -> bool {
        self.price_range_lower <= self.current_pool_price
            && self.current_pool_price <= self.price_range_upper
    }

    /// Fractional days enrolled as of `at` (zero if enrolled later)
    pub fn days_enrolled_at(&self, at: DateTime<Utc>) -> CoreResult<Decimal> {
        let elapsed = (at - self.enrolled_at).num_seconds().max(0);
        safe_div(Decimal::from(elapsed), Decimal::from(SECONDS_PER_DAY))
    }
}
