//! # Safe Math Operations
//!
//! Overflow-checked decimal arithmetic and input guards. Every reward amount
//! passes through these helpers so that a bad feed surfaces as an error
//! instead of a silently absorbed zero.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::constants::{MAX_TOKEN_DECIMALS, TOKEN_AMOUNT_SCALE};
use crate::errors::{CoreResult, RewardsCoreError};

/// Macro to generate safe arithmetic functions
macro_rules! safe_arith {
    // Division must come first: `div` would also match `$fn_name:ident`
    (div, $fn_name:ident, $type:ty, $zero:expr) => {
        /// Safe division with zero check
        pub fn $fn_name(a: $type, b: $type) -> CoreResult<$type> {
            if b == $zero {
                return Err(RewardsCoreError::DivisionByZero);
            }
            a.checked_div(b).ok_or(RewardsCoreError::MathOverflow)
        }
    };

    // Binary operations with checked methods
    ($fn_name:ident, $type:ty, $checked_method:ident, $error:expr) => {
        /// Checked arithmetic returning a core error on overflow
        pub fn $fn_name(a: $type, b: $type) -> CoreResult<$type> {
            a.$checked_method(b).ok_or($error)
        }
    };
}

// Generate basic arithmetic functions
safe_arith!(safe_add, Decimal, checked_add, RewardsCoreError::MathOverflow);
safe_arith!(safe_sub, Decimal, checked_sub, RewardsCoreError::MathOverflow);
safe_arith!(safe_mul, Decimal, checked_mul, RewardsCoreError::MathOverflow);
safe_arith!(div, safe_div, Decimal, Decimal::ZERO);

safe_arith!(safe_add_u64, u64, checked_add, RewardsCoreError::MathOverflow);

/// Reject negative decimal inputs
pub fn ensure_non_negative(name: &'static str, value: Decimal) -> CoreResult<Decimal> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(RewardsCoreError::NegativeValue(name));
    }
    Ok(value)
}

/// Reject NaN and infinities coming from floating point feeds
pub fn ensure_finite(name: &'static str, value: f64) -> CoreResult<f64> {
    if !value.is_finite() {
        return Err(RewardsCoreError::NonFiniteValue(name));
    }
    Ok(value)
}

/// Truncate a token amount to the recorded precision (toward zero)
pub fn truncate_amount(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(TOKEN_AMOUNT_SCALE, RoundingStrategy::ToZero)
}

/// Convert a token amount into integer base units, truncating dust
///
/// Scales the u128 mantissa directly; `amount * 10^decimals` may not fit a `Decimal`.
pub fn to_base_units(amount: Decimal, decimals: u32) -> CoreResult<u128> {
    ensure_non_negative("amount", amount)?;
    if decimals > MAX_TOKEN_DECIMALS {
        return Err(RewardsCoreError::invalid_parameter(
            "token_decimals",
            format!("{} exceeds {}", decimals, MAX_TOKEN_DECIMALS),
        ));
    }
    let mantissa = u128::try_from(amount.mantissa()).map_err(|_| RewardsCoreError::ConversionError)?;
    let scale = amount.scale();
    if scale >= decimals {
        let divisor = 10u128.checked_pow(scale - decimals).ok_or(RewardsCoreError::MathOverflow)?;
        Ok(mantissa / divisor)
    } else {
        let factor = 10u128.checked_pow(decimals - scale).ok_or(RewardsCoreError::MathOverflow)?;
        mantissa.checked_mul(factor).ok_or(RewardsCoreError::MathOverflow)
    }
}

/// Normalize a raw token balance by its decimals into a float
pub fn normalize_balance(raw: Decimal, decimals: u32) -> CoreResult<f64> {
    ensure_non_negative("token_balance", raw)?;
    let value = raw.to_f64().ok_or(RewardsCoreError::ConversionError)?;
    Ok(value / 10f64.powi(decimals as i32))
}

/// Convert a float into a decimal, rejecting non-finite input
pub fn decimal_from_f64(name: &'static str, value: f64) -> CoreResult<Decimal> {
    ensure_finite(name, value)?;
    Decimal::from_f64(value).ok_or(RewardsCoreError::ConversionError)
}
