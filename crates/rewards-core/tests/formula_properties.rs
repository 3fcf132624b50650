//! Property-based tests for the reward formula and the eligibility classifier.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;

use rewards_core::{
    Address, EligibilityClassifier, Position, PositionId, PositionType, RewardFormula,
};

// ============================================================================
// Test Strategies
// ============================================================================

/// Liquidity values in cents, up to ten million USD
fn liquidity_cents() -> impl Strategy<Value = i64> {
    0i64..1_000_000_000
}

/// Enrollment in hours, up to three years
fn enrolled_hours() -> impl Strategy<Value = i64> {
    0i64..(3 * 365 * 24)
}

fn budget() -> impl Strategy<Value = i64> {
    1i64..100_000
}

fn cents(v: i64) -> Decimal {
    Decimal::new(v, 2)
}

fn days(hours: i64) -> Decimal {
    Decimal::from(hours) / Decimal::from(24)
}

fn position(lower: f64, upper: f64, price: f64) -> Position {
    Position {
        position_id: PositionId::new("prop"),
        owner: Address::default(),
        liquidity_value_usd: Decimal::from(500),
        price_range_lower: lower,
        price_range_upper: upper,
        current_pool_price: price,
        enrolled_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        is_active: true,
    }
}

// ============================================================================
// Formula Properties
// ============================================================================

proptest! {
    /// Identical inputs always give identical outputs
    #[test]
    fn prop_formula_is_deterministic(
        liq in liquidity_cents(),
        extra in liquidity_cents(),
        hours in enrolled_hours(),
        budget in budget(),
    ) {
        let formula = RewardFormula::default();
        let total = cents(liq) + cents(extra) + Decimal::ONE;
        let first = formula.compute_daily_accrual(cents(liq), total, days(hours), Decimal::ONE, Decimal::from(budget)).unwrap();
        for _ in 0..3 {
            let again = formula.compute_daily_accrual(cents(liq), total, days(hours), Decimal::ONE, Decimal::from(budget)).unwrap();
            prop_assert_eq!(first, again);
            prop_assert_eq!(first.serialize(), again.serialize());
        }
    }

    /// Out-of-range positions accrue exactly zero regardless of size
    #[test]
    fn prop_zero_multiplier_accrues_nothing(
        liq in liquidity_cents(),
        hours in enrolled_hours(),
        budget in budget(),
    ) {
        let formula = RewardFormula::default();
        let total = cents(liq) + Decimal::ONE;
        let accrued = formula.compute_daily_accrual(cents(liq), total, days(hours), Decimal::ZERO, Decimal::from(budget)).unwrap();
        prop_assert_eq!(accrued, Decimal::ZERO);
    }

    /// A single position never earns more than its share of the budget
    #[test]
    fn prop_accrual_bounded_by_share_of_budget(
        liq in liquidity_cents(),
        extra in liquidity_cents(),
        hours in enrolled_hours(),
        budget in budget(),
    ) {
        let formula = RewardFormula::default();
        let total = cents(liq) + cents(extra) + Decimal::ONE;
        let budget = Decimal::from(budget);
        let accrued = formula.compute_daily_accrual(cents(liq), total, days(hours), Decimal::ONE, budget).unwrap();
        let share_of_budget = cents(liq) / total * budget;
        prop_assert!(accrued >= Decimal::ZERO);
        prop_assert!(accrued <= share_of_budget + Decimal::new(1, 20));
        prop_assert!(accrued <= budget);
    }

    /// Longer enrollment never lowers the coefficient, and it stays in [0.6, 1.0]
    #[test]
    fn prop_time_coefficient_monotonic_and_bounded(a in enrolled_hours(), b in enrolled_hours()) {
        let formula = RewardFormula::default();
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let c_lo = formula.time_coefficient(days(lo)).unwrap();
        let c_hi = formula.time_coefficient(days(hi)).unwrap();
        prop_assert!(c_lo <= c_hi);
        prop_assert!(c_lo >= Decimal::new(6, 1));
        prop_assert!(c_hi <= Decimal::ONE);
    }

    /// Coefficient growth over the horizon is bounded at +67%
    #[test]
    fn prop_growth_is_bounded(liq in 1i64..1_000_000_000, hours in enrolled_hours()) {
        let formula = RewardFormula::default();
        let total = cents(liq) * Decimal::from(10);
        let fresh = formula.compute_daily_accrual(cents(liq), total, Decimal::ZERO, Decimal::ONE, Decimal::from(7_960)).unwrap();
        let aged = formula.compute_daily_accrual(cents(liq), total, days(hours), Decimal::ONE, Decimal::from(7_960)).unwrap();
        prop_assert!(aged <= fresh * Decimal::new(1_667, 3) + Decimal::new(1, 18));
    }
}

// ============================================================================
// Classifier Properties
// ============================================================================

proptest! {
    /// Any pool price outside the range yields a zero multiplier
    #[test]
    fn prop_out_of_range_multiplier_is_zero(
        lower in 0.01f64..100.0,
        width in 0.01f64..100.0,
        offset in 0.001f64..50.0,
        above in any::<bool>(),
        b0 in 0i64..10_000_000_000,
        b1 in 0i64..10_000_000_000,
    ) {
        let upper = lower + width;
        let price = if above { upper + offset } else { (lower - offset).max(0.0) };
        prop_assume!(price < lower || price > upper);
        let c = EligibilityClassifier::default().classify(
            &position(lower, upper, price),
            Decimal::from(b0),
            Decimal::from(b1),
            6,
            18,
        );
        prop_assert!(!c.in_range);
        prop_assert_eq!(c.multiplier, Decimal::ZERO);
    }

    /// Non-finite prices are never rewarded
    #[test]
    fn prop_non_finite_price_is_unknown(b0 in 0i64..1_000_000, b1 in 0i64..1_000_000) {
        for price in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let c = EligibilityClassifier::default().classify(
                &position(1.0, 2.0, price),
                Decimal::from(b0),
                Decimal::from(b1),
                6,
                6,
            );
            prop_assert_eq!(c.position_type, PositionType::Unknown);
            prop_assert_eq!(c.multiplier, Decimal::ZERO);
        }
    }
}
