//! Budget caps hold for arbitrary accrual requests

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;

use rewards_core::{Address, PositionId, RewardAccrualRecord, TreasuryState};
use rewards_engine::store::MemoryStore;
use rewards_engine::{ClaimLimits, ManualClock, TreasuryLedger};

fn ledger(total: i64, daily: i64) -> TreasuryLedger {
    let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let treasury = TreasuryState::new(Decimal::from(total), Decimal::from(daily), start, 30, 86_400).unwrap();
    TreasuryLedger::open(
        Arc::new(MemoryStore::new()),
        Arc::new(ManualClock::new(start)),
        treasury,
        ClaimLimits::default(),
    )
    .unwrap()
}

fn records(period: u64, amounts: &[(u8, u64)]) -> Vec<RewardAccrualRecord> {
    let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    amounts
        .iter()
        .enumerate()
        .map(|(i, (owner, micros))| RewardAccrualRecord {
            position_id: PositionId::new(format!("pos-{}", i)),
            owner: Address::new([*owner; 20]),
            period_index: period,
            period_start: start,
            period_end: start,
            computed_amount: Decimal::new(*micros as i64, 6),
            accrued_amount: Decimal::ZERO,
            in_range_multiplier: Decimal::ONE,
            program_time_coefficient: Decimal::ONE,
            days_enrolled: Decimal::ZERO,
            truncated: false,
        })
        .collect()
}

proptest! {
    #[test]
    fn period_grant_never_exceeds_daily_budget(
        amounts in prop::collection::vec((1u8..8, 0u64..5_000_000_000), 1..40),
    ) {
        let ledger = ledger(1_000_000, 7_960);
        let commit = ledger.commit_period(0, records(0, &amounts)).unwrap();
        let stored = ledger.accruals_for_period(0).unwrap();

        let total: Decimal = stored.iter().map(|r| r.accrued_amount).sum();
        prop_assert!(total <= Decimal::from(7_960));
        prop_assert_eq!(total, commit.granted);
        for record in &stored {
            prop_assert!(record.accrued_amount >= Decimal::ZERO);
            prop_assert!(record.accrued_amount <= record.computed_amount);
        }
        if commit.requested <= Decimal::from(7_960) {
            prop_assert!(commit.truncation_factor.is_none());
            prop_assert!(stored.iter().all(|r| !r.truncated));
        }
    }

    #[test]
    fn lifetime_allocation_is_never_exceeded(
        periods in prop::collection::vec(prop::collection::vec((1u8..4, 0u64..9_000_000_000), 0..10), 1..12),
    ) {
        let ledger = ledger(20_000, 7_960);
        for (index, amounts) in periods.iter().enumerate() {
            ledger.commit_period(index as u64, records(index as u64, amounts)).unwrap();
            let treasury = ledger.treasury();
            prop_assert!(treasury.cumulative_accrued <= treasury.total_allocation);
        }

        let treasury = ledger.treasury();
        let credited: Decimal = (1u8..4)
            .filter_map(|n| ledger.user_state(&Address::new([n; 20])))
            .map(|u| u.cumulative_accrued)
            .sum();
        prop_assert_eq!(credited, treasury.cumulative_accrued);
    }

    #[test]
    fn claims_respect_a_growing_ceiling(
        steps in prop::collection::vec((0u64..3_000_000_000, 1u64..2_000_000_000), 1..25),
    ) {
        let ledger = ledger(1_000_000, 7_960);
        let owner = Address::new([9; 20]);
        let mut last_claimed = Decimal::ZERO;
        let mut last_ceiling = ClaimLimits::default().initial_ceiling;

        for (period, (credit, claim)) in steps.iter().enumerate() {
            ledger.commit_period(period as u64, records(period as u64, &[(9, *credit)])).unwrap();
            let decision = ledger.commit_claim(&owner, Decimal::new(*claim as i64, 6)).unwrap();

            let state = ledger.user_state(&owner).unwrap();
            prop_assert!(state.cumulative_claimed >= last_claimed);
            prop_assert!(state.cumulative_claimed <= state.current_claim_ceiling);
            prop_assert!(state.cumulative_claimed <= state.cumulative_accrued);
            prop_assert!(state.current_claim_ceiling >= last_ceiling);
            prop_assert!(state.current_claim_ceiling <= ClaimLimits::default().absolute_max);
            if !decision.is_accepted() {
                prop_assert_eq!(state.cumulative_claimed, last_claimed);
            }
            last_claimed = state.cumulative_claimed;
            last_ceiling = state.current_claim_ceiling;
        }

        prop_assert_eq!(ledger.treasury().cumulative_distributed, last_claimed);
    }
}
