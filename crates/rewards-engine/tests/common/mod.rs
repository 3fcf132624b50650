#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use rewards_core::{Address, PoolState, PositionId, PositionSnapshot, RewardAccrualRecord};
use rewards_engine::signer::ClaimSigningKey;
use rewards_engine::{EngineConfig, KeyRing, ManualClock, RewardsEngine, SharedStore, StaticFeed, TreasuryLedger};

pub const ACTIVE_KEY: &str = "calculator-1";
pub const NEXT_KEY: &str = "calculator-2";

pub fn program_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

pub fn keys() -> KeyRing {
    let mut keys = KeyRing::new();
    keys.insert(ACTIVE_KEY, ClaimSigningKey::from_seed(&[1; 32]));
    keys.insert(NEXT_KEY, ClaimSigningKey::from_seed(&[2; 32]));
    keys
}

pub fn user(n: u8) -> Address {
    Address::new([n; 20])
}

pub fn pool() -> PoolState {
    PoolState {
        total_pool_liquidity_usd: Decimal::from(100_000),
        current_pool_price: 1.0,
        token0_decimals: 6,
        token1_decimals: 6,
        observed_at: program_start(),
    }
}

pub fn snapshot(id: &str, owner: Address, lower: f64, upper: f64, liquidity_usd: i64) -> PositionSnapshot {
    PositionSnapshot {
        position_id: PositionId::new(id),
        owner,
        token0_balance: Decimal::from(1_000_000_000),
        token1_balance: Decimal::from(1_000_000_000),
        price_range_lower: lower,
        price_range_upper: upper,
        liquidity_value_usd: Decimal::from(liquidity_usd),
        is_active: true,
    }
}

pub struct Harness {
    pub engine: RewardsEngine,
    pub clock: ManualClock,
    pub feed: Arc<StaticFeed>,
}

impl Harness {
    pub fn open(store: SharedStore, clock: ManualClock) -> Self {
        let feed = Arc::new(StaticFeed::new(Vec::new(), pool()));
        let engine = RewardsEngine::assemble(
            EngineConfig::example(),
            store,
            Arc::new(clock.clone()),
            keys(),
            feed.clone(),
            feed.clone(),
        )
        .unwrap();
        Self { engine, clock, feed }
    }

    pub fn in_memory() -> Self {
        Self::open(
            Arc::new(rewards_engine::store::MemoryStore::new()),
            ManualClock::new(program_start()),
        )
    }
}

/// Grant `amount` to each owner in the next open period
pub fn credit(ledger: &TreasuryLedger, grants: &[(Address, i64)]) {
    let treasury = ledger.treasury();
    let period = treasury.last_settled_period.map(|p| p + 1).unwrap_or(0);
    let (period_start, period_end) = treasury.period_bounds(period);
    let records = grants
        .iter()
        .enumerate()
        .map(|(i, (owner, amount))| RewardAccrualRecord {
            position_id: PositionId::new(format!("credit-{}-{}", period, i)),
            owner: *owner,
            period_index: period,
            period_start,
            period_end,
            computed_amount: Decimal::from(*amount),
            accrued_amount: Decimal::ZERO,
            in_range_multiplier: Decimal::ONE,
            program_time_coefficient: Decimal::ONE,
            days_enrolled: Decimal::ZERO,
            truncated: false,
        })
        .collect();
    ledger.commit_period(period, records).unwrap();
}
