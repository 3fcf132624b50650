use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use rewards_core::{
    Address, CalculatorAuthorization, Enrollment, PositionId, RewardAccrualRecord, SettlementRecord,
    TreasuryState, UserClaimState,
};

use super::{StateStore, StoreBatch};
use crate::error::EngineResult;

/// Complete engine state, as held in memory and written by the file store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StateImage {
    pub treasury: Option<TreasuryState>,
    pub users: BTreeMap<Address, UserClaimState>,
    pub accruals: BTreeMap<u64, BTreeMap<PositionId, RewardAccrualRecord>>,
    pub authorization: Option<CalculatorAuthorization>,
    pub enrollments: BTreeMap<PositionId, Enrollment>,
    pub settlements: BTreeMap<String, SettlementRecord>,
}

impl StateImage {
    pub fn apply(&mut self, batch: StoreBatch) {
        if let Some(treasury) = batch.treasury {
            self.treasury = Some(treasury);
        }
        for user in batch.users {
            self.users.insert(user.address, user);
        }
        for record in batch.accruals {
            self.accruals
                .entry(record.period_index)
                .or_default()
                .insert(record.position_id.clone(), record);
        }
        if let Some(authorization) = batch.authorization {
            self.authorization = Some(authorization);
        }
        for enrollment in batch.enrollments {
            self.enrollments.insert(enrollment.position_id.clone(), enrollment);
        }
        for settlement in batch.settlements {
            self.settlements.insert(settlement.tx_hash.clone(), settlement);
        }
    }

    pub fn accruals_for_period(&self, period_index: u64) -> Vec<RewardAccrualRecord> {
        self.accruals
            .get(&period_index)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Volatile store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StateImage>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load_treasury(&self) -> EngineResult<Option<TreasuryState>> {
        Ok(self.state.read().treasury.clone())
    }

    fn load_users(&self) -> EngineResult<Vec<UserClaimState>> {
        Ok(self.state.read().users.values().cloned().collect())
    }

    fn load_user(&self, address: &Address) -> EngineResult<Option<UserClaimState>> {
        Ok(self.state.read().users.get(address).cloned())
    }

    fn load_authorization(&self) -> EngineResult<Option<CalculatorAuthorization>> {
        Ok(self.state.read().authorization.clone())
    }

    fn load_enrollments(&self) -> EngineResult<Vec<Enrollment>> {
        Ok(self.state.read().enrollments.values().cloned().collect())
    }

    fn load_enrollment(&self, position_id: &PositionId) -> EngineResult<Option<Enrollment>> {
        Ok(self.state.read().enrollments.get(position_id).cloned())
    }

    fn accruals_for_period(&self, period_index: u64) -> EngineResult<Vec<RewardAccrualRecord>> {
        Ok(self.state.read().accruals_for_period(period_index))
    }

    fn load_settlement(&self, tx_hash: &str) -> EngineResult<Option<SettlementRecord>> {
        Ok(self.state.read().settlements.get(tx_hash).cloned())
    }

    fn commit(&self, batch: StoreBatch) -> EngineResult<()> {
        self.state.write().apply(batch);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
