//! # Accrual Records
//!
//! Append-only audit entries, one per position per accrual period.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::types::address::Address;
use crate::types::position::PositionId;

#[cfg(feature = "client")]
use serde::{Deserialize, Serialize};

/// One ledger entry per position per accrual period
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "client", derive(Serialize, Deserialize))]
pub struct RewardAccrualRecord {
    pub position_id: PositionId,
    pub owner: Address,
    pub period_index: u64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Amount the formula produced before budget capping
    pub computed_amount: Decimal,
    /// Amount granted by the ledger (program token units)
    pub accrued_amount: Decimal,
    /// 1.0 when in range, 0.0 otherwise
    pub in_range_multiplier: Decimal,
    pub program_time_coefficient: Decimal,
    pub days_enrolled: Decimal,
    /// Set when pro-rata truncation reduced the computed amount
    pub truncated: bool,
}

impl RewardAccrualRecord {
    /// Storage key: period index then position id, so a period scans contiguously
    pub fn storage_key(&self) -> Vec<u8> {
        accrual_key(self.period_index, &self.position_id)
    }
}

/// Build the storage key for an accrual record
pub fn accrual_key(period_index: u64, position_id: &PositionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + position_id.0.len());
    key.extend_from_slice(&period_index.to_be_bytes());
    key.extend_from_slice(position_id.0.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accrual_keys_sort_by_period() {
        let a = accrual_key(1, &PositionId::new("zzz"));
        let b = accrual_key(2, &PositionId::new("aaa"));
        assert!(a < b);
        assert_eq!(&a[..8], &1u64.to_be_bytes());
    }
}
