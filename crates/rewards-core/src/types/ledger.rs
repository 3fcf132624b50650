//! # Ledger State Types
//!
//! Persistent accounting records: the treasury singleton, per-user claim
//! state and the signing-key authorization record.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::constants::SECONDS_PER_DAY;
use crate::errors::{CoreResult, RewardsCoreError};
use crate::types::address::Address;

#[cfg(feature = "client")]
use serde::{Deserialize, Serialize};

// ============================================================================
// Treasury
// ============================================================================

/// Singleton treasury accounting for one program instance
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "client", derive(Serialize, Deserialize))]
pub struct TreasuryState {
    pub total_allocation: Decimal,
    pub daily_budget: Decimal,
    /// Sum of settled claims
    pub cumulative_distributed: Decimal,
    /// Sum of granted accruals
    pub cumulative_accrued: Decimal,
    pub program_start: DateTime<Utc>,
    pub program_duration_days: u32,
    pub period_length_secs: i64,
    /// Highest accrual period already committed
    pub last_settled_period: Option<u64>,
}

impl TreasuryState {
    /// Create a fresh treasury
    pub fn new(
        total_allocation: Decimal,
        daily_budget: Decimal,
        program_start: DateTime<Utc>,
        program_duration_days: u32,
        period_length_secs: i64,
    ) -> CoreResult<Self> {
        if total_allocation <= Decimal::ZERO {
            return Err(RewardsCoreError::invalid_parameter("total_allocation", "must be positive"));
        }
        if daily_budget <= Decimal::ZERO || daily_budget > total_allocation {
            return Err(RewardsCoreError::invalid_parameter(
                "daily_budget",
                "must be positive and not exceed total_allocation",
            ));
        }
        if program_duration_days == 0 {
            return Err(RewardsCoreError::invalid_parameter("program_duration_days", "must be positive"));
        }
        if period_length_secs <= 0 {
            return Err(RewardsCoreError::invalid_parameter("period_length_secs", "must be positive"));
        }

        Ok(Self {
            total_allocation,
            daily_budget,
            cumulative_distributed: Decimal::ZERO,
            cumulative_accrued: Decimal::ZERO,
            program_start,
            program_duration_days,
            period_length_secs,
            last_settled_period: None,
        })
    }

    /// Total number of accrual periods in the program
    pub fn total_periods(&self) -> u64 {
        let total_secs = self.program_duration_days as i64 * SECONDS_PER_DAY;
        (total_secs / self.period_length_secs) as u64
    }

    /// Start and end of a period
    pub fn period_bounds(&self, period_index: u64) -> (DateTime<Utc>, DateTime<Utc>) {
        let length = Duration::seconds(self.period_length_secs);
        let start = self.program_start + Duration::seconds(self.period_length_secs * period_index as i64);
        (start, start + length)
    }

    /// Number of periods fully elapsed at `now`, capped at the program length
    pub fn completed_periods_at(&self, now: DateTime<Utc>) -> u64 {
        let elapsed = (now - self.program_start).num_seconds();
        if elapsed <= 0 {
            return 0;
        }
        ((elapsed / self.period_length_secs) as u64).min(self.total_periods())
    }

    /// Period indices that have elapsed but are not committed yet
    pub fn pending_periods_at(&self, now: DateTime<Utc>) -> std::ops::Range<u64> {
        let first = self.last_settled_period.map(|p| p + 1).unwrap_or(0);
        let end = self.completed_periods_at(now);
        first..end.max(first)
    }

    /// Allocation not yet granted as accruals
    pub fn remaining_allocation(&self) -> Decimal {
        (self.total_allocation - self.cumulative_accrued).max(Decimal::ZERO)
    }

    /// Whole days left in the program at `now`
    pub fn remaining_days(&self, now: DateTime<Utc>) -> u32 {
        let end = self.program_start + Duration::days(self.program_duration_days as i64);
        let secs = (end - now).num_seconds();
        if secs <= 0 {
            return 0;
        }
        ((secs + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY) as u32
    }

    /// `cumulative_distributed <= cumulative_accrued <= total_allocation`
    pub fn check_invariants(&self) -> CoreResult<()> {
        if self.cumulative_accrued > self.total_allocation {
            return Err(RewardsCoreError::invalid_parameter(
                "cumulative_accrued",
                format!("{} exceeds total allocation {}", self.cumulative_accrued, self.total_allocation),
            ));
        }
        if self.cumulative_distributed > self.cumulative_accrued {
            return Err(RewardsCoreError::invalid_parameter(
                "cumulative_distributed",
                format!("{} exceeds accrued {}", self.cumulative_distributed, self.cumulative_accrued),
            ));
        }
        Ok(())
    }
}

/// Dashboard view of the treasury
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "client", derive(Serialize, Deserialize))]
pub struct TreasurySnapshot {
    pub total_allocation: Decimal,
    pub cumulative_distributed: Decimal,
    pub cumulative_accrued: Decimal,
    pub remaining_allocation: Decimal,
    pub daily_budget: Decimal,
    pub remaining_days: u32,
    pub last_settled_period: Option<u64>,
}

impl TreasurySnapshot {
    pub fn from_state(state: &TreasuryState, now: DateTime<Utc>) -> Self {
        Self {
            total_allocation: state.total_allocation,
            cumulative_distributed: state.cumulative_distributed,
            cumulative_accrued: state.cumulative_accrued,
            remaining_allocation: state.remaining_allocation(),
            daily_budget: state.daily_budget,
            remaining_days: state.remaining_days(now),
            last_settled_period: state.last_settled_period,
        }
    }
}

// ============================================================================
// Users
// ============================================================================

/// Authorization handed out but not yet settled on-chain
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "client", derive(Serialize, Deserialize))]
pub struct PendingClaim {
    pub nonce: u64,
    pub amount: Decimal,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub key_id: String,
}

impl PendingClaim {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether a settlement report may still arrive for this authorization
    pub fn awaits_settlement(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        now < self.expires_at + grace
    }
}

/// Per-user claim accounting
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "client", derive(Serialize, Deserialize))]
pub struct UserClaimState {
    pub address: Address,
    /// Sum of accruals granted to the user's positions
    pub cumulative_accrued: Decimal,
    pub cumulative_claimed: Decimal,
    pub current_claim_ceiling: Decimal,
    /// Highest nonce ever issued; zero before the first authorization
    pub last_nonce: u64,
    /// Issued authorizations not yet settled, ordered by nonce
    pub outstanding: Vec<PendingClaim>,
    pub successful_claims: u64,
}

impl UserClaimState {
    pub fn new(address: Address, initial_ceiling: Decimal) -> Self {
        Self {
            address,
            cumulative_accrued: Decimal::ZERO,
            cumulative_claimed: Decimal::ZERO,
            current_claim_ceiling: initial_ceiling,
            last_nonce: 0,
            outstanding: Vec::new(),
            successful_claims: 0,
        }
    }

    /// Accrued but not yet claimed
    pub fn claimable(&self) -> Decimal {
        (self.cumulative_accrued - self.cumulative_claimed).max(Decimal::ZERO)
    }

    /// Amount still allowed under the current ceiling
    pub fn ceiling_headroom(&self) -> Decimal {
        (self.current_claim_ceiling - self.cumulative_claimed).max(Decimal::ZERO)
    }

    /// Latest authorization that could still be settled on-chain at `now`
    pub fn awaiting_settlement(&self, now: DateTime<Utc>, grace: Duration) -> Option<&PendingClaim> {
        self.outstanding.iter().rev().find(|p| p.awaits_settlement(now, grace))
    }

    /// Issued, unsettled authorization with this nonce
    pub fn outstanding_claim(&self, nonce: u64) -> Option<&PendingClaim> {
        self.outstanding.iter().find(|p| p.nonce == nonce)
    }

    /// Next ceiling tier after a successful claim
    pub fn next_ceiling(&self, step: Decimal, absolute_max: Decimal) -> CoreResult<Decimal> {
        let raised = self.current_claim_ceiling.checked_add(step).ok_or(RewardsCoreError::MathOverflow)?;
        Ok(raised.min(absolute_max).max(self.current_claim_ceiling))
    }

    /// `cumulative_claimed <= current_claim_ceiling <= absolute_max`
    pub fn check_invariants(&self, absolute_max: Decimal) -> CoreResult<()> {
        if self.cumulative_claimed > self.current_claim_ceiling {
            return Err(RewardsCoreError::invalid_parameter(
                "cumulative_claimed",
                format!("{} exceeds ceiling {}", self.cumulative_claimed, self.current_claim_ceiling),
            ));
        }
        if self.current_claim_ceiling > absolute_max {
            return Err(RewardsCoreError::invalid_parameter(
                "current_claim_ceiling",
                format!("{} exceeds absolute max {}", self.current_claim_ceiling, absolute_max),
            ));
        }
        if self.cumulative_claimed > self.cumulative_accrued {
            return Err(RewardsCoreError::NegativeValue("claimable_balance"));
        }
        Ok(())
    }
}

// ============================================================================
// Signing Key Authorization
// ============================================================================

/// Which calculator key is trusted to sign claims
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "client", derive(Serialize, Deserialize))]
pub struct CalculatorAuthorization {
    pub active_signing_key_id: String,
    pub pending_signing_key_id: Option<String>,
    pub pending_activation_time: Option<DateTime<Utc>>,
    pub activated_at: DateTime<Utc>,
}

impl CalculatorAuthorization {
    pub fn new(active_signing_key_id: impl Into<String>, activated_at: DateTime<Utc>) -> Self {
        Self {
            active_signing_key_id: active_signing_key_id.into(),
            pending_signing_key_id: None,
            pending_activation_time: None,
            activated_at,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending_signing_key_id.is_some()
    }
}
