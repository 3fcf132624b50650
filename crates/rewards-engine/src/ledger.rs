//! Treasury ledger
//!
//! Authoritative accounting of the program treasury and of every user's
//! claim state. Accruals are granted against the daily budget and the
//! lifetime allocation; claims are committed against the claimable balance
//! and the user's growing claim ceiling.
//!
//! Locking: the treasury lock is always taken first, then user locks in
//! ascending address order. Every mutation is prepared on copies, persisted
//! as one [`StoreBatch`], and only then made visible in memory.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use rewards_core::math::{safe_add, safe_div, safe_mul, truncate_amount};
use rewards_core::{
    Address, PendingClaim, MAX_STALE_AUTHORIZATIONS, RewardAccrualRecord, SettlementEvent, SettlementRecord, TreasuryState,
    TreasurySnapshot, UserClaimState,
};

use crate::clock::SharedClock;
use crate::config::ClaimsConfig;
use crate::error::{EngineError, EngineResult};
use crate::store::{SharedStore, StoreBatch};

/// Per-user claim ceiling and settlement policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimLimits {
    pub initial_ceiling: Decimal,
    pub ceiling_step: Decimal,
    pub absolute_max: Decimal,
    /// How long after expiry an authorization still blocks a new one
    pub settlement_grace: Duration,
}

impl From<&ClaimsConfig> for ClaimLimits {
    fn from(config: &ClaimsConfig) -> Self {
        Self {
            initial_ceiling: config.initial_claim_ceiling,
            ceiling_step: config.claim_ceiling_step,
            absolute_max: config.absolute_max_claim_per_user,
            settlement_grace: Duration::seconds(config.settlement_grace_secs),
        }
    }
}

impl Default for ClaimLimits {
    fn default() -> Self {
        Self::from(&ClaimsConfig::default())
    }
}

/// Outcome of a single accrual proposal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccrualDecision {
    Accepted { amount: Decimal },
    RejectedBudgetExceeded { requested: Decimal, available: Decimal },
}

/// Outcome of a claim commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimDecision {
    Accepted { cumulative_claimed: Decimal, next_ceiling: Decimal },
    RejectedCeilingExceeded { requested: Decimal, headroom: Decimal },
    RejectedInsufficientBalance { requested: Decimal, claimable: Decimal },
}

impl ClaimDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ClaimDecision::Accepted { .. })
    }

    fn into_error(self) -> EngineError {
        match self {
            ClaimDecision::RejectedCeilingExceeded { requested, headroom } => {
                EngineError::CeilingExceeded { requested, headroom }
            }
            ClaimDecision::RejectedInsufficientBalance { requested, claimable } => {
                EngineError::InsufficientBalance { requested, claimable }
            }
            ClaimDecision::Accepted { .. } => EngineError::Storage("accepted claim treated as failure".to_string()),
        }
    }
}

/// Outcome of a settlement report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Applied { cumulative_claimed: Decimal, next_ceiling: Decimal },
    /// Same transaction was reported before; nothing changed
    AlreadyApplied,
}

/// Summary of one committed accrual period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodCommit {
    pub period_index: u64,
    pub records: usize,
    /// Sum of formula outputs before capping
    pub requested: Decimal,
    /// Sum actually granted
    pub granted: Decimal,
    /// Budget left for the period before this commit
    pub capacity: Decimal,
    /// Scale applied to every record when the budget was short
    pub truncation_factor: Option<Decimal>,
}

type UserSlot = Arc<Mutex<UserClaimState>>;

/// The treasury ledger
pub struct TreasuryLedger {
    store: SharedStore,
    clock: SharedClock,
    limits: ClaimLimits,
    treasury: Mutex<TreasuryState>,
    users: RwLock<HashMap<Address, UserSlot>>,
    /// Granted totals of periods that are still open
    period_granted: Mutex<HashMap<u64, Decimal>>,
}

impl TreasuryLedger {
    /// Load persisted state, or initialize it from `initial` on first start
    pub fn open(
        store: SharedStore,
        clock: SharedClock,
        initial: TreasuryState,
        limits: ClaimLimits,
    ) -> EngineResult<Self> {
        let treasury = match store.load_treasury()? {
            Some(existing) => {
                if existing.total_allocation != initial.total_allocation
                    || existing.daily_budget != initial.daily_budget
                    || existing.program_start != initial.program_start
                {
                    warn!(
                        stored_allocation = %existing.total_allocation,
                        configured_allocation = %initial.total_allocation,
                        "Persisted treasury differs from configuration; persisted state wins"
                    );
                }
                existing
            }
            None => {
                initial.check_invariants()?;
                store.commit(StoreBatch::new().with_treasury(initial.clone()))?;
                info!(
                    total_allocation = %initial.total_allocation,
                    daily_budget = %initial.daily_budget,
                    "Initialized treasury"
                );
                initial
            }
        };
        treasury.check_invariants()?;

        let users = store
            .load_users()?
            .into_iter()
            .map(|user| (user.address, Arc::new(Mutex::new(user))))
            .collect::<HashMap<_, _>>();

        info!(backend = store.backend_name(), users = users.len(), "Treasury ledger opened");

        Ok(Self {
            store,
            clock,
            limits,
            treasury: Mutex::new(treasury),
            users: RwLock::new(users),
            period_granted: Mutex::new(HashMap::new()),
        })
    }

    pub fn limits(&self) -> &ClaimLimits {
        &self.limits
    }

    pub fn treasury(&self) -> TreasuryState {
        self.treasury.lock().clone()
    }

    /// Dashboard view at the current time
    pub fn snapshot(&self) -> TreasurySnapshot {
        let now = self.clock.now();
        TreasurySnapshot::from_state(&self.treasury.lock(), now)
    }

    pub fn user_state(&self, user: &Address) -> Option<UserClaimState> {
        self.slot(user).map(|slot| slot.lock().clone())
    }

    /// Accrued but unclaimed amount; zero for unknown users
    pub fn claimable_balance(&self, user: &Address) -> Decimal {
        self.slot(user).map(|slot| slot.lock().claimable()).unwrap_or(Decimal::ZERO)
    }

    pub fn accruals_for_period(&self, period_index: u64) -> EngineResult<Vec<RewardAccrualRecord>> {
        self.store.accruals_for_period(period_index)
    }

    // ========================================================================
    // Accruals
    // ========================================================================

    /// Grant one record in full if it fits the period budget and the remaining allocation
    pub fn propose_accrual(&self, record: RewardAccrualRecord) -> EngineResult<AccrualDecision> {
        let mut treasury = self.treasury.lock();
        self.check_open_period(&treasury, record.period_index)?;
        validate_record(&record, record.period_index)?;

        let existing = self.store.accruals_for_period(record.period_index)?;
        if existing.iter().any(|r| r.position_id == record.position_id) {
            return Err(EngineError::InvalidInput(format!(
                "position {} already accrued in period {}",
                record.position_id, record.period_index
            )));
        }

        let granted = self.granted_in_period(record.period_index, &existing)?;
        let available = period_capacity(&treasury, granted);
        let requested = truncate_amount(record.computed_amount);

        if requested > available {
            warn!(
                position = %record.position_id,
                period = record.period_index,
                %requested,
                %available,
                "Accrual rejected: budget exceeded"
            );
            return Ok(AccrualDecision::RejectedBudgetExceeded { requested, available });
        }

        let slot = self.slot_or_create(&record.owner);
        let mut user = slot.lock();

        let mut next_treasury = treasury.clone();
        next_treasury.cumulative_accrued = safe_add(next_treasury.cumulative_accrued, requested)?;
        next_treasury.check_invariants().map_err(|_| EngineError::BudgetExceeded {
            requested,
            available,
        })?;

        let mut next_user = user.clone();
        next_user.cumulative_accrued = safe_add(next_user.cumulative_accrued, requested)?;

        let mut granted_record = record;
        granted_record.accrued_amount = requested;
        granted_record.truncated = false;

        let batch = StoreBatch {
            treasury: Some(next_treasury.clone()),
            users: vec![next_user.clone()],
            accruals: vec![granted_record],
            ..StoreBatch::default()
        };
        let period = batch.accruals[0].period_index;
        self.store.commit(batch)?;

        *treasury = next_treasury;
        *user = next_user;
        self.period_granted.lock().insert(period, safe_add(granted, requested)?);

        debug!(period, amount = %requested, "Accrual accepted");
        Ok(AccrualDecision::Accepted { amount: requested })
    }

    /// Commit every record of a period, scaling them pro rata when the budget is short
    ///
    /// Periods are committed once, in order.
    pub fn commit_period(&self, period_index: u64, records: Vec<RewardAccrualRecord>) -> EngineResult<PeriodCommit> {
        let mut treasury = self.treasury.lock();
        self.check_open_period(&treasury, period_index)?;
        let expected = treasury.last_settled_period.map(|p| p + 1).unwrap_or(0);
        if period_index != expected {
            return Err(EngineError::InvalidInput(format!(
                "period {} committed out of order, expected {}",
                period_index, expected
            )));
        }

        let existing = self.store.accruals_for_period(period_index)?;
        let mut seen = BTreeSet::new();
        for record in &records {
            validate_record(record, period_index)?;
            if !seen.insert(record.position_id.clone()) || existing.iter().any(|r| r.position_id == record.position_id) {
                return Err(EngineError::InvalidInput(format!(
                    "position {} appears twice in period {}",
                    record.position_id, period_index
                )));
            }
        }

        let granted_before = self.granted_in_period(period_index, &existing)?;
        let capacity = period_capacity(&treasury, granted_before);
        let requested = records
            .iter()
            .try_fold(Decimal::ZERO, |acc, r| safe_add(acc, truncate_amount(r.computed_amount)))?;

        let mut records = records;
        records.sort_by(|a, b| a.position_id.cmp(&b.position_id));

        let truncation_factor = if requested > capacity {
            Some(safe_div(capacity, requested)?)
        } else {
            None
        };

        for record in records.iter_mut() {
            let full = truncate_amount(record.computed_amount);
            match truncation_factor {
                Some(factor) => {
                    record.accrued_amount = truncate_amount(safe_mul(record.computed_amount, factor)?).min(full);
                    record.truncated = record.accrued_amount < full;
                }
                None => {
                    record.accrued_amount = full;
                    record.truncated = false;
                }
            }
        }

        let mut granted = records
            .iter()
            .try_fold(Decimal::ZERO, |acc, r| safe_add(acc, r.accrued_amount))?;

        // Decimal division can round the factor up in the last digit
        if granted > capacity {
            let overshoot = granted - capacity;
            if let Some(largest) = records.iter_mut().max_by(|a, b| a.accrued_amount.cmp(&b.accrued_amount)) {
                largest.accrued_amount = (largest.accrued_amount - overshoot).max(Decimal::ZERO);
                largest.truncated = true;
            }
            granted = capacity;
        }

        if let Some(factor) = truncation_factor {
            warn!(
                period = period_index,
                %requested,
                %capacity,
                %factor,
                "Period over budget, applying pro-rata truncation"
            );
        }

        // Credits per owner, locked in ascending address order
        let mut credits: BTreeMap<Address, Decimal> = BTreeMap::new();
        for record in &records {
            let entry = credits.entry(record.owner).or_insert(Decimal::ZERO);
            *entry = safe_add(*entry, record.accrued_amount)?;
        }
        let slots: Vec<(Decimal, UserSlot)> = credits
            .iter()
            .map(|(owner, credit)| (*credit, self.slot_or_create(owner)))
            .collect();
        let mut guards: Vec<_> = slots.iter().map(|(credit, slot)| (*credit, slot.lock())).collect();

        let mut next_users = Vec::with_capacity(guards.len());
        for (credit, guard) in &guards {
            let mut next = (**guard).clone();
            next.cumulative_accrued = safe_add(next.cumulative_accrued, *credit)?;
            next_users.push(next);
        }

        let mut next_treasury = treasury.clone();
        next_treasury.cumulative_accrued = safe_add(next_treasury.cumulative_accrued, granted)?;
        next_treasury.last_settled_period = Some(period_index);
        if let Err(e) = next_treasury.check_invariants() {
            error!(period = period_index, error = %e, "Period commit would break treasury invariants");
            return Err(EngineError::BudgetExceeded {
                requested: granted,
                available: capacity,
            });
        }

        let record_count = records.len();
        self.store.commit(StoreBatch {
            treasury: Some(next_treasury.clone()),
            users: next_users.clone(),
            accruals: records,
            ..StoreBatch::default()
        })?;

        for ((_, guard), next) in guards.iter_mut().zip(next_users) {
            **guard = next;
        }
        *treasury = next_treasury;
        self.period_granted.lock().remove(&period_index);

        info!(
            period = period_index,
            records = record_count,
            %requested,
            %granted,
            "Committed accrual period"
        );

        Ok(PeriodCommit {
            period_index,
            records: record_count,
            requested,
            granted,
            capacity,
            truncation_factor,
        })
    }

    // ========================================================================
    // Claims
    // ========================================================================

    /// Debit a claim against the user's balance and ceiling
    ///
    /// Direct debit without a signed authorization, for operator corrections.
    /// Refused with `ClaimInFlight` while an authorization awaits settlement.
    pub fn commit_claim(&self, user: &Address, amount: Decimal) -> EngineResult<ClaimDecision> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::InvalidInput(format!("claim amount must be positive, got {}", amount)));
        }

        let mut treasury = self.treasury.lock();
        let Some(slot) = self.slot(user) else {
            return Ok(ClaimDecision::RejectedInsufficientBalance {
                requested: amount,
                claimable: Decimal::ZERO,
            });
        };
        let mut state = slot.lock();

        if let Some(outstanding) = state.awaiting_settlement(self.clock.now(), self.limits.settlement_grace) {
            return Err(EngineError::ClaimInFlight {
                nonce: outstanding.nonce,
                expires_at: outstanding.expires_at,
            });
        }

        let (next_treasury, next_user) = match self.apply_claim(&treasury, &state, amount)? {
            Ok(next) => next,
            Err(rejection) => {
                info!(user = %user, %amount, ?rejection, "Claim rejected");
                return Ok(rejection);
            }
        };

        self.store.commit(
            StoreBatch::new()
                .with_treasury(next_treasury.clone())
                .with_user(next_user.clone()),
        )?;

        let decision = ClaimDecision::Accepted {
            cumulative_claimed: next_user.cumulative_claimed,
            next_ceiling: next_user.current_claim_ceiling,
        };
        *treasury = next_treasury;
        *state = next_user;
        Ok(decision)
    }

    /// Apply an on-chain settlement to the matching outstanding authorization
    ///
    /// Any issued, unsettled nonce is accepted, including one that expired
    /// before its confirmation was reported.
    pub fn settle_claim(&self, event: &SettlementEvent) -> EngineResult<SettlementOutcome> {
        if let Err(e) = event.validate() {
            error!(target: "security", user = %event.user, nonce = event.nonce, error = %e, "Malformed settlement report");
            return Err(e.into());
        }
        let tx_hash = event.normalized_tx_hash();

        let mut treasury = self.treasury.lock();

        if let Some(previous) = self.store.load_settlement(&tx_hash)? {
            if previous.user == event.user && previous.nonce == event.nonce && previous.amount == event.amount {
                info!(tx_hash = %tx_hash, "Settlement already applied");
                return Ok(SettlementOutcome::AlreadyApplied);
            }
            error!(
                target: "security",
                tx_hash = %tx_hash,
                user = %event.user,
                nonce = event.nonce,
                "Settlement reuses a recorded transaction hash"
            );
            return Err(EngineError::ReplayAttempt(format!("transaction {} already settled", tx_hash)));
        }

        let slot = self.slot(&event.user).ok_or_else(|| {
            error!(target: "security", user = %event.user, nonce = event.nonce, "Settlement for unknown user");
            EngineError::InvalidInput(format!("settlement for unknown user {}", event.user))
        })?;
        let mut state = slot.lock();

        let pending = match state.outstanding_claim(event.nonce) {
            Some(pending) => pending.clone(),
            None => {
                if event.nonce <= state.last_nonce {
                    error!(
                        target: "security",
                        user = %event.user,
                        nonce = event.nonce,
                        last_nonce = state.last_nonce,
                        "Settlement for a nonce that is not outstanding"
                    );
                    return Err(EngineError::ReplayAttempt(format!(
                        "nonce {} for {} is not outstanding",
                        event.nonce, event.user
                    )));
                }
                error!(target: "security", user = %event.user, nonce = event.nonce, "Settlement for a nonce never issued");
                return Err(EngineError::InvalidInput(format!(
                    "nonce {} was never issued to {}",
                    event.nonce, event.user
                )));
            }
        };

        if pending.amount != event.amount {
            error!(
                target: "security",
                user = %event.user,
                nonce = event.nonce,
                authorized = %pending.amount,
                reported = %event.amount,
                "Settlement amount differs from authorization"
            );
            return Err(EngineError::InvalidInput(format!(
                "settled amount {} differs from authorized {}",
                event.amount, pending.amount
            )));
        }

        let (next_treasury, mut next_user) = match self.apply_claim(&treasury, &state, event.amount)? {
            Ok(next) => next,
            Err(rejection) => {
                error!(target: "security", user = %event.user, nonce = event.nonce, ?rejection, "Settled claim breaks ledger limits");
                return Err(rejection.into_error());
            }
        };
        next_user.outstanding.retain(|p| p.nonce != event.nonce);

        self.store.commit(
            StoreBatch::new()
                .with_treasury(next_treasury.clone())
                .with_user(next_user.clone())
                .with_settlement(SettlementRecord {
                    tx_hash: tx_hash.clone(),
                    user: event.user,
                    amount: event.amount,
                    nonce: event.nonce,
                    settled_at: self.clock.now(),
                }),
        )?;

        let outcome = SettlementOutcome::Applied {
            cumulative_claimed: next_user.cumulative_claimed,
            next_ceiling: next_user.current_claim_ceiling,
        };
        *treasury = next_treasury;
        *state = next_user;

        info!(user = %event.user, nonce = event.nonce, amount = %event.amount, tx_hash = %tx_hash, "Claim settled");
        Ok(outcome)
    }

    /// Consume the next nonce and record an outstanding authorization for the user
    ///
    /// The reservation is durable before this returns, so a signature is
    /// never produced for a nonce that could be handed out again. A new
    /// authorization is refused until every earlier one is settled or past
    /// its expiry plus the settlement grace.
    pub fn reserve_authorization(
        &self,
        user: &Address,
        now: DateTime<Utc>,
        ttl: Duration,
        key_id: &str,
    ) -> EngineResult<PendingClaim> {
        let slot = self.slot(user).ok_or(EngineError::NoClaimableBalance)?;
        let mut state = slot.lock();

        if let Some(live) = state.awaiting_settlement(now, self.limits.settlement_grace) {
            return Err(EngineError::ClaimInFlight {
                nonce: live.nonce,
                expires_at: live.expires_at,
            });
        }

        let claimable = state.claimable();
        if claimable <= Decimal::ZERO {
            return Err(EngineError::NoClaimableBalance);
        }
        let headroom = state.ceiling_headroom();
        if headroom <= Decimal::ZERO {
            return Err(EngineError::CeilingExceeded {
                requested: claimable,
                headroom,
            });
        }

        let amount = truncate_amount(claimable.min(headroom));
        if amount <= Decimal::ZERO {
            return Err(EngineError::NoClaimableBalance);
        }
        let nonce = state
            .last_nonce
            .checked_add(1)
            .ok_or_else(|| EngineError::Storage(format!("nonce space exhausted for {}", user)))?;

        let mut next = state.clone();
        if next.outstanding.len() >= MAX_STALE_AUTHORIZATIONS {
            let dropped = next.outstanding.len() + 1 - MAX_STALE_AUTHORIZATIONS;
            for stale in next.outstanding.drain(..dropped) {
                warn!(user = %user, nonce = stale.nonce, "Forgetting unsettled expired authorization");
            }
        }

        let pending = PendingClaim {
            nonce,
            amount,
            issued_at: now,
            expires_at: now + ttl,
            key_id: key_id.to_string(),
        };
        next.last_nonce = nonce;
        next.outstanding.push(pending.clone());

        self.store.commit(StoreBatch::new().with_user(next.clone()))?;
        *state = next;

        debug!(user = %user, nonce, amount = %amount, "Reserved claim nonce");
        Ok(pending)
    }

    /// Drop an authorization that was never handed out; its nonce stays consumed
    pub fn abandon_authorization(&self, user: &Address, nonce: u64) -> EngineResult<()> {
        let Some(slot) = self.slot(user) else {
            return Ok(());
        };
        let mut state = slot.lock();
        if state.outstanding_claim(nonce).is_none() {
            return Ok(());
        }
        let mut next = state.clone();
        next.outstanding.retain(|p| p.nonce != nonce);
        self.store.commit(StoreBatch::new().with_user(next.clone()))?;
        *state = next;
        warn!(user = %user, nonce, "Abandoned claim authorization");
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn slot(&self, user: &Address) -> Option<UserSlot> {
        self.users.read().get(user).cloned()
    }

    fn slot_or_create(&self, user: &Address) -> UserSlot {
        if let Some(slot) = self.slot(user) {
            return slot;
        }
        self.users
            .write()
            .entry(*user)
            .or_insert_with(|| Arc::new(Mutex::new(UserClaimState::new(*user, self.limits.initial_ceiling))))
            .clone()
    }

    fn check_open_period(&self, treasury: &TreasuryState, period_index: u64) -> EngineResult<()> {
        if let Some(last_settled) = treasury.last_settled_period {
            if period_index <= last_settled {
                return Err(EngineError::PeriodAlreadySettled {
                    period: period_index,
                    last_settled,
                });
            }
        }
        if period_index >= treasury.total_periods() {
            return Err(EngineError::InvalidInput(format!(
                "period {} is past the program end ({} periods)",
                period_index,
                treasury.total_periods()
            )));
        }
        Ok(())
    }

    fn granted_in_period(&self, period_index: u64, existing: &[RewardAccrualRecord]) -> EngineResult<Decimal> {
        if let Some(granted) = self.period_granted.lock().get(&period_index) {
            return Ok(*granted);
        }
        Ok(existing
            .iter()
            .try_fold(Decimal::ZERO, |acc, r| safe_add(acc, r.accrued_amount))?)
    }

    /// Next treasury and user state after a claim, or the rejection
    #[allow(clippy::type_complexity)]
    fn apply_claim(
        &self,
        treasury: &TreasuryState,
        user: &UserClaimState,
        amount: Decimal,
    ) -> EngineResult<Result<(TreasuryState, UserClaimState), ClaimDecision>> {
        let claimable = user.claimable();
        if amount > claimable {
            return Ok(Err(ClaimDecision::RejectedInsufficientBalance {
                requested: amount,
                claimable,
            }));
        }
        let headroom = user.ceiling_headroom();
        if amount > headroom {
            return Ok(Err(ClaimDecision::RejectedCeilingExceeded {
                requested: amount,
                headroom,
            }));
        }

        let mut next_user = user.clone();
        next_user.cumulative_claimed = safe_add(next_user.cumulative_claimed, amount)?;
        next_user.successful_claims += 1;
        next_user.current_claim_ceiling = user.next_ceiling(self.limits.ceiling_step, self.limits.absolute_max)?;
        next_user.check_invariants(self.limits.absolute_max)?;

        let mut next_treasury = treasury.clone();
        next_treasury.cumulative_distributed = safe_add(next_treasury.cumulative_distributed, amount)?;
        next_treasury.check_invariants()?;

        Ok(Ok((next_treasury, next_user)))
    }
}

/// Budget still available to a period
fn period_capacity(treasury: &TreasuryState, granted_in_period: Decimal) -> Decimal {
    let daily_left = (treasury.daily_budget - granted_in_period).max(Decimal::ZERO);
    daily_left.min(treasury.remaining_allocation())
}

fn validate_record(record: &RewardAccrualRecord, period_index: u64) -> EngineResult<()> {
    if record.period_index != period_index {
        return Err(EngineError::InvalidInput(format!(
            "record for period {} submitted with period {}",
            record.period_index, period_index
        )));
    }
    if record.computed_amount < Decimal::ZERO {
        return Err(EngineError::InvalidInput(format!(
            "negative accrual {} for position {}",
            record.computed_amount, record.position_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use rewards_core::PositionId;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn ledger_with(total: i64, daily: i64) -> (TreasuryLedger, ManualClock) {
        let clock = ManualClock::new(start());
        let treasury = TreasuryState::new(Decimal::from(total), Decimal::from(daily), start(), 100, 86_400).unwrap();
        let ledger = TreasuryLedger::open(
            Arc::new(MemoryStore::new()),
            Arc::new(clock.clone()),
            treasury,
            ClaimLimits::default(),
        )
        .unwrap();
        (ledger, clock)
    }

    fn record(period: u64, id: &str, owner: u8, amount: &str) -> RewardAccrualRecord {
        let (period_start, period_end) = (start(), start() + Duration::days(1));
        RewardAccrualRecord {
            position_id: PositionId::new(id),
            owner: Address::new([owner; 20]),
            period_index: period,
            period_start,
            period_end,
            computed_amount: d(amount),
            accrued_amount: Decimal::ZERO,
            in_range_multiplier: Decimal::ONE,
            program_time_coefficient: d("0.6"),
            days_enrolled: Decimal::ZERO,
            truncated: false,
        }
    }

    #[test]
    fn test_propose_accrual_respects_daily_budget() {
        let (ledger, _) = ledger_with(10_000, 100);
        assert_eq!(
            ledger.propose_accrual(record(0, "a", 1, "60")).unwrap(),
            AccrualDecision::Accepted { amount: d("60") }
        );
        assert_eq!(
            ledger.propose_accrual(record(0, "b", 2, "50")).unwrap(),
            AccrualDecision::RejectedBudgetExceeded {
                requested: d("50"),
                available: d("40"),
            }
        );
        // Rejection leaves state untouched
        assert_eq!(ledger.treasury().cumulative_accrued, d("60"));
        assert_eq!(ledger.claimable_balance(&Address::new([2; 20])), Decimal::ZERO);
    }

    #[test]
    fn test_commit_period_truncates_pro_rata() {
        let (ledger, _) = ledger_with(10_000, 100);
        let commit = ledger
            .commit_period(0, vec![record(0, "a", 1, "150"), record(0, "b", 2, "50")])
            .unwrap();

        assert_eq!(commit.truncation_factor, Some(d("0.5")));
        assert_eq!(commit.granted, d("100"));
        assert_eq!(ledger.claimable_balance(&Address::new([1; 20])), d("75"));
        assert_eq!(ledger.claimable_balance(&Address::new([2; 20])), d("25"));

        let stored = ledger.accruals_for_period(0).unwrap();
        assert!(stored.iter().all(|r| r.truncated));
    }

    #[test]
    fn test_commit_period_counts_earlier_proposals() {
        let (ledger, _) = ledger_with(10_000, 100);
        ledger.propose_accrual(record(0, "a", 1, "80")).unwrap();
        let commit = ledger.commit_period(0, vec![record(0, "b", 2, "40")]).unwrap();
        assert_eq!(commit.capacity, d("20"));
        assert_eq!(commit.granted, d("20"));
    }

    #[test]
    fn test_period_cannot_be_committed_twice() {
        let (ledger, _) = ledger_with(10_000, 100);
        ledger.commit_period(0, vec![record(0, "a", 1, "10")]).unwrap();
        assert!(matches!(
            ledger.commit_period(0, vec![record(0, "b", 1, "10")]),
            Err(EngineError::PeriodAlreadySettled { period: 0, last_settled: 0 })
        ));
        assert!(matches!(
            ledger.propose_accrual(record(0, "c", 1, "1")),
            Err(EngineError::PeriodAlreadySettled { .. })
        ));
        assert!(ledger.commit_period(2, vec![]).is_err());
    }

    #[test]
    fn test_lifetime_allocation_caps_accruals() {
        let (ledger, _) = ledger_with(150, 100);
        ledger.commit_period(0, vec![record(0, "a", 1, "100")]).unwrap();
        let commit = ledger.commit_period(1, vec![record(1, "a", 1, "100")]).unwrap();
        assert_eq!(commit.granted, d("50"));
        assert_eq!(ledger.treasury().cumulative_accrued, d("150"));
        assert_eq!(ledger.snapshot().remaining_allocation, Decimal::ZERO);
    }

    #[test]
    fn test_commit_claim_raises_ceiling() {
        let (ledger, _) = ledger_with(1_000_000, 5_000);
        let user = Address::new([1; 20]);
        ledger.commit_period(0, vec![record(0, "a", 1, "2000")]).unwrap();

        assert_eq!(
            ledger.commit_claim(&user, d("1000")).unwrap(),
            ClaimDecision::Accepted {
                cumulative_claimed: d("1000"),
                next_ceiling: d("1200"),
            }
        );
        assert_eq!(
            ledger.commit_claim(&user, d("300")).unwrap(),
            ClaimDecision::RejectedCeilingExceeded {
                requested: d("300"),
                headroom: d("200"),
            }
        );
        assert_eq!(
            ledger.commit_claim(&user, d("5000")).unwrap(),
            ClaimDecision::RejectedInsufficientBalance {
                requested: d("5000"),
                claimable: d("1000"),
            }
        );
        assert_eq!(ledger.treasury().cumulative_distributed, d("1000"));
    }

    #[test]
    fn test_reservation_and_settlement() {
        let (ledger, clock) = ledger_with(1_000_000, 5_000);
        let user = Address::new([9; 20]);
        ledger.commit_period(0, vec![record(0, "a", 9, "1500")]).unwrap();

        let pending = ledger
            .reserve_authorization(&user, clock.now(), Duration::hours(1), "k1")
            .unwrap();
        assert_eq!(pending.nonce, 1);
        assert_eq!(pending.amount, d("1000"));

        assert!(matches!(
            ledger.reserve_authorization(&user, clock.now(), Duration::hours(1), "k1"),
            Err(EngineError::ClaimInFlight { nonce: 1, .. })
        ));

        let event = SettlementEvent {
            user,
            amount: d("1000"),
            nonce: 1,
            tx_hash: "0xaa".into(),
        };
        assert!(matches!(ledger.settle_claim(&event).unwrap(), SettlementOutcome::Applied { .. }));
        assert_eq!(ledger.settle_claim(&event).unwrap(), SettlementOutcome::AlreadyApplied);

        let replay = SettlementEvent {
            tx_hash: "0xbb".into(),
            ..event
        };
        assert!(matches!(ledger.settle_claim(&replay), Err(EngineError::ReplayAttempt(_))));

        let state = ledger.user_state(&user).unwrap();
        assert_eq!(state.cumulative_claimed, d("1000"));
        assert!(state.outstanding.is_empty());
        assert_eq!(state.current_claim_ceiling, d("1200"));
    }

    #[test]
    fn test_late_settlement_of_expired_authorization_is_applied() {
        let (ledger, clock) = ledger_with(1_000_000, 5_000);
        let user = Address::new([4; 20]);
        ledger.commit_period(0, vec![record(0, "a", 4, "300")]).unwrap();

        let first = ledger.reserve_authorization(&user, clock.now(), Duration::hours(1), "k1").unwrap();
        clock.advance(Duration::seconds(3_601));

        // Expired, but it may have been mined: the same balance is not signed again
        assert!(matches!(
            ledger.reserve_authorization(&user, clock.now(), Duration::hours(1), "k1"),
            Err(EngineError::ClaimInFlight { nonce: 1, .. })
        ));

        let late = SettlementEvent {
            user,
            amount: d("300"),
            nonce: first.nonce,
            tx_hash: "0x01".into(),
        };
        assert!(matches!(ledger.settle_claim(&late).unwrap(), SettlementOutcome::Applied { .. }));
        assert_eq!(ledger.treasury().cumulative_distributed, d("300"));
        assert_eq!(ledger.claimable_balance(&user), Decimal::ZERO);
        assert!(matches!(
            ledger.reserve_authorization(&user, clock.now(), Duration::hours(1), "k1"),
            Err(EngineError::NoClaimableBalance)
        ));
    }

    #[test]
    fn test_reissue_after_grace_keeps_old_nonce_settleable() {
        let (ledger, clock) = ledger_with(1_000_000, 5_000);
        let user = Address::new([6; 20]);
        ledger.commit_period(0, vec![record(0, "a", 6, "10")]).unwrap();

        let first = ledger.reserve_authorization(&user, clock.now(), Duration::hours(1), "k1").unwrap();
        // ttl + default grace
        clock.advance(Duration::hours(2));
        let second = ledger.reserve_authorization(&user, clock.now(), Duration::hours(1), "k1").unwrap();
        assert_eq!(second.nonce, first.nonce + 1);
        assert_eq!(second.amount, d("10"));

        let state = ledger.user_state(&user).unwrap();
        let nonces: Vec<u64> = state.outstanding.iter().map(|p| p.nonce).collect();
        assert_eq!(nonces, vec![1, 2]);

        let late = SettlementEvent {
            user,
            amount: d("10"),
            nonce: first.nonce,
            tx_hash: "0x03".into(),
        };
        assert!(matches!(ledger.settle_claim(&late).unwrap(), SettlementOutcome::Applied { .. }));
        assert_eq!(ledger.user_state(&user).unwrap().outstanding.len(), 1);

        // Never issued
        let unknown = SettlementEvent {
            nonce: 9,
            tx_hash: "0x04".into(),
            ..late
        };
        assert!(matches!(ledger.settle_claim(&unknown), Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_direct_debit_refused_while_authorization_outstanding() {
        let (ledger, clock) = ledger_with(1_000_000, 5_000);
        let user = Address::new([7; 20]);
        ledger.commit_period(0, vec![record(0, "a", 7, "500")]).unwrap();
        let pending = ledger.reserve_authorization(&user, clock.now(), Duration::hours(1), "k1").unwrap();

        assert!(matches!(
            ledger.commit_claim(&user, d("100")),
            Err(EngineError::ClaimInFlight { nonce: 1, .. })
        ));
        assert_eq!(ledger.user_state(&user).unwrap().cumulative_claimed, Decimal::ZERO);

        let event = SettlementEvent {
            user,
            amount: pending.amount,
            nonce: pending.nonce,
            tx_hash: "0x05".into(),
        };
        assert!(matches!(ledger.settle_claim(&event).unwrap(), SettlementOutcome::Applied { .. }));
    }

    #[test]
    fn test_settlement_amount_mismatch_does_not_mutate() {
        let (ledger, clock) = ledger_with(1_000_000, 5_000);
        let user = Address::new([5; 20]);
        ledger.commit_period(0, vec![record(0, "a", 5, "10")]).unwrap();
        ledger.reserve_authorization(&user, clock.now(), Duration::hours(1), "k1").unwrap();

        let wrong = SettlementEvent {
            user,
            amount: d("11"),
            nonce: 1,
            tx_hash: "0x02".into(),
        };
        assert!(matches!(ledger.settle_claim(&wrong), Err(EngineError::InvalidInput(_))));
        let state = ledger.user_state(&user).unwrap();
        assert_eq!(state.cumulative_claimed, Decimal::ZERO);
        assert_eq!(state.outstanding.len(), 1);
    }

    #[test]
    fn test_no_balance_no_reservation() {
        let (ledger, clock) = ledger_with(1_000_000, 5_000);
        assert!(matches!(
            ledger.reserve_authorization(&Address::new([8; 20]), clock.now(), Duration::hours(1), "k1"),
            Err(EngineError::NoClaimableBalance)
        ));
    }
}
