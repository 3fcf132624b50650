//! Accrual keeper
//!
//! Periodically commits every accrual period that has fully elapsed. Feeds
//! are fetched once per tick; if several periods are pending (after downtime)
//! they are committed one after another from that same data.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use rewards_core::{Address, Enrollment, PositionId, TreasurySnapshot};

use crate::accrual::{AccrualCalculator, PeriodComputation};
use crate::clock::SharedClock;
use crate::error::{EngineError, EngineResult};
use crate::feeds::{PoolFeed, PositionFeed};
use crate::ledger::{PeriodCommit, TreasuryLedger};
use crate::store::{SharedStore, StoreBatch};

/// What happened to one period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodReport {
    pub commit: PeriodCommit,
    pub rejected: usize,
    pub inactive: usize,
    pub missing_snapshot: usize,
    pub out_of_range: usize,
}

impl PeriodReport {
    fn new(computation: &PeriodComputation, commit: PeriodCommit) -> Self {
        Self {
            commit,
            rejected: computation.rejected.len(),
            inactive: computation.inactive,
            missing_snapshot: computation.missing_snapshot,
            out_of_range: computation.out_of_range,
        }
    }
}

/// Keeper status for health logs
#[derive(Debug, Clone, PartialEq)]
pub struct KeeperHealth {
    pub treasury: TreasurySnapshot,
    pub pending_periods: u64,
    pub enrolled_positions: usize,
}

pub struct AccrualKeeper {
    ledger: Arc<TreasuryLedger>,
    store: SharedStore,
    clock: SharedClock,
    calculator: AccrualCalculator,
    positions: Arc<dyn PositionFeed>,
    pool: Arc<dyn PoolFeed>,
    tick_interval: Duration,
    /// Serializes enrollment and period processing
    running: Mutex<()>,
}

impl AccrualKeeper {
    pub fn new(
        ledger: Arc<TreasuryLedger>,
        store: SharedStore,
        clock: SharedClock,
        calculator: AccrualCalculator,
        positions: Arc<dyn PositionFeed>,
        pool: Arc<dyn PoolFeed>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            ledger,
            store,
            clock,
            calculator,
            positions,
            pool,
            tick_interval,
            running: Mutex::new(()),
        }
    }

    pub fn ledger(&self) -> &Arc<TreasuryLedger> {
        &self.ledger
    }

    /// Enroll a position in the program
    ///
    /// `enrolled_at` defaults to now and may not lie in the future.
    pub fn register_position(
        &self,
        position_id: PositionId,
        owner: Address,
        enrolled_at: Option<DateTime<Utc>>,
    ) -> EngineResult<Enrollment> {
        let _guard = self.running.lock();
        let now = self.clock.now();
        let enrolled_at = enrolled_at.unwrap_or(now);

        if position_id.as_str().trim().is_empty() {
            return Err(EngineError::InvalidInput("position id must not be empty".into()));
        }
        if owner.is_zero() {
            return Err(EngineError::InvalidInput("owner must not be the zero address".into()));
        }
        if enrolled_at > now {
            return Err(EngineError::InvalidInput(format!(
                "enrollment time {} is in the future",
                enrolled_at
            )));
        }
        if let Some(existing) = self.store.load_enrollment(&position_id)? {
            return Err(EngineError::InvalidInput(format!(
                "position {} already enrolled by {} at {}",
                position_id, existing.owner, existing.enrolled_at
            )));
        }

        let enrollment = Enrollment {
            position_id,
            owner,
            enrolled_at,
        };
        self.store.commit(StoreBatch::new().with_enrollment(enrollment.clone()))?;
        info!(
            position = %enrollment.position_id,
            owner = %enrollment.owner,
            enrolled_at = %enrollment.enrolled_at,
            "Registered position"
        );
        Ok(enrollment)
    }

    /// Commit every elapsed, uncommitted period
    pub async fn process_pending_periods(&self) -> EngineResult<Vec<PeriodReport>> {
        let now = self.clock.now();
        let treasury = self.ledger.treasury();
        let pending = treasury.pending_periods_at(now);
        if pending.is_empty() {
            debug!("No elapsed periods to commit");
            return Ok(Vec::new());
        }
        if pending.end - pending.start > 1 {
            warn!(
                first = pending.start,
                last = pending.end - 1,
                "Catching up on several periods with the current feed data"
            );
        }

        let (positions, pool) =
            futures::try_join!(self.positions.fetch_positions(), self.pool.fetch_pool_state())?;

        let _guard = self.running.lock();
        let enrollments = self.store.load_enrollments()?;
        let mut reports = Vec::with_capacity((pending.end - pending.start) as usize);

        for period in pending {
            let computation = self
                .calculator
                .compute_period(&treasury, period, &pool, &enrollments, &positions)?;
            let commit = match self.ledger.commit_period(period, computation.records.clone()) {
                Ok(commit) => commit,
                // Another caller got there first
                Err(EngineError::PeriodAlreadySettled { .. }) => continue,
                Err(e) => return Err(e),
            };
            let report = PeriodReport::new(&computation, commit);
            if report.rejected > 0 {
                warn!(period, rejected = report.rejected, "Positions rejected for invalid input");
            }
            reports.push(report);
        }

        Ok(reports)
    }

    pub fn health(&self) -> EngineResult<KeeperHealth> {
        let now = self.clock.now();
        let treasury = self.ledger.treasury();
        let pending = treasury.pending_periods_at(now);
        Ok(KeeperHealth {
            treasury: TreasurySnapshot::from_state(&treasury, now),
            pending_periods: pending.end - pending.start,
            enrolled_positions: self.store.load_enrollments()?.len(),
        })
    }

    /// Tick until `shutdown` resolves
    pub async fn run<S>(&self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        let mut interval_timer = time::interval(self.tick_interval);
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        let mut iteration = 0u64;

        info!(interval_secs = self.tick_interval.as_secs(), "Accrual keeper started");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(iteration, "Shutdown requested, stopping accrual keeper");
                    break;
                }
                _ = interval_timer.tick() => {}
            }
            iteration += 1;

            debug!("Starting keeper iteration {}", iteration);

            match self.process_pending_periods().await {
                Ok(reports) if !reports.is_empty() => {
                    let granted: Decimal = reports.iter().map(|r| r.commit.granted).sum();
                    info!(iteration, periods = reports.len(), %granted, "Committed accrual periods");
                }
                Ok(_) => debug!("Iteration {}: no periods pending", iteration),
                Err(e) => {
                    error!(iteration, error = %e, "Error in keeper iteration");
                    // Uncommitted periods are picked up again on the next tick
                }
            }

            if iteration % 100 == 0 {
                match self.health() {
                    Ok(health) => info!(
                        iteration,
                        remaining = %health.treasury.remaining_allocation,
                        last_period = ?health.treasury.last_settled_period,
                        pending = health.pending_periods,
                        positions = health.enrolled_positions,
                        "Keeper health check"
                    ),
                    Err(e) => warn!(error = %e, "Health check warning"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::feeds::StaticFeed;
    use crate::ledger::ClaimLimits;
    use crate::store::{MemoryStore, StateStore};
    use chrono::TimeZone;
    use rewards_core::{PoolState, PositionSnapshot, TreasuryState};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn owner() -> Address {
        Address::new([7; 20])
    }

    fn pool() -> PoolState {
        PoolState {
            total_pool_liquidity_usd: Decimal::from(10_000),
            current_pool_price: 1.0,
            token0_decimals: 6,
            token1_decimals: 6,
            observed_at: start(),
        }
    }

    fn snapshot(id: &str) -> PositionSnapshot {
        PositionSnapshot {
            position_id: PositionId::new(id),
            owner: owner(),
            token0_balance: Decimal::from(1_000_000_000),
            token1_balance: Decimal::from(1_000_000_000),
            price_range_lower: 0.5,
            price_range_upper: 2.0,
            liquidity_value_usd: Decimal::from(10_000),
            is_active: true,
        }
    }

    fn keeper(clock: &ManualClock, feed: Arc<StaticFeed>) -> AccrualKeeper {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let clock: SharedClock = Arc::new(clock.clone());
        let treasury = TreasuryState::new(Decimal::from(1_000_000), Decimal::from(100), start(), 30, 86_400).unwrap();
        let ledger = Arc::new(TreasuryLedger::open(store.clone(), clock.clone(), treasury, ClaimLimits::default()).unwrap());
        AccrualKeeper::new(
            ledger,
            store,
            clock,
            AccrualCalculator::default(),
            feed.clone(),
            feed,
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_commits_elapsed_periods_once() {
        let clock = ManualClock::new(start());
        let feed = Arc::new(StaticFeed::new(vec![snapshot("a")], pool()));
        let keeper = keeper(&clock, feed);
        keeper.register_position(PositionId::new("a"), owner(), None).unwrap();

        assert!(keeper.process_pending_periods().await.unwrap().is_empty());

        clock.advance(chrono::Duration::days(3));
        let reports = keeper.process_pending_periods().await.unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].commit.period_index, 0);
        // Sole provider: whole pool share, coefficient starts at 0.6
        assert_eq!(reports[0].commit.granted, Decimal::from(60));

        assert!(keeper.process_pending_periods().await.unwrap().is_empty());
        let state = keeper.ledger().user_state(&owner()).unwrap();
        assert!(state.cumulative_accrued > Decimal::from(180));
    }

    #[tokio::test]
    async fn test_mid_period_registration_skips_that_period() {
        let clock = ManualClock::new(start());
        let feed = Arc::new(StaticFeed::new(vec![snapshot("a")], pool()));
        let keeper = keeper(&clock, feed);

        clock.advance(chrono::Duration::hours(23) + chrono::Duration::minutes(59));
        let enrollment = keeper.register_position(PositionId::new("a"), owner(), None).unwrap();
        assert_eq!(enrollment.enrolled_at, clock.now());

        clock.advance(chrono::Duration::days(1));
        let reports = keeper.process_pending_periods().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].commit.period_index, 0);
        assert_eq!(reports[0].commit.records, 0);
        assert_eq!(reports[0].commit.granted, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_duplicate_and_future_registration_rejected() {
        let clock = ManualClock::new(start());
        let keeper = keeper(&clock, Arc::new(StaticFeed::new(vec![], pool())));

        keeper.register_position(PositionId::new("a"), owner(), None).unwrap();
        assert!(matches!(
            keeper.register_position(PositionId::new("a"), owner(), None),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            keeper.register_position(
                PositionId::new("b"),
                owner(),
                Some(start() + chrono::Duration::hours(1))
            ),
            Err(EngineError::InvalidInput(_))
        ));
        assert_eq!(keeper.store.load_enrollments().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_feed_failure_leaves_period_pending() {
        let clock = ManualClock::new(start());
        let feed = Arc::new(StaticFeed::default());
        let keeper = keeper(&clock, feed.clone());
        clock.advance(chrono::Duration::days(1));

        assert!(keeper.process_pending_periods().await.is_err());
        assert_eq!(keeper.health().unwrap().pending_periods, 1);

        feed.set_pool(pool());
        assert_eq!(keeper.process_pending_periods().await.unwrap().len(), 1);
        assert_eq!(keeper.health().unwrap().pending_periods, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let clock = ManualClock::new(start() + chrono::Duration::days(1));
        let keeper = keeper(&clock, Arc::new(StaticFeed::new(vec![], pool())));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(());
        };
        tokio::join!(
            keeper.run(async {
                let _ = rx.await;
            }),
            handle
        );
        assert_eq!(keeper.ledger().treasury().last_settled_period, Some(0));
    }
}
