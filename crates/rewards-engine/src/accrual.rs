//! Per-period accrual computation
//!
//! Classifies and prices every enrolled position for one period in parallel.
//! The result is a list of proposed records; budget capping happens later,
//! in a single `TreasuryLedger::commit_period` call.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rust_decimal::Decimal;
use tracing::{debug, error};

use rewards_core::{
    ClassifierParams, EligibilityClassifier, Enrollment, FormulaParams, PoolState, Position, PositionId,
    PositionSnapshot, PositionType, RewardAccrualRecord, RewardFormula, TreasuryState,
};

use crate::error::{EngineError, EngineResult};

/// Position that could not be priced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedPosition {
    pub position_id: PositionId,
    pub reason: String,
}

/// Proposed records of one period plus what was left out
#[derive(Debug, Clone, Default)]
pub struct PeriodComputation {
    pub period_index: u64,
    pub records: Vec<RewardAccrualRecord>,
    pub rejected: Vec<RejectedPosition>,
    pub inactive: usize,
    pub missing_snapshot: usize,
    pub not_yet_enrolled: usize,
    pub out_of_range: usize,
}

impl PeriodComputation {
    pub fn requested_total(&self) -> Decimal {
        self.records.iter().map(|r| r.computed_amount).sum()
    }
}

enum Outcome {
    Record(RewardAccrualRecord),
    Rejected(RejectedPosition),
    Inactive,
    MissingSnapshot,
    NotYetEnrolled,
}

/// Classifier plus formula
#[derive(Debug, Clone, Default)]
pub struct AccrualCalculator {
    classifier: EligibilityClassifier,
    formula: RewardFormula,
}

impl AccrualCalculator {
    pub fn new(classifier: ClassifierParams, formula: FormulaParams) -> EngineResult<Self> {
        Ok(Self {
            classifier: EligibilityClassifier::new(classifier),
            formula: RewardFormula::new(formula)?,
        })
    }

    pub fn formula(&self) -> &RewardFormula {
        &self.formula
    }

    /// Compute proposed accruals for `period_index`
    ///
    /// Invalid pool data fails the whole period; invalid position data only
    /// rejects that position.
    pub fn compute_period(
        &self,
        treasury: &TreasuryState,
        period_index: u64,
        pool: &PoolState,
        enrollments: &[Enrollment],
        snapshots: &[PositionSnapshot],
    ) -> EngineResult<PeriodComputation> {
        pool.validate()
            .map_err(|e| EngineError::InvalidInput(format!("pool state rejected: {}", e)))?;

        let (period_start, period_end) = treasury.period_bounds(period_index);
        let by_id: HashMap<&PositionId, &PositionSnapshot> =
            snapshots.iter().map(|s| (&s.position_id, s)).collect();

        let outcomes: Vec<Outcome> = enrollments
            .par_iter()
            .map(|enrollment| {
                self.evaluate(
                    enrollment,
                    by_id.get(&enrollment.position_id).copied(),
                    pool,
                    treasury.daily_budget,
                    period_index,
                    period_start,
                    period_end,
                )
            })
            .collect();

        // Join point: everything below runs after all positions are done
        let mut computation = PeriodComputation {
            period_index,
            ..PeriodComputation::default()
        };
        for outcome in outcomes {
            match outcome {
                Outcome::Record(record) => {
                    if record.in_range_multiplier.is_zero() {
                        computation.out_of_range += 1;
                    }
                    computation.records.push(record);
                }
                Outcome::Rejected(rejected) => {
                    error!(
                        period = period_index,
                        position = %rejected.position_id,
                        reason = %rejected.reason,
                        "Invalid position input"
                    );
                    computation.rejected.push(rejected);
                }
                Outcome::Inactive => computation.inactive += 1,
                Outcome::MissingSnapshot => computation.missing_snapshot += 1,
                Outcome::NotYetEnrolled => computation.not_yet_enrolled += 1,
            }
        }
        computation.records.sort_by(|a, b| a.position_id.cmp(&b.position_id));

        debug!(
            period = period_index,
            records = computation.records.len(),
            rejected = computation.rejected.len(),
            requested = %computation.requested_total(),
            "Computed period accruals"
        );
        Ok(computation)
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate(
        &self,
        enrollment: &Enrollment,
        snapshot: Option<&PositionSnapshot>,
        pool: &PoolState,
        daily_budget: Decimal,
        period_index: u64,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Outcome {
        // Only positions enrolled for the whole period earn it
        if enrollment.enrolled_at > period_start {
            return Outcome::NotYetEnrolled;
        }
        let Some(snapshot) = snapshot else {
            return Outcome::MissingSnapshot;
        };
        if !snapshot.is_active {
            return Outcome::Inactive;
        }

        let reject = |reason: String| {
            Outcome::Rejected(RejectedPosition {
                position_id: enrollment.position_id.clone(),
                reason,
            })
        };

        let position = match Position::from_snapshot(enrollment, snapshot, pool) {
            Ok(position) => position,
            Err(e) => return reject(e.to_string()),
        };

        let classification = self.classifier.classify(
            &position,
            snapshot.token0_balance,
            snapshot.token1_balance,
            pool.token0_decimals,
            pool.token1_decimals,
        );
        if classification.position_type == PositionType::Unknown && classification.in_range {
            debug!(position = %position.position_id, "Unclassified in-range position");
        }

        let days_enrolled = match position.days_enrolled_at(period_start) {
            Ok(days) => days,
            Err(e) => return reject(e.to_string()),
        };

        match self.formula.breakdown(
            position.liquidity_value_usd,
            pool.total_pool_liquidity_usd,
            days_enrolled,
            classification.multiplier,
            daily_budget,
        ) {
            Ok(breakdown) => Outcome::Record(RewardAccrualRecord {
                position_id: position.position_id,
                owner: position.owner,
                period_index,
                period_start,
                period_end,
                computed_amount: breakdown.amount,
                accrued_amount: Decimal::ZERO,
                in_range_multiplier: classification.multiplier,
                program_time_coefficient: breakdown.time_coefficient,
                days_enrolled,
                truncated: false,
            }),
            Err(e) => reject(e.to_string()),
        }
    }
}
