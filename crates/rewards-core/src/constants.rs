//! # Program Constants
//!
//! Fixed parameters of the liquidity-mining program including:
//! - Time coefficient bounds for the reward formula
//! - Classifier thresholds (full-range detection, ratio tolerances)
//! - Claim ceiling tiers and signing-key rotation delay
//! - Amount precision

use rust_decimal::Decimal;

// ============================================================================
// Time Constants
// ============================================================================

/// Seconds in one day
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Default accrual period length (one day)
pub const DEFAULT_PERIOD_LENGTH_SECS: i64 = SECONDS_PER_DAY;

/// Delay before a proposed signing key may become active (24h)
pub const KEY_ROTATION_DELAY_SECS: i64 = 24 * 60 * 60;

/// Default lifetime of an issued claim authorization (1h)
pub const DEFAULT_AUTHORIZATION_TTL_SECS: i64 = 60 * 60;

/// Default wait for a settlement report after an authorization expires (1h)
pub const DEFAULT_SETTLEMENT_GRACE_SECS: i64 = 60 * 60;

// ============================================================================
// Reward Formula
// ============================================================================

/// Time coefficient for a freshly enrolled position (0.6)
pub const MIN_TIME_COEFFICIENT: Decimal = Decimal::from_parts(6, 0, 0, false, 1);

/// Time coefficient once the enrollment horizon is reached (1.0)
pub const MAX_TIME_COEFFICIENT: Decimal = Decimal::ONE;

/// Days of enrollment after which the coefficient saturates
pub const DEFAULT_ENROLLMENT_HORIZON_DAYS: u32 = 365;

/// Decimal places kept on recorded token amounts
pub const TOKEN_AMOUNT_SCALE: u32 = 6;

/// Default decimals of the reward token on-chain
pub const DEFAULT_REWARD_TOKEN_DECIMALS: u32 = 18;

/// Largest token decimals the base-unit conversion accepts
pub const MAX_TOKEN_DECIMALS: u32 = 30;

// ============================================================================
// Classifier Thresholds
// ============================================================================

/// Lower bound at or below which a range counts as open-ended
pub const FULL_RANGE_PRICE_FLOOR: f64 = 1e-12;

/// Upper bound at or above which a range counts as open-ended
pub const FULL_RANGE_PRICE_CEILING: f64 = 1e12;

/// Expected token0 value share when price sits at the bottom of the range
pub const EXPECTED_RATIO_AT_LOWER: f64 = 0.1;

/// Expected token0 value share when price sits at the top of the range
pub const EXPECTED_RATIO_AT_UPPER: f64 = 0.9;

/// Allowed deviation between observed and expected ratio for double-sided (10%)
pub const DOUBLE_SIDED_RATIO_TOLERANCE: f64 = 0.10;

/// Distance from 0 or 1 under which a ratio counts as single-sided (5%)
pub const SINGLE_SIDED_RATIO_THRESHOLD: f64 = 0.05;

// ============================================================================
// Claim Ceiling Tiers
// ============================================================================

/// Cumulative claim ceiling granted to a user with no claim history
pub const INITIAL_CLAIM_CEILING: Decimal = Decimal::from_parts(1_000, 0, 0, false, 0);

/// Increment applied to the ceiling after each successful claim
pub const CLAIM_CEILING_STEP: Decimal = Decimal::from_parts(200, 0, 0, false, 0);

/// Program-wide per-user maximum cumulative claim
pub const ABSOLUTE_MAX_CLAIM_PER_USER: Decimal = Decimal::from_parts(50_000, 0, 0, false, 0);

/// Expired, unsettled authorizations kept per user so late reports still settle
pub const MAX_STALE_AUTHORIZATIONS: usize = 16;

// ============================================================================
// Signing Domain
// ============================================================================

/// Domain separation tag prepended to every claim digest
pub const CLAIM_DOMAIN_V1: &[u8] = b"LM_CLAIM_V1";
