use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use rewards_core::{
    Address, ClassifierParams, FormulaParams, ABSOLUTE_MAX_CLAIM_PER_USER, CLAIM_CEILING_STEP,
    DEFAULT_AUTHORIZATION_TTL_SECS, DEFAULT_PERIOD_LENGTH_SECS, DEFAULT_REWARD_TOKEN_DECIMALS,
    DEFAULT_SETTLEMENT_GRACE_SECS, INITIAL_CLAIM_CEILING, KEY_ROTATION_DELAY_SECS, MAX_TOKEN_DECIMALS,
};

use crate::error::{EngineError, EngineResult};
use crate::store::file::DEFAULT_JOURNAL_COMPACT_AFTER;

/// Engine configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EngineConfig {
    /// Treasury and schedule of the program
    #[serde(default)]
    pub program: ProgramConfig,

    /// Reward formula coefficients
    #[serde(default)]
    pub formula: FormulaParams,

    /// Eligibility classifier thresholds
    #[serde(default)]
    pub classifier: ClassifierParams,

    /// Claim authorization parameters
    #[serde(default)]
    pub claims: ClaimsConfig,

    /// Calculator signing keys
    #[serde(default)]
    pub signing: SigningConfig,

    /// Persistent state backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// Position and pool feed endpoints
    #[serde(default)]
    pub feeds: FeedsConfig,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-endpoint circuit breaker
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Logging configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// Accrual scheduler
    #[serde(default)]
    pub keeper: KeeperSettings,
}

/// Treasury and schedule
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProgramConfig {
    /// Total tokens funded for the program
    pub total_allocation: Decimal,

    /// Tokens distributable per accrual period
    pub daily_budget: Decimal,

    /// First instant of period 0
    pub program_start: DateTime<Utc>,

    /// Program length in days
    pub program_duration_days: u32,

    /// Accrual period length in seconds
    pub period_length_secs: i64,
}

/// Claim authorization parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClaimsConfig {
    /// Chain the verifying contract lives on
    pub chain_id: u64,

    /// Verifying contract bound into every signature
    pub contract_address: Address,

    /// Decimals of the reward token on-chain
    pub token_decimals: u32,

    /// Lifetime of an issued authorization
    pub authorization_ttl_secs: i64,

    /// Time after expiry during which a settlement report is still awaited
    /// before the same balance may be authorized again
    #[serde(default = "default_settlement_grace_secs")]
    pub settlement_grace_secs: i64,

    /// Ceiling for users without claim history
    pub initial_claim_ceiling: Decimal,

    /// Ceiling increase per successful claim
    pub claim_ceiling_step: Decimal,

    /// Hard per-user cap
    pub absolute_max_claim_per_user: Decimal,

    /// Delay between proposing and activating a signing key
    pub key_rotation_delay_secs: i64,
}

/// One loadable signing key
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SigningKeyConfig {
    /// Identifier bound into signatures
    pub id: String,

    /// File containing the hex-encoded 32-byte seed
    pub seed_file: PathBuf,
}

/// Calculator keys
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SigningConfig {
    /// Key trusted at first start; later rotations are persisted
    pub initial_active_key_id: String,

    /// Keys available to the key ring
    pub keys: Vec<SigningKeyConfig>,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
    Rocksdb,
}

/// Persistent state backend
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: PathBuf,

    /// File backend: journal entries folded into the snapshot at once
    #[serde(default = "default_journal_compact_after")]
    pub journal_compact_after: usize,
}

/// Feed endpoints
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedsConfig {
    /// Ordered list of valuation service endpoints
    pub endpoints: Vec<String>,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Pool state cache lifetime in seconds
    pub cache_ttl_secs: u64,
}

/// Retry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Maximum number of retries for failed operations
    pub max_retries: u32,

    /// Base delay between retries in milliseconds
    pub base_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close it again
    pub success_threshold: u32,

    /// Time an open breaker waits before probing
    pub cooldown_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub structured_logging: bool,
}

/// Accrual scheduler settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeeperSettings {
    /// How often the scheduler checks for elapsed periods
    pub tick_interval_secs: u64,
}

impl EngineConfig {
    /// Load configuration from TOML file
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            EngineError::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: EngineConfig = toml::from_str(&content).map_err(|e| {
            EngineError::Configuration(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> EngineResult<()> {
        self.program.validate()?;
        self.formula.validate()?;
        self.validate_classifier()?;
        self.claims.validate()?;
        self.signing.validate()?;
        self.feeds.validate()?;
        self.retry.validate()?;
        self.circuit_breaker.validate()?;

        if self.keeper.tick_interval_secs == 0 {
            return Err(invalid_parameter("tick_interval_secs", "0", "greater than 0"));
        }
        if self.storage.journal_compact_after == 0 {
            return Err(invalid_parameter("journal_compact_after", "0", "greater than 0"));
        }

        Ok(())
    }

    fn validate_classifier(&self) -> EngineResult<()> {
        let c = &self.classifier;
        if !(0.0..0.5).contains(&c.ratio_tolerance) {
            return Err(invalid_parameter("ratio_tolerance", &c.ratio_tolerance.to_string(), "in [0, 0.5)"));
        }
        if !(0.0..0.5).contains(&c.single_sided_threshold) {
            return Err(invalid_parameter(
                "single_sided_threshold",
                &c.single_sided_threshold.to_string(),
                "in [0, 0.5)",
            ));
        }
        if !(c.full_range_floor < c.full_range_ceiling) {
            return Err(invalid_parameter(
                "full_range_floor",
                &c.full_range_floor.to_string(),
                "below full_range_ceiling",
            ));
        }
        Ok(())
    }

    /// Example configuration used by `init-config` and tests
    pub fn example() -> Self {
        Self {
            claims: ClaimsConfig {
                chain_id: 8453,
                contract_address: Address::new([0x11; 20]),
                ..ClaimsConfig::default()
            },
            signing: SigningConfig {
                initial_active_key_id: "calculator-1".to_string(),
                keys: vec![
                    SigningKeyConfig {
                        id: "calculator-1".to_string(),
                        seed_file: PathBuf::from("keys/calculator-1.hex"),
                    },
                    SigningKeyConfig {
                        id: "calculator-2".to_string(),
                        seed_file: PathBuf::from("keys/calculator-2.hex"),
                    },
                ],
            },
            feeds: FeedsConfig {
                endpoints: vec![
                    "http://127.0.0.1:8080".to_string(),
                    "http://127.0.0.1:8081".to_string(),
                ],
                ..FeedsConfig::default()
            },
            ..Self::default()
        }
    }
}

impl ProgramConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.total_allocation <= Decimal::ZERO {
            return Err(invalid_parameter("total_allocation", &self.total_allocation.to_string(), "greater than 0"));
        }
        if self.daily_budget <= Decimal::ZERO || self.daily_budget > self.total_allocation {
            return Err(invalid_parameter(
                "daily_budget",
                &self.daily_budget.to_string(),
                &format!("in (0, total_allocation ({})]", self.total_allocation),
            ));
        }
        if self.program_duration_days == 0 {
            return Err(invalid_parameter("program_duration_days", "0", "greater than 0"));
        }
        if self.period_length_secs <= 0 {
            return Err(invalid_parameter(
                "period_length_secs",
                &self.period_length_secs.to_string(),
                "greater than 0",
            ));
        }
        Ok(())
    }
}

impl ClaimsConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.chain_id == 0 {
            return Err(invalid_parameter("chain_id", "0", "greater than 0"));
        }
        if self.contract_address.is_zero() {
            return Err(invalid_parameter("contract_address", "zero address", "the verifying contract"));
        }
        if self.token_decimals > MAX_TOKEN_DECIMALS {
            return Err(invalid_parameter(
                "token_decimals",
                &self.token_decimals.to_string(),
                &format!("at most {}", MAX_TOKEN_DECIMALS),
            ));
        }
        if self.authorization_ttl_secs <= 0 {
            return Err(invalid_parameter(
                "authorization_ttl_secs",
                &self.authorization_ttl_secs.to_string(),
                "greater than 0",
            ));
        }
        if self.settlement_grace_secs < 0 {
            return Err(invalid_parameter(
                "settlement_grace_secs",
                &self.settlement_grace_secs.to_string(),
                "non-negative",
            ));
        }
        if self.initial_claim_ceiling <= Decimal::ZERO {
            return Err(invalid_parameter(
                "initial_claim_ceiling",
                &self.initial_claim_ceiling.to_string(),
                "greater than 0",
            ));
        }
        if self.claim_ceiling_step < Decimal::ZERO {
            return Err(invalid_parameter(
                "claim_ceiling_step",
                &self.claim_ceiling_step.to_string(),
                "non-negative",
            ));
        }
        if self.absolute_max_claim_per_user < self.initial_claim_ceiling {
            return Err(invalid_parameter(
                "absolute_max_claim_per_user",
                &self.absolute_max_claim_per_user.to_string(),
                &format!("at least initial_claim_ceiling ({})", self.initial_claim_ceiling),
            ));
        }
        if self.key_rotation_delay_secs < KEY_ROTATION_DELAY_SECS {
            return Err(invalid_parameter(
                "key_rotation_delay_secs",
                &self.key_rotation_delay_secs.to_string(),
                &format!("at least {}", KEY_ROTATION_DELAY_SECS),
            ));
        }
        Ok(())
    }
}

impl SigningConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.keys.is_empty() {
            return Err(invalid_parameter("signing.keys", "empty", "at least one key"));
        }
        for (i, key) in self.keys.iter().enumerate() {
            if key.id.is_empty() {
                return Err(invalid_parameter("signing.keys.id", "empty", "non-empty string"));
            }
            if self.keys[..i].iter().any(|k| k.id == key.id) {
                return Err(invalid_parameter("signing.keys.id", &key.id, "unique key ids"));
            }
        }
        if !self.keys.iter().any(|k| k.id == self.initial_active_key_id) {
            return Err(invalid_parameter(
                "initial_active_key_id",
                &self.initial_active_key_id,
                "one of the configured keys",
            ));
        }
        Ok(())
    }
}

impl FeedsConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.endpoints.iter().any(|e| e.trim().is_empty()) {
            return Err(invalid_parameter("feeds.endpoints", "empty entry", "non-empty URLs"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid_parameter("request_timeout_secs", "0", "greater than 0"));
        }
        Ok(())
    }
}

impl RetryConfig {
    /// Validate retry configuration
    fn validate(&self) -> EngineResult<()> {
        if self.max_retries == 0 {
            return Err(invalid_parameter("max_retries", "0", "greater than 0"));
        }

        if self.base_delay_ms == 0 {
            return Err(invalid_parameter("base_delay_ms", "0", "greater than 0"));
        }

        if self.max_delay_ms < self.base_delay_ms {
            return Err(invalid_parameter(
                "max_delay_ms",
                &self.max_delay_ms.to_string(),
                &format!("greater than or equal to base_delay_ms ({})", self.base_delay_ms),
            ));
        }

        if self.backoff_multiplier <= 1.0 {
            return Err(invalid_parameter(
                "backoff_multiplier",
                &self.backoff_multiplier.to_string(),
                "greater than 1.0",
            ));
        }

        Ok(())
    }

    /// Calculate delay for retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return self.base_delay_ms;
        }

        let exponential_delay = self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        (exponential_delay as u64).min(self.max_delay_ms)
    }
}

impl CircuitBreakerConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.failure_threshold == 0 {
            return Err(invalid_parameter("failure_threshold", "0", "greater than 0"));
        }
        if self.success_threshold == 0 {
            return Err(invalid_parameter("success_threshold", "0", "greater than 0"));
        }
        Ok(())
    }
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            total_allocation: Decimal::from(1_000_000),
            daily_budget: Decimal::from(7_960),
            program_start: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().unwrap_or_default(),
            program_duration_days: 125,
            period_length_secs: DEFAULT_PERIOD_LENGTH_SECS,
        }
    }
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            contract_address: Address::default(),
            token_decimals: DEFAULT_REWARD_TOKEN_DECIMALS,
            authorization_ttl_secs: DEFAULT_AUTHORIZATION_TTL_SECS,
            settlement_grace_secs: DEFAULT_SETTLEMENT_GRACE_SECS,
            initial_claim_ceiling: INITIAL_CLAIM_CEILING,
            claim_ceiling_step: CLAIM_CEILING_STEP,
            absolute_max_claim_per_user: ABSOLUTE_MAX_CLAIM_PER_USER,
            key_rotation_delay_secs: KEY_ROTATION_DELAY_SECS,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            path: "./data/rewards-state".into(),
            journal_compact_after: DEFAULT_JOURNAL_COMPACT_AFTER,
        }
    }
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![],
            request_timeout_secs: 10,
            cache_ttl_secs: 30,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            cooldown_secs: 30,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            structured_logging: false,
        }
    }
}

impl Default for KeeperSettings {
    fn default() -> Self {
        Self { tick_interval_secs: 60 }
    }
}

fn default_settlement_grace_secs() -> i64 {
    DEFAULT_SETTLEMENT_GRACE_SECS
}

fn default_journal_compact_after() -> usize {
    DEFAULT_JOURNAL_COMPACT_AFTER
}

/// Create example configuration file
pub fn create_example_config(path: impl AsRef<Path>) -> EngineResult<()> {
    EngineConfig::example().save(path)
}

fn invalid_parameter(name: &str, value: &str, expected: &str) -> EngineError {
    EngineError::Configuration(format!("invalid {}: got {}, expected {}", name, value, expected))
}
