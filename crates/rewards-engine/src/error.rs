//! Error types for the rewards engine

use rewards_core::RewardsCoreError;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed position, price or settlement data. Never defaulted.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Budget exceeded: requested {requested}, available {available}")]
    BudgetExceeded { requested: Decimal, available: Decimal },

    #[error("Replay attempt: {0}")]
    ReplayAttempt(String),

    #[error("Key rotation too early: activation allowed at {activation_time}")]
    KeyRotationTooEarly { activation_time: chrono::DateTime<chrono::Utc> },

    #[error("No pending key rotation")]
    NoPendingRotation,

    #[error("Unknown signing key: {0}")]
    UnknownSigningKey(String),

    #[error("No claimable balance")]
    NoClaimableBalance,

    #[error("Claim ceiling exceeded: requested {requested}, headroom {headroom}")]
    CeilingExceeded { requested: Decimal, headroom: Decimal },

    #[error("Insufficient balance: requested {requested}, claimable {claimable}")]
    InsufficientBalance { requested: Decimal, claimable: Decimal },

    #[error("Claim already in flight: nonce {nonce} expires at {expires_at}")]
    ClaimInFlight {
        nonce: u64,
        expires_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("Period {period} already settled (last settled {last_settled})")]
    PeriodAlreadySettled { period: u64, last_settled: u64 },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Crypto error: {0}")]
    Crypto(String),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Errors an operator must see; never silently recovered
    pub fn is_security_relevant(&self) -> bool {
        matches!(self, EngineError::InvalidInput(_) | EngineError::ReplayAttempt(_))
    }

    /// Benign, user-facing rejections
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            EngineError::NoClaimableBalance
                | EngineError::ClaimInFlight { .. }
                | EngineError::CeilingExceeded { .. }
                | EngineError::InsufficientBalance { .. }
        )
    }
}

impl From<RewardsCoreError> for EngineError {
    fn from(err: RewardsCoreError) -> Self {
        EngineError::InvalidInput(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::Configuration(err.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Network(err.to_string())
    }
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for EngineError {
    fn from(err: rocksdb::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

#[cfg(feature = "rocksdb")]
impl From<bincode::Error> for EngineError {
    fn from(err: bincode::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}
