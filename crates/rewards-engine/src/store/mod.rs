//! Persistent state for the ledger, claim service and keeper.
//!
//! Every mutation is expressed as one [`StoreBatch`] and applied with a single
//! `commit`, so a claim or a period never partially lands on disk.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use rewards_core::{
    Address, CalculatorAuthorization, Enrollment, PositionId, RewardAccrualRecord, SettlementRecord,
    TreasuryState, UserClaimState,
};

use crate::config::{StorageBackend, StorageConfig};
use crate::error::EngineResult;

pub mod file;
pub mod memory;
#[cfg(feature = "rocksdb")]
pub mod rocksdb;

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb")]
pub use self::rocksdb::RocksStore;

/// Set of writes applied atomically
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreBatch {
    pub treasury: Option<TreasuryState>,
    pub users: Vec<UserClaimState>,
    pub accruals: Vec<RewardAccrualRecord>,
    pub authorization: Option<CalculatorAuthorization>,
    pub enrollments: Vec<Enrollment>,
    pub settlements: Vec<SettlementRecord>,
}

impl StoreBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_treasury(mut self, treasury: TreasuryState) -> Self {
        self.treasury = Some(treasury);
        self
    }

    pub fn with_user(mut self, user: UserClaimState) -> Self {
        self.users.push(user);
        self
    }

    pub fn with_authorization(mut self, authorization: CalculatorAuthorization) -> Self {
        self.authorization = Some(authorization);
        self
    }

    pub fn with_enrollment(mut self, enrollment: Enrollment) -> Self {
        self.enrollments.push(enrollment);
        self
    }

    pub fn with_settlement(mut self, settlement: SettlementRecord) -> Self {
        self.settlements.push(settlement);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.treasury.is_none()
            && self.users.is_empty()
            && self.accruals.is_empty()
            && self.authorization.is_none()
            && self.enrollments.is_empty()
            && self.settlements.is_empty()
    }
}

/// Storage port used by the engine
///
/// Implementations are synchronous: every call is one local disk round trip,
/// and callers hold short-lived ledger locks across `commit`.
pub trait StateStore: Send + Sync {
    fn load_treasury(&self) -> EngineResult<Option<TreasuryState>>;

    fn load_users(&self) -> EngineResult<Vec<UserClaimState>>;

    fn load_user(&self, address: &Address) -> EngineResult<Option<UserClaimState>>;

    fn load_authorization(&self) -> EngineResult<Option<CalculatorAuthorization>>;

    fn load_enrollments(&self) -> EngineResult<Vec<Enrollment>>;

    fn load_enrollment(&self, position_id: &PositionId) -> EngineResult<Option<Enrollment>>;

    /// Accrual records of one period, ordered by position id
    fn accruals_for_period(&self, period_index: u64) -> EngineResult<Vec<RewardAccrualRecord>>;

    fn load_settlement(&self, tx_hash: &str) -> EngineResult<Option<SettlementRecord>>;

    /// Apply every write in `batch` or none of them
    fn commit(&self, batch: StoreBatch) -> EngineResult<()>;

    fn backend_name(&self) -> &'static str;
}

pub type SharedStore = Arc<dyn StateStore>;

/// Open the configured backend
pub fn open_store(config: &StorageConfig) -> EngineResult<SharedStore> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::File => Ok(Arc::new(FileStore::open_with_compaction(
            &config.path,
            config.journal_compact_after,
        )?)),
        #[cfg(feature = "rocksdb")]
        StorageBackend::Rocksdb => Ok(Arc::new(RocksStore::open(&config.path)?)),
        #[cfg(not(feature = "rocksdb"))]
        StorageBackend::Rocksdb => Err(crate::error::EngineError::Configuration(
            "rocksdb backend requested but the `rocksdb` feature is not enabled".to_string(),
        )),
    }
}
