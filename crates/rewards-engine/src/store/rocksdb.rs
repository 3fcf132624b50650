//! RocksDB state store with bincode values

use std::path::Path;
use std::sync::Arc;

use rocksdb::{ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, WriteBatch};
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use rewards_core::{
    accrual_key, Address, CalculatorAuthorization, Enrollment, PositionId, RewardAccrualRecord,
    SettlementRecord, TreasuryState, UserClaimState,
};

use super::{StateStore, StoreBatch};
use crate::error::{EngineError, EngineResult};

/// Type alias for the RocksDB instance
pub type RocksDB = DBWithThreadMode<MultiThreaded>;

const SINGLETON_KEY: &[u8] = b"singleton";

/// Column family names for different record types
pub struct ColumnFamilies;

impl ColumnFamilies {
    pub const TREASURY: &'static str = "treasury";
    pub const USERS: &'static str = "users";
    pub const ACCRUALS: &'static str = "accruals";
    pub const AUTHORIZATION: &'static str = "authorization";
    pub const ENROLLMENTS: &'static str = "enrollments";
    pub const SETTLEMENTS: &'static str = "settlements";

    pub fn all() -> Vec<&'static str> {
        vec![
            Self::TREASURY,
            Self::USERS,
            Self::ACCRUALS,
            Self::AUTHORIZATION,
            Self::ENROLLMENTS,
            Self::SETTLEMENTS,
        ]
    }
}

/// Durable store backed by RocksDB column families
#[derive(Clone)]
pub struct RocksStore {
    db: Arc<RocksDB>,
}

impl RocksStore {
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        info!("Initializing RocksDB at path: {}", path.display());

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ColumnFamilies::all()
            .into_iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                ColumnFamilyDescriptor::new(name, cf_opts)
            })
            .collect();

        let db = RocksDB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        info!("RocksDB initialized successfully");

        Ok(Self { db: Arc::new(db) })
    }

    fn get_cf(&self, name: &str) -> EngineResult<Arc<rocksdb::BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| EngineError::Storage(format!("Column family '{}' not found", name)))
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> EngineResult<Option<T>> {
        let cf = self.get_cf(cf_name)?;
        match self.db.get_cf(&cf, key)? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    /// Every value whose key starts with `prefix`
    fn scan_prefix<T: DeserializeOwned>(&self, cf_name: &str, prefix: &[u8]) -> EngineResult<Vec<T>> {
        let cf = self.get_cf(cf_name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(bincode::deserialize(&value)?);
        }
        Ok(values)
    }

    fn put<T: Serialize>(&self, batch: &mut WriteBatch, cf_name: &str, key: &[u8], value: &T) -> EngineResult<()> {
        let cf = self.get_cf(cf_name)?;
        batch.put_cf(&cf, key, bincode::serialize(value)?);
        Ok(())
    }
}

impl StateStore for RocksStore {
    fn load_treasury(&self) -> EngineResult<Option<TreasuryState>> {
        self.get(ColumnFamilies::TREASURY, SINGLETON_KEY)
    }

    fn load_users(&self) -> EngineResult<Vec<UserClaimState>> {
        self.scan_prefix(ColumnFamilies::USERS, &[])
    }

    fn load_user(&self, address: &Address) -> EngineResult<Option<UserClaimState>> {
        self.get(ColumnFamilies::USERS, address.as_bytes())
    }

    fn load_authorization(&self) -> EngineResult<Option<CalculatorAuthorization>> {
        self.get(ColumnFamilies::AUTHORIZATION, SINGLETON_KEY)
    }

    fn load_enrollments(&self) -> EngineResult<Vec<Enrollment>> {
        self.scan_prefix(ColumnFamilies::ENROLLMENTS, &[])
    }

    fn load_enrollment(&self, position_id: &PositionId) -> EngineResult<Option<Enrollment>> {
        self.get(ColumnFamilies::ENROLLMENTS, position_id.as_str().as_bytes())
    }

    fn accruals_for_period(&self, period_index: u64) -> EngineResult<Vec<RewardAccrualRecord>> {
        self.scan_prefix(ColumnFamilies::ACCRUALS, &period_index.to_be_bytes())
    }

    fn load_settlement(&self, tx_hash: &str) -> EngineResult<Option<SettlementRecord>> {
        self.get(ColumnFamilies::SETTLEMENTS, tx_hash.as_bytes())
    }

    fn commit(&self, batch: StoreBatch) -> EngineResult<()> {
        let mut write = WriteBatch::default();

        if let Some(treasury) = &batch.treasury {
            self.put(&mut write, ColumnFamilies::TREASURY, SINGLETON_KEY, treasury)?;
        }
        for user in &batch.users {
            self.put(&mut write, ColumnFamilies::USERS, user.address.as_bytes(), user)?;
        }
        for record in &batch.accruals {
            let key = accrual_key(record.period_index, &record.position_id);
            self.put(&mut write, ColumnFamilies::ACCRUALS, &key, record)?;
        }
        if let Some(authorization) = &batch.authorization {
            self.put(&mut write, ColumnFamilies::AUTHORIZATION, SINGLETON_KEY, authorization)?;
        }
        for enrollment in &batch.enrollments {
            self.put(
                &mut write,
                ColumnFamilies::ENROLLMENTS,
                enrollment.position_id.as_str().as_bytes(),
                enrollment,
            )?;
        }
        for settlement in &batch.settlements {
            self.put(&mut write, ColumnFamilies::SETTLEMENTS, settlement.tx_hash.as_bytes(), settlement)?;
        }

        let mut opts = rocksdb::WriteOptions::default();
        opts.set_sync(true);
        self.db.write_opt(write, &opts)?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "rocksdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn record(period: u64, id: &str) -> RewardAccrualRecord {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        RewardAccrualRecord {
            position_id: PositionId::new(id),
            owner: Address::new([1; 20]),
            period_index: period,
            period_start: start,
            period_end: start,
            computed_amount: Decimal::ONE,
            accrued_amount: Decimal::ONE,
            in_range_multiplier: Decimal::ONE,
            program_time_coefficient: Decimal::ONE,
            days_enrolled: Decimal::ZERO,
            truncated: false,
        }
    }

    #[test]
    fn test_accruals_scan_one_period() {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        let batch = StoreBatch {
            accruals: vec![record(1, "a"), record(1, "b"), record(2, "a")],
            ..StoreBatch::default()
        };
        store.commit(batch).unwrap();

        assert_eq!(store.accruals_for_period(1).unwrap().len(), 2);
        assert_eq!(store.accruals_for_period(2).unwrap().len(), 1);
        assert!(store.accruals_for_period(3).unwrap().is_empty());
    }
}
