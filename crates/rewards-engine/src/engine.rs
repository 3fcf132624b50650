//! Service assembly
//!
//! Builds the ledger, claim service and keeper from one [`EngineConfig`]
//! over a shared store and clock.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use rewards_core::{TreasurySnapshot, TreasuryState};

use crate::accrual::AccrualCalculator;
use crate::claims::{ClaimAuthorizationService, ClaimSettings};
use crate::clock::{SharedClock, SystemClock};
use crate::config::{EngineConfig, ProgramConfig};
use crate::error::{EngineError, EngineResult};
use crate::feeds::{CachedPoolFeed, HttpFeed, PoolFeed, PositionFeed};
use crate::keeper::AccrualKeeper;
use crate::ledger::{ClaimLimits, TreasuryLedger};
use crate::signer::KeyRing;
use crate::store::{open_store, SharedStore};

impl ProgramConfig {
    /// Treasury used when the store holds none yet
    pub fn initial_treasury(&self) -> EngineResult<TreasuryState> {
        TreasuryState::new(
            self.total_allocation,
            self.daily_budget,
            self.program_start,
            self.program_duration_days,
            self.period_length_secs,
        )
        .map_err(|e| EngineError::Configuration(e.to_string()))
    }
}

/// Fully wired reward engine
pub struct RewardsEngine {
    config: EngineConfig,
    store: SharedStore,
    clock: SharedClock,
    ledger: Arc<TreasuryLedger>,
    claims: Arc<ClaimAuthorizationService>,
    keeper: Arc<AccrualKeeper>,
}

impl RewardsEngine {
    /// Production wiring: configured store, system clock, HTTP feeds
    ///
    /// Relative key paths resolve against `base_dir`, normally the directory
    /// of the configuration file.
    pub fn from_config(config: EngineConfig, base_dir: &Path) -> EngineResult<Self> {
        config.validate()?;
        let store = open_store(&config.storage)?;
        let keys = KeyRing::load(&config.signing, base_dir)?;

        let http = Arc::new(HttpFeed::from_config(&config)?);
        let pool: Arc<dyn PoolFeed> = Arc::new(CachedPoolFeed::new(
            http.clone(),
            Duration::from_secs(config.feeds.cache_ttl_secs),
        ));

        Self::assemble(config, store, Arc::new(SystemClock), keys, http, pool)
    }

    /// Wiring with every collaborator supplied by the caller
    pub fn assemble(
        config: EngineConfig,
        store: SharedStore,
        clock: SharedClock,
        keys: KeyRing,
        positions: Arc<dyn PositionFeed>,
        pool: Arc<dyn PoolFeed>,
    ) -> EngineResult<Self> {
        let ledger = Arc::new(TreasuryLedger::open(
            store.clone(),
            clock.clone(),
            config.program.initial_treasury()?,
            ClaimLimits::from(&config.claims),
        )?);

        let claims = Arc::new(ClaimAuthorizationService::open(
            ledger.clone(),
            store.clone(),
            clock.clone(),
            keys,
            ClaimSettings::from(&config.claims),
            &config.signing.initial_active_key_id,
        )?);

        let keeper = Arc::new(AccrualKeeper::new(
            ledger.clone(),
            store.clone(),
            clock.clone(),
            AccrualCalculator::new(config.classifier, config.formula)?,
            positions,
            pool,
            Duration::from_secs(config.keeper.tick_interval_secs),
        ));

        info!(
            backend = store.backend_name(),
            total_allocation = %config.program.total_allocation,
            daily_budget = %config.program.daily_budget,
            "Rewards engine assembled"
        );

        Ok(Self {
            config,
            store,
            clock,
            ledger,
            claims,
            keeper,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<TreasuryLedger> {
        &self.ledger
    }

    pub fn claims(&self) -> &Arc<ClaimAuthorizationService> {
        &self.claims
    }

    pub fn keeper(&self) -> &Arc<AccrualKeeper> {
        &self.keeper
    }

    pub fn snapshot(&self) -> TreasurySnapshot {
        TreasurySnapshot::from_state(&self.ledger.treasury(), self.clock.now())
    }
}
