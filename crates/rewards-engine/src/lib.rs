//! # Rewards Engine
//!
//! Off-chain half of the liquidity-mining program: computes per-period
//! accruals, keeps the treasury ledger and issues signed claim
//! authorizations for the on-chain distribution contract.

pub mod accrual;
pub mod cache;
pub mod claims;
pub mod clock;
pub mod config;
pub mod endpoints;
pub mod engine;
pub mod error;
pub mod feeds;
pub mod keeper;
pub mod ledger;
pub mod locks;
pub mod signer;
pub mod store;

pub use accrual::{AccrualCalculator, PeriodComputation, RejectedPosition};
pub use claims::{ClaimAuthorizationService, ClaimSettings};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{create_example_config, EngineConfig, RetryConfig};
pub use engine::RewardsEngine;
pub use error::{EngineError, EngineResult};
pub use feeds::{CachedPoolFeed, HttpFeed, PoolFeed, PositionFeed, StaticFeed};
pub use keeper::{AccrualKeeper, KeeperHealth, PeriodReport};
pub use ledger::{AccrualDecision, ClaimDecision, ClaimLimits, PeriodCommit, SettlementOutcome, TreasuryLedger};
pub use signer::{verify_claim_authorization, ClaimSigningKey, ClaimVerifyingKey, KeyRing};
pub use store::{open_store, SharedStore, StateStore, StoreBatch};
