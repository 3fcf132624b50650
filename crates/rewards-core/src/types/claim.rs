//! # Claim Types
//!
//! The signed authorization handed to a user's wallet and the settlement
//! report that comes back once the contract has paid out.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::errors::{CoreResult, RewardsCoreError};
use crate::types::address::Address;

#[cfg(feature = "client")]
use serde::{Deserialize, Serialize};

/// Signed permission to claim `amount` once, before `expires_at`
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "client", derive(Serialize, Deserialize))]
pub struct ClaimAuthorization {
    pub user: Address,
    pub amount: Decimal,
    /// `amount` in reward-token base units, as the contract sees it
    pub amount_base_units: u128,
    pub nonce: u64,
    /// Hex-encoded ed25519 signature
    pub signature: String,
    pub key_id: String,
    pub contract_address: Address,
    pub chain_id: u64,
    pub expires_at: DateTime<Utc>,
}

/// On-chain settlement reported by the contract watcher
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "client", derive(Serialize, Deserialize))]
pub struct SettlementEvent {
    pub user: Address,
    pub amount: Decimal,
    pub nonce: u64,
    pub tx_hash: String,
}

impl SettlementEvent {
    /// Structural checks; malformed reports never reach the ledger
    pub fn validate(&self) -> CoreResult<()> {
        if self.amount <= Decimal::ZERO {
            return Err(RewardsCoreError::invalid_parameter("amount", "must be positive"));
        }
        if self.nonce == 0 {
            return Err(RewardsCoreError::invalid_parameter("nonce", "nonces start at 1"));
        }
        let hash = self.tx_hash.strip_prefix("0x").unwrap_or(&self.tx_hash);
        if hash.is_empty() || hex::decode(hash).is_err() {
            return Err(RewardsCoreError::invalid_parameter("tx_hash", "must be hex encoded"));
        }
        Ok(())
    }

    /// Lowercase `0x`-prefixed form used as the storage key
    pub fn normalized_tx_hash(&self) -> String {
        let hash = self.tx_hash.strip_prefix("0x").unwrap_or(&self.tx_hash);
        format!("0x{}", hash.to_ascii_lowercase())
    }
}

/// Persisted record of an applied settlement
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "client", derive(Serialize, Deserialize))]
pub struct SettlementRecord {
    pub tx_hash: String,
    pub user: Address,
    pub amount: Decimal,
    pub nonce: u64,
    pub settled_at: DateTime<Utc>,
}
