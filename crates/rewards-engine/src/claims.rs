//! Claim authorization service
//!
//! Issues signed, single-use claim authorizations against the ledger's
//! claimable balance, and manages the two-phase rotation of the calculator
//! signing key. Issuance never debits the ledger; the debit happens when the
//! contract reports settlement.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::{error, info, instrument, warn};

use rewards_core::math::to_base_units;
use rewards_core::{Address, CalculatorAuthorization, ClaimAuthorization, SettlementEvent};

use crate::clock::SharedClock;
use crate::config::ClaimsConfig;
use crate::error::{EngineError, EngineResult};
use crate::ledger::{SettlementOutcome, TreasuryLedger};
use crate::locks::KeyedLocks;
use crate::signer::{ClaimMessage, ClaimVerifyingKey, KeyRing};
use crate::store::{SharedStore, StoreBatch};

/// Contract binding and timing of authorizations
#[derive(Debug, Clone)]
pub struct ClaimSettings {
    pub chain_id: u64,
    pub contract_address: Address,
    pub token_decimals: u32,
    pub authorization_ttl: Duration,
    pub rotation_delay: Duration,
}

impl From<&ClaimsConfig> for ClaimSettings {
    fn from(config: &ClaimsConfig) -> Self {
        Self {
            chain_id: config.chain_id,
            contract_address: config.contract_address,
            token_decimals: config.token_decimals,
            authorization_ttl: Duration::seconds(config.authorization_ttl_secs),
            rotation_delay: Duration::seconds(config.key_rotation_delay_secs),
        }
    }
}

pub struct ClaimAuthorizationService {
    ledger: Arc<TreasuryLedger>,
    store: SharedStore,
    clock: SharedClock,
    keys: KeyRing,
    settings: ClaimSettings,
    authorization: RwLock<CalculatorAuthorization>,
    user_locks: KeyedLocks<Address>,
}

impl ClaimAuthorizationService {
    /// Load the persisted key authorization, trusting `initial_active_key_id` on first start
    pub fn open(
        ledger: Arc<TreasuryLedger>,
        store: SharedStore,
        clock: SharedClock,
        keys: KeyRing,
        settings: ClaimSettings,
        initial_active_key_id: &str,
    ) -> EngineResult<Self> {
        let authorization = match store.load_authorization()? {
            Some(existing) => existing,
            None => {
                let fresh = CalculatorAuthorization::new(initial_active_key_id, clock.now());
                store.commit(StoreBatch::new().with_authorization(fresh.clone()))?;
                info!(target: "security", key_id = %initial_active_key_id, "Initial signing key activated");
                fresh
            }
        };

        // The active key must be usable, or every claim would fail later
        keys.get(&authorization.active_signing_key_id)?;

        info!(
            active_key = %authorization.active_signing_key_id,
            pending_key = ?authorization.pending_signing_key_id,
            chain_id = settings.chain_id,
            contract = %settings.contract_address,
            "Claim authorization service ready"
        );

        Ok(Self {
            ledger,
            store,
            clock,
            keys,
            settings,
            authorization: RwLock::new(authorization),
            user_locks: KeyedLocks::new(),
        })
    }

    pub fn settings(&self) -> &ClaimSettings {
        &self.settings
    }

    pub fn authorization(&self) -> CalculatorAuthorization {
        self.authorization.read().clone()
    }

    /// Public key the contract should currently trust
    pub fn active_verifying_key(&self) -> EngineResult<ClaimVerifyingKey> {
        let key_id = self.authorization.read().active_signing_key_id.clone();
        Ok(self.keys.get(&key_id)?.verifying_key())
    }

    /// Issue a signed authorization for the user's claimable balance
    ///
    /// Requests for the same user are serialized. Until an authorization is
    /// settled, or its expiry plus the settlement grace has passed, further
    /// requests fail with `ClaimInFlight`.
    #[instrument(skip_all, fields(user = %user))]
    pub async fn issue_claim_authorization(&self, user: Address) -> EngineResult<ClaimAuthorization> {
        let _guard = self.user_locks.lock(&user).await;
        let now = self.clock.now();

        let key_id = self.authorization.read().active_signing_key_id.clone();
        let key = self.keys.get(&key_id)?;

        let pending = match self
            .ledger
            .reserve_authorization(&user, now, self.settings.authorization_ttl, &key_id)
        {
            Ok(pending) => pending,
            Err(e) if e.is_user_facing() => {
                info!(reason = %e, "Claim request rejected");
                return Err(e);
            }
            Err(e) => {
                error!(error = %e, "Claim reservation failed");
                return Err(e);
            }
        };

        let amount_base_units = match to_base_units(pending.amount, self.settings.token_decimals) {
            Ok(units) => units,
            Err(e) => {
                self.ledger.abandon_authorization(&user, pending.nonce)?;
                return Err(e.into());
            }
        };

        let message = ClaimMessage {
            chain_id: self.settings.chain_id,
            contract_address: &self.settings.contract_address,
            user: &user,
            amount_base_units,
            nonce: pending.nonce,
            expires_at: pending.expires_at,
            key_id: &key_id,
        };
        let signature = key.sign(&message);

        info!(
            nonce = pending.nonce,
            amount = %pending.amount,
            key_id = %key_id,
            expires_at = %pending.expires_at,
            "Issued claim authorization"
        );

        Ok(ClaimAuthorization {
            user,
            amount: pending.amount,
            amount_base_units,
            nonce: pending.nonce,
            signature: hex::encode(signature),
            key_id,
            contract_address: self.settings.contract_address,
            chain_id: self.settings.chain_id,
            expires_at: pending.expires_at,
        })
    }

    /// Apply a settlement reported by the contract watcher
    ///
    /// Failures are logged and leave the ledger unchanged.
    #[instrument(skip_all, fields(user = %event.user, nonce = event.nonce))]
    pub async fn on_claim_settled(&self, event: SettlementEvent) -> EngineResult<SettlementOutcome> {
        let _guard = self.user_locks.lock(&event.user).await;
        self.ledger.settle_claim(&event).map_err(|e| {
            if e.is_security_relevant() {
                error!(target: "security", error = %e, tx_hash = %event.tx_hash, "Settlement rejected");
            } else {
                warn!(error = %e, tx_hash = %event.tx_hash, "Settlement rejected");
            }
            e
        })
    }

    // ========================================================================
    // Key Rotation
    // ========================================================================

    /// Record `key_id` as pending; it can be activated after the rotation delay
    pub fn propose_signing_key_rotation(&self, key_id: &str) -> EngineResult<DateTime<Utc>> {
        if !self.keys.contains(key_id) {
            return Err(EngineError::UnknownSigningKey(key_id.to_string()));
        }

        let mut authorization = self.authorization.write();
        if authorization.active_signing_key_id == key_id {
            return Err(EngineError::InvalidInput(format!("{} is already the active key", key_id)));
        }

        let now = self.clock.now();
        let activation_time = now + self.settings.rotation_delay;

        let mut next = authorization.clone();
        if let Some(replaced) = next.pending_signing_key_id.replace(key_id.to_string()) {
            warn!(target: "security", replaced = %replaced, "Replacing pending key rotation");
        }
        next.pending_activation_time = Some(activation_time);

        self.store.commit(StoreBatch::new().with_authorization(next.clone()))?;
        *authorization = next;

        warn!(
            target: "security",
            key_id = %key_id,
            activation_time = %activation_time,
            "Signing key rotation proposed"
        );
        Ok(activation_time)
    }

    /// Make the pending key active once its delay has passed
    pub fn activate_pending_key(&self) -> EngineResult<CalculatorAuthorization> {
        let mut authorization = self.authorization.write();
        let (Some(pending), Some(activation_time)) = (
            authorization.pending_signing_key_id.clone(),
            authorization.pending_activation_time,
        ) else {
            return Err(EngineError::NoPendingRotation);
        };

        let now = self.clock.now();
        if now < activation_time {
            warn!(
                target: "security",
                key_id = %pending,
                %activation_time,
                "Key activation attempted before delay elapsed"
            );
            return Err(EngineError::KeyRotationTooEarly { activation_time });
        }
        self.keys.get(&pending)?;

        let previous = authorization.active_signing_key_id.clone();
        let next = CalculatorAuthorization {
            active_signing_key_id: pending.clone(),
            pending_signing_key_id: None,
            pending_activation_time: None,
            activated_at: now,
        };

        self.store.commit(StoreBatch::new().with_authorization(next.clone()))?;
        *authorization = next.clone();

        warn!(target: "security", previous = %previous, active = %pending, "Signing key rotated");
        Ok(next)
    }

    /// Revoke a proposed rotation before it activates
    pub fn cancel_pending_rotation(&self) -> EngineResult<String> {
        let mut authorization = self.authorization.write();
        let Some(pending) = authorization.pending_signing_key_id.clone() else {
            return Err(EngineError::NoPendingRotation);
        };

        let mut next = authorization.clone();
        next.pending_signing_key_id = None;
        next.pending_activation_time = None;

        self.store.commit(StoreBatch::new().with_authorization(next.clone()))?;
        *authorization = next;

        warn!(target: "security", key_id = %pending, "Pending key rotation cancelled");
        Ok(pending)
    }
}
