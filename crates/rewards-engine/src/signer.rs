//! Calculator signing keys and the claim message format.
//!
//! A claim signature is ed25519 over `SHA-256(message)` where message is:
//!
//! ```text
//! "LM_CLAIM_V1" || chain_id (u64 BE) || contract (20 bytes) || user (20 bytes)
//!   || amount_base_units (u128 BE) || nonce (u64 BE) || expires_at (i64 BE, unix seconds)
//!   || key_id_len (u32 BE) || key_id
//! ```
//!
//! Private seeds are zeroized after loading and never logged.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use zeroize::Zeroize;

use rewards_core::{Address, ClaimAuthorization, CLAIM_DOMAIN_V1};

use crate::config::SigningConfig;
use crate::error::{EngineError, EngineResult};

pub type SignatureBytes = [u8; 64];
pub type PublicKeyBytes = [u8; 32];
pub type ClaimDigest = [u8; 32];

/// Fields bound into a claim signature
#[derive(Debug, Clone, Copy)]
pub struct ClaimMessage<'a> {
    pub chain_id: u64,
    pub contract_address: &'a Address,
    pub user: &'a Address,
    pub amount_base_units: u128,
    pub nonce: u64,
    pub expires_at: DateTime<Utc>,
    pub key_id: &'a str,
}

impl<'a> ClaimMessage<'a> {
    pub fn from_authorization(auth: &'a ClaimAuthorization) -> Self {
        Self {
            chain_id: auth.chain_id,
            contract_address: &auth.contract_address,
            user: &auth.user,
            amount_base_units: auth.amount_base_units,
            nonce: auth.nonce,
            expires_at: auth.expires_at,
            key_id: &auth.key_id,
        }
    }

    /// Canonical byte encoding
    pub fn encode(&self) -> Vec<u8> {
        let key_id = self.key_id.as_bytes();
        let mut buf = Vec::with_capacity(CLAIM_DOMAIN_V1.len() + 8 + 20 + 20 + 16 + 8 + 8 + 4 + key_id.len());
        buf.extend_from_slice(CLAIM_DOMAIN_V1);
        buf.extend_from_slice(&self.chain_id.to_be_bytes());
        buf.extend_from_slice(self.contract_address.as_bytes());
        buf.extend_from_slice(self.user.as_bytes());
        buf.extend_from_slice(&self.amount_base_units.to_be_bytes());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf.extend_from_slice(&self.expires_at.timestamp().to_be_bytes());
        buf.extend_from_slice(&(key_id.len() as u32).to_be_bytes());
        buf.extend_from_slice(key_id);
        buf
    }

    pub fn digest(&self) -> ClaimDigest {
        Sha256::digest(self.encode()).into()
    }
}

/// One calculator key
#[derive(Clone)]
pub struct ClaimSigningKey {
    signing_key: SigningKey,
}

impl ClaimSigningKey {
    /// Random key for tests and local setups
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Load from a hex-encoded 32-byte seed
    pub fn from_hex(hex_seed: &str) -> EngineResult<Self> {
        let mut bytes = hex::decode(hex_seed.trim().trim_start_matches("0x"))
            .map_err(|e| EngineError::Crypto(format!("Invalid hex seed: {}", e)))?;

        if bytes.len() != 32 {
            bytes.zeroize();
            return Err(EngineError::Crypto("Seed must be exactly 32 bytes".into()));
        }

        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes);
        bytes.zeroize();

        let key = Self::from_seed(&seed);
        seed.zeroize();
        Ok(key)
    }

    /// Load from a file containing the hex seed
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let mut content = fs::read_to_string(path)
            .map_err(|e| EngineError::Crypto(format!("Failed to read seed file {}: {}", path.display(), e)))?;
        let key = Self::from_hex(&content);
        content.zeroize();
        key
    }

    /// Write a fresh random seed to `path`, refusing to overwrite
    pub fn generate_seed_file(path: &Path) -> EngineResult<Self> {
        if path.exists() {
            return Err(EngineError::Crypto(format!("Seed file {} already exists", path.display())));
        }
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let mut encoded = hex::encode(seed);

        let written = write_private(path, encoded.as_bytes());
        encoded.zeroize();
        let key = Self::from_seed(&seed);
        seed.zeroize();
        written?;
        Ok(key)
    }

    pub fn verifying_key(&self) -> ClaimVerifyingKey {
        ClaimVerifyingKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    pub fn sign(&self, message: &ClaimMessage<'_>) -> SignatureBytes {
        self.signing_key.sign(&message.digest()).to_bytes()
    }
}

impl std::fmt::Debug for ClaimSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimSigningKey")
            .field("public_key", &hex::encode(self.verifying_key().to_bytes()))
            .finish()
    }
}

/// Public half of a calculator key, as registered with the contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimVerifyingKey {
    verifying_key: VerifyingKey,
}

impl ClaimVerifyingKey {
    pub fn from_bytes(bytes: &PublicKeyBytes) -> EngineResult<Self> {
        let verifying_key =
            VerifyingKey::from_bytes(bytes).map_err(|e| EngineError::Crypto(format!("Invalid public key: {}", e)))?;
        Ok(Self { verifying_key })
    }

    pub fn to_bytes(&self) -> PublicKeyBytes {
        self.verifying_key.to_bytes()
    }

    pub fn verify(&self, message: &ClaimMessage<'_>, signature: &SignatureBytes) -> EngineResult<()> {
        let signature = Signature::from_bytes(signature);
        self.verifying_key
            .verify(&message.digest(), &signature)
            .map_err(|_| EngineError::Crypto("Signature verification failed".into()))
    }
}

/// Check an authorization the way the claim contract does
pub fn verify_claim_authorization(
    auth: &ClaimAuthorization,
    key: &ClaimVerifyingKey,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    if now >= auth.expires_at {
        return Err(EngineError::Crypto(format!("Authorization expired at {}", auth.expires_at)));
    }
    let raw = hex::decode(&auth.signature).map_err(|e| EngineError::Crypto(format!("Invalid signature hex: {}", e)))?;
    let signature: SignatureBytes = raw
        .as_slice()
        .try_into()
        .map_err(|_| EngineError::Crypto("Signature must be exactly 64 bytes".into()))?;
    key.verify(&ClaimMessage::from_authorization(auth), &signature)
}

/// Signing keys available to this process, by key id
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    keys: BTreeMap<String, ClaimSigningKey>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every configured key; relative seed paths resolve against `base_dir`
    pub fn load(config: &SigningConfig, base_dir: &Path) -> EngineResult<Self> {
        let mut ring = Self::new();
        for key in &config.keys {
            let path = if key.seed_file.is_absolute() {
                key.seed_file.clone()
            } else {
                base_dir.join(&key.seed_file)
            };
            let signing_key = ClaimSigningKey::from_file(&path)?;
            info!(
                key_id = %key.id,
                public_key = %hex::encode(signing_key.verifying_key().to_bytes()),
                "Loaded signing key"
            );
            ring.insert(key.id.clone(), signing_key);
        }
        Ok(ring)
    }

    pub fn insert(&mut self, key_id: impl Into<String>, key: ClaimSigningKey) {
        let key_id = key_id.into();
        debug!(key_id = %key_id, "Key added to ring");
        self.keys.insert(key_id, key);
    }

    pub fn get(&self, key_id: &str) -> EngineResult<&ClaimSigningKey> {
        self.keys
            .get(key_id)
            .ok_or_else(|| EngineError::UnknownSigningKey(key_id.to_string()))
    }

    pub fn contains(&self, key_id: &str) -> bool {
        self.keys.contains_key(key_id)
    }

    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn write_private(path: &Path, contents: &[u8]) -> EngineResult<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}
