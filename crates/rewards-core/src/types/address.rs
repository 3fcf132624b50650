//! # Wallet Addresses
//!
//! 20-byte account identifiers, rendered as `0x`-prefixed lowercase hex.

use std::fmt;
use std::str::FromStr;

use crate::errors::{CoreResult, RewardsCoreError};

/// Length of an account identifier in bytes
pub const ADDRESS_LEN: usize = 20;

/// 20-byte wallet or contract address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// Build an address from raw bytes
    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_LEN]
    }

    /// Parse a hex address with or without `0x` prefix
    pub fn parse(s: &str) -> CoreResult<Self> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        let bytes = hex::decode(digits)
            .map_err(|e| RewardsCoreError::InvalidAddress(format!("{}: {}", s, e)))?;
        if bytes.len() != ADDRESS_LEN {
            return Err(RewardsCoreError::InvalidAddress(format!(
                "{}: expected {} bytes, got {}",
                s,
                ADDRESS_LEN,
                bytes.len()
            )));
        }

        let mut out = [0u8; ADDRESS_LEN];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = RewardsCoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Addresses travel as hex strings in JSON, TOML and the audit log
#[cfg(feature = "client")]
mod address_serde {
    use super::Address;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    impl Serialize for Address {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(&self.to_string())
        }
    }

    impl<'de> Deserialize<'de> for Address {
        fn deserialize<D>(deserializer: D) -> Result<Address, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            Address::parse(&s).map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip_display() {
        let raw = "0x00000000000000000000000000000000000000ff";
        let address: Address = raw.parse().unwrap();
        assert_eq!(address.0[19], 0xff);
        assert_eq!(address.to_string(), raw);
    }

    #[test]
    fn test_address_accepts_missing_prefix_and_uppercase() {
        let address = Address::parse("ABCDEF0000000000000000000000000000000001").unwrap();
        assert_eq!(address.0[0], 0xab);
    }

    #[test]
    fn test_address_rejects_bad_input() {
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("0xzz00000000000000000000000000000000000000").is_err());
        assert!(Address::parse("").is_err());
    }
}
