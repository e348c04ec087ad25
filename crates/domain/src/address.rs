use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version byte prefixed to every mainnet account payload.
pub const ADDRESS_PREFIX: u8 = 0x41;
/// Prefix byte plus the 20-byte account hash.
pub const ADDRESS_PAYLOAD_LEN: usize = 21;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("address is not valid base58check: {0}")]
    Encoding(String),
    #[error("address payload must be {ADDRESS_PAYLOAD_LEN} bytes, got {0}")]
    WrongLength(usize),
    #[error("address version byte must be 0x41, got {0:#04x}")]
    WrongPrefix(u8),
}

/// A validated base58check ledger account address (`T...`).
///
/// The textual form is canonical: two addresses are equal iff their payloads
/// are equal, so comparisons against permission key lists are plain `==`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LedgerAddress(String);

impl LedgerAddress {
    pub fn parse(value: &str) -> Result<Self, AddressError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }
        let payload = bs58::decode(trimmed)
            .with_check(None)
            .into_vec()
            .map_err(|err| AddressError::Encoding(err.to_string()))?;
        Self::validate_payload(&payload)?;
        Ok(Self(trimmed.to_string()))
    }

    /// Builds the address for a raw 20-byte account hash.
    pub fn from_account_hash(hash: &[u8; 20]) -> Self {
        let mut payload = Vec::with_capacity(ADDRESS_PAYLOAD_LEN);
        payload.push(ADDRESS_PREFIX);
        payload.extend_from_slice(hash);
        Self(bs58::encode(payload).with_check().into_string())
    }

    /// Accepts the hex payload form (`41...`) returned by some node endpoints.
    pub fn from_hex(value: &str) -> Result<Self, AddressError> {
        let payload = hex::decode(value.trim().trim_start_matches("0x"))
            .map_err(|err| AddressError::Encoding(err.to_string()))?;
        Self::validate_payload(&payload)?;
        Ok(Self(bs58::encode(payload).with_check().into_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    fn validate_payload(payload: &[u8]) -> Result<(), AddressError> {
        if payload.len() != ADDRESS_PAYLOAD_LEN {
            return Err(AddressError::WrongLength(payload.len()));
        }
        if payload[0] != ADDRESS_PREFIX {
            return Err(AddressError::WrongPrefix(payload[0]));
        }
        Ok(())
    }
}

impl fmt::Display for LedgerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LedgerAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for LedgerAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LedgerAddress> for String {
    fn from(value: LedgerAddress) -> Self {
        value.0
    }
}
