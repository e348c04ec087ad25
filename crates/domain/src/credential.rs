//! Held signing credential for the monitored account.

use std::fmt;

use k256::{ecdsa::SigningKey, elliptic_curve::sec1::ToEncodedPoint, PublicKey};
use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::address::LedgerAddress;

/// Length of one recoverable signature (`r || s || v`).
pub const SIGNATURE_LEN: usize = 65;

/// Offset added to the recovery id when serializing `v`.
const RECOVERY_OFFSET: u8 = 27;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("private key must be 32 bytes of hex: {0}")]
    InvalidHex(String),
    #[error("private key is not a valid secp256k1 scalar")]
    InvalidKey,
    #[error("transaction id must be a 32-byte hex digest")]
    InvalidDigest,
    #[error("signing failed: {0}")]
    Signing(String),
}

/// secp256k1 key used to produce the local half of the 2-of-2 signature.
#[derive(Clone)]
pub struct SigningCredential {
    key: SigningKey,
    address: LedgerAddress,
}

impl SigningCredential {
    pub fn from_hex(value: &str) -> Result<Self, CredentialError> {
        let bytes = hex::decode(value.trim().trim_start_matches("0x"))
            .map_err(|err| CredentialError::InvalidHex(err.to_string()))?;
        if bytes.len() != 32 {
            return Err(CredentialError::InvalidHex(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let key = SigningKey::from_slice(&bytes).map_err(|_| CredentialError::InvalidKey)?;
        let address = derive_address(&key);
        Ok(Self { key, address })
    }

    /// Address controlled by this credential.
    pub fn address(&self) -> &LedgerAddress {
        &self.address
    }

    /// Signs a transaction id (already a SHA-256 digest of the raw payload).
    pub fn sign_digest(&self, digest: &[u8]) -> Result<[u8; SIGNATURE_LEN], CredentialError> {
        if digest.len() != 32 {
            return Err(CredentialError::InvalidDigest);
        }
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(digest)
            .map_err(|err| CredentialError::Signing(err.to_string()))?;

        let mut out = [0u8; SIGNATURE_LEN];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte() + RECOVERY_OFFSET;
        Ok(out)
    }

    /// Hex-encoded variant of [`Self::sign_digest`] for a hex transaction id.
    pub fn sign_tx_id(&self, tx_id: &str) -> Result<String, CredentialError> {
        let digest = hex::decode(tx_id).map_err(|_| CredentialError::InvalidDigest)?;
        Ok(hex::encode(self.sign_digest(&digest)?))
    }
}

impl fmt::Debug for SigningCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredential")
            .field("address", &self.address)
            .field("key", &"<redacted>")
            .finish()
    }
}

fn derive_address(key: &SigningKey) -> LedgerAddress {
    let public = PublicKey::from(key.verifying_key());
    let uncompressed = public.to_encoded_point(false);
    // Skip the 0x04 SEC1 tag; hash x || y.
    let hash = Keccak256::digest(&uncompressed.as_bytes()[1..]);
    let mut account = [0u8; 20];
    account.copy_from_slice(&hash[12..]);
    LedgerAddress::from_account_hash(&account)
}
