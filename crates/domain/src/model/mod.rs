//! Data structures shared across the monitor and API crates.

mod activity;
mod run;
mod tx;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::LedgerAddress;

pub use activity::*;
pub use run::*;
pub use tx::*;

/// Minimum threshold and key count for a usable 2-of-2 permission.
pub const REQUIRED_SIGNATURES: u32 = 2;

/// One balance reading, in SUN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceObservation {
    pub amount: u64,
    pub observed_at: DateTime<Utc>,
}

impl BalanceObservation {
    pub fn now(amount: u64) -> Self {
        Self {
            amount,
            observed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionKey {
    pub address: LedgerAddress,
    pub weight: u64,
}

/// Signing permission attached to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPermissions {
    pub threshold: u32,
    pub keys: Vec<PermissionKey>,
}

impl AccountPermissions {
    /// Position of `address` in the key list, if present.
    pub fn key_index(&self, address: &LedgerAddress) -> Option<usize> {
        self.keys.iter().position(|key| &key.address == address)
    }

    pub fn contains(&self, address: &LedgerAddress) -> bool {
        self.key_index(address).is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MultisigStatus {
    pub is_configured: bool,
    pub threshold: u32,
    pub key_count: usize,
    pub has_local_key: bool,
    pub has_external_key: bool,
}

impl MultisigStatus {
    /// Evaluates the 2-of-2 requirements against a permission snapshot. An
    /// unknown external signer never counts as present.
    pub fn evaluate(
        permissions: &AccountPermissions,
        local: &LedgerAddress,
        external: Option<&LedgerAddress>,
    ) -> Self {
        let threshold = permissions.threshold;
        let key_count = permissions.keys.len();
        let has_local_key = permissions.contains(local);
        let has_external_key = external
            .map(|address| address != local && permissions.contains(address))
            .unwrap_or(false);

        Self {
            is_configured: threshold >= REQUIRED_SIGNATURES
                && key_count >= REQUIRED_SIGNATURES as usize
                && has_local_key
                && has_external_key,
            threshold,
            key_count,
            has_local_key,
            has_external_key,
        }
    }
}
