use async_trait::async_trait;
use thiserror::Error;

use crate::address::LedgerAddress;
use crate::credential::SigningCredential;
use crate::model::{
    AccountPermissions, BroadcastReceipt, FullySignedTx, PartiallySignedTx, UnsignedTx,
};

/// Common result alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger transport error: {0}")]
    Transport(String),
    #[error("ledger rejected request: {0}")]
    Rejected(String),
    #[error("unexpected ledger response: {0}")]
    Decode(String),
    #[error("local signing failed: {0}")]
    Signing(String),
}

impl LedgerError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Spendable balance in SUN. Accounts unknown to the node report zero.
    async fn get_balance(&self, address: &LedgerAddress) -> LedgerResult<u64>;
    async fn get_account_permissions(
        &self,
        address: &LedgerAddress,
    ) -> LedgerResult<AccountPermissions>;
    async fn build_transfer(
        &self,
        to: &LedgerAddress,
        amount: u64,
        from: &LedgerAddress,
    ) -> LedgerResult<UnsignedTx>;
    async fn apply_local_signature(
        &self,
        tx: UnsignedTx,
        credential: &SigningCredential,
        key_index: usize,
    ) -> LedgerResult<PartiallySignedTx>;
    async fn broadcast(&self, tx: &FullySignedTx) -> LedgerResult<BroadcastReceipt>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("signer transport error: {0}")]
    Transport(String),
    #[error("signer returned malformed output: {0}")]
    Malformed(String),
}

/// What the co-signer did with a signing request.
#[derive(Debug, Clone, PartialEq)]
pub enum SignerOutcome {
    Signed(FullySignedTx),
    Cancelled,
}

/// The second party of the 2-of-2. A call may wait on human approval for an
/// unbounded time and is made at most once per attempt.
#[async_trait]
pub trait ExternalSigner: Send + Sync {
    async fn sign(&self, tx: PartiallySignedTx) -> Result<SignerOutcome, SignerError>;
}
