//! Hand-written collaborators shared by the monitor's unit tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use forwarder_domain::config::{ForwardingConfig, SignerSettings};
use forwarder_domain::model::{
    AccountPermissions, BroadcastReceipt, FullySignedTx, PartiallySignedTx, PermissionKey,
    UnsignedTx,
};
use forwarder_domain::{
    ExternalSigner, LedgerAddress, LedgerClient, LedgerError, LedgerResult, SignerError,
    SignerOutcome, SigningCredential,
};
use serde_json::json;
use tokio::sync::Semaphore;

pub fn local_credential() -> SigningCredential {
    SigningCredential::from_hex(&format!("{}01", "00".repeat(31))).unwrap()
}

pub fn external_address() -> LedgerAddress {
    LedgerAddress::from_account_hash(&[2; 20])
}

pub fn destination_address() -> LedgerAddress {
    LedgerAddress::from_account_hash(&[9; 20])
}

/// 2-of-2 permission with the local key deliberately in second position.
pub fn two_of_two() -> AccountPermissions {
    AccountPermissions {
        threshold: 2,
        keys: vec![
            PermissionKey {
                address: external_address(),
                weight: 1,
            },
            PermissionKey {
                address: local_credential().address().clone(),
                weight: 1,
            },
        ],
    }
}

pub fn config(fee_reserve: u64, poll_interval: Duration) -> Arc<ForwardingConfig> {
    let credential = local_credential();
    let monitored = credential.address().clone();
    Arc::new(
        ForwardingConfig::new(
            credential,
            monitored,
            destination_address(),
            fee_reserve,
            poll_interval,
            "http://127.0.0.1:1",
        )
        .unwrap()
        .with_signer(SignerSettings {
            url: "http://127.0.0.1:2".to_string(),
            address: Some(external_address()),
            timeout: None,
        }),
    )
}

pub struct MockLedger {
    pub balance: AtomicU64,
    /// Balance to report once a broadcast is accepted.
    pub balance_after_broadcast: Mutex<Option<u64>>,
    pub permissions: Mutex<AccountPermissions>,
    pub fail_balance: AtomicBool,
    pub fail_permissions: AtomicBool,
    /// Fails the first balance query after the next accepted broadcast.
    pub fail_confirm_once: AtomicBool,
    balance_failures: AtomicUsize,
    /// When set, each permission query waits for one permit.
    pub permission_gate: Option<Arc<Semaphore>>,
    /// Number of upcoming broadcasts to reject.
    pub reject_broadcasts: AtomicUsize,
    pub balance_calls: AtomicUsize,
    pub permission_calls: AtomicUsize,
    pub built_amounts: Mutex<Vec<u64>>,
    pub key_indexes: Mutex<Vec<usize>>,
    pub broadcasts: AtomicUsize,
}

impl MockLedger {
    pub fn new(permissions: AccountPermissions) -> Self {
        Self {
            balance: AtomicU64::new(0),
            balance_after_broadcast: Mutex::new(None),
            permissions: Mutex::new(permissions),
            fail_balance: AtomicBool::new(false),
            fail_permissions: AtomicBool::new(false),
            fail_confirm_once: AtomicBool::new(false),
            balance_failures: AtomicUsize::new(0),
            permission_gate: None,
            reject_broadcasts: AtomicUsize::new(0),
            balance_calls: AtomicUsize::new(0),
            permission_calls: AtomicUsize::new(0),
            built_amounts: Mutex::new(Vec::new()),
            key_indexes: Mutex::new(Vec::new()),
            broadcasts: AtomicUsize::new(0),
        }
    }

    pub fn with_balance(self, balance: u64) -> Self {
        self.balance.store(balance, Ordering::SeqCst);
        self
    }

    pub fn with_permission_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.permission_gate = Some(gate);
        self
    }

    pub fn set_balance(&self, balance: u64) {
        self.balance.store(balance, Ordering::SeqCst);
    }

    pub fn builds(&self) -> usize {
        self.built_amounts.lock().unwrap().len()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn get_balance(&self, _address: &LedgerAddress) -> LedgerResult<u64> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        let armed = self
            .balance_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if armed || self.fail_balance.load(Ordering::SeqCst) {
            return Err(LedgerError::Transport("connection refused".to_string()));
        }
        Ok(self.balance.load(Ordering::SeqCst))
    }

    async fn get_account_permissions(
        &self,
        _address: &LedgerAddress,
    ) -> LedgerResult<AccountPermissions> {
        self.permission_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.permission_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if self.fail_permissions.load(Ordering::SeqCst) {
            return Err(LedgerError::Transport("connection refused".to_string()));
        }
        Ok(self.permissions.lock().unwrap().clone())
    }

    async fn build_transfer(
        &self,
        to: &LedgerAddress,
        amount: u64,
        _from: &LedgerAddress,
    ) -> LedgerResult<UnsignedTx> {
        let mut built = self.built_amounts.lock().unwrap();
        built.push(amount);
        Ok(UnsignedTx {
            id: format!("{:064x}", built.len()),
            payload: json!({ "raw_data": { "to": to.as_str(), "amount": amount } }),
        })
    }

    async fn apply_local_signature(
        &self,
        tx: UnsignedTx,
        _credential: &SigningCredential,
        key_index: usize,
    ) -> LedgerResult<PartiallySignedTx> {
        self.key_indexes.lock().unwrap().push(key_index);
        Ok(PartiallySignedTx {
            tx,
            signatures: vec!["11".repeat(65)],
            local_key_index: key_index,
        })
    }

    async fn broadcast(&self, tx: &FullySignedTx) -> LedgerResult<BroadcastReceipt> {
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
        let rejected = self
            .reject_broadcasts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if rejected {
            return Ok(BroadcastReceipt {
                accepted: false,
                tx_id: tx.tx.id.clone(),
                message: Some("SERVER_BUSY".to_string()),
            });
        }
        if let Some(after) = self.balance_after_broadcast.lock().unwrap().take() {
            self.balance.store(after, Ordering::SeqCst);
        }
        if self.fail_confirm_once.swap(false, Ordering::SeqCst) {
            self.balance_failures.store(1, Ordering::SeqCst);
        }
        Ok(BroadcastReceipt {
            accepted: true,
            tx_id: tx.tx.id.clone(),
            message: None,
        })
    }
}

#[derive(Default)]
pub struct MockSigner {
    pub calls: AtomicUsize,
    pub cancel: AtomicBool,
    /// Answers `Signed` without adding a second signature.
    pub drop_own_signature: AtomicBool,
    /// When set, each signing request waits for one permit.
    pub gate: Option<Arc<Semaphore>>,
}

impl MockSigner {
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ExternalSigner for MockSigner {
    async fn sign(&self, tx: PartiallySignedTx) -> Result<SignerOutcome, SignerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if self.cancel.load(Ordering::SeqCst) {
            return Ok(SignerOutcome::Cancelled);
        }
        let mut signatures = tx.signatures;
        if !self.drop_own_signature.load(Ordering::SeqCst) {
            signatures.push("22".repeat(65));
        }
        Ok(SignerOutcome::Signed(FullySignedTx {
            tx: tx.tx,
            signatures,
        }))
    }
}
