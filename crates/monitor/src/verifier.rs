use std::sync::{Arc, RwLock};

use forwarder_domain::model::{LogLevel, MultisigStatus, NewLogEntry};
use forwarder_domain::{ActivityRecorder, LedgerAddress, LedgerClient, LedgerResult};
use tracing::debug;

/// Tracks whether the monitored account carries a usable 2-of-2 owner
/// permission. Verification never blocks polling; it only gates forwarding.
pub struct MultisigVerifier {
    ledger: Arc<dyn LedgerClient>,
    monitored: LedgerAddress,
    recorder: ActivityRecorder,
    external: RwLock<Option<LedgerAddress>>,
    status: RwLock<Option<MultisigStatus>>,
}

impl MultisigVerifier {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        monitored: LedgerAddress,
        external: Option<LedgerAddress>,
        recorder: ActivityRecorder,
    ) -> Self {
        Self {
            ledger,
            monitored,
            recorder,
            external: RwLock::new(external),
            status: RwLock::new(None),
        }
    }

    /// Queries the permission metadata and stores the evaluated status. A
    /// failed query leaves the previous status untouched.
    pub async fn verify(&self) -> LedgerResult<MultisigStatus> {
        let permissions = match self.ledger.get_account_permissions(&self.monitored).await {
            Ok(permissions) => permissions,
            Err(err) => {
                self.recorder.append(
                    NewLogEntry::new(LogLevel::Error, format!("multisig check failed: {err}"))
                        .with_detail("address", self.monitored.as_str()),
                );
                return Err(err);
            }
        };

        let external = self.external_address();
        let status = MultisigStatus::evaluate(&permissions, &self.monitored, external.as_ref());
        *self.status.write().expect("rwlock poisoned") = Some(status);

        let entry = if status.is_configured {
            NewLogEntry::new(
                LogLevel::Info,
                format!(
                    "multisig configured: threshold {} with {} keys",
                    status.threshold, status.key_count
                ),
            )
        } else {
            NewLogEntry::new(LogLevel::Warning, "multisig not configured; forwarding disabled")
                .with_detail("threshold", status.threshold)
                .with_detail("key_count", status.key_count as u64)
                .with_detail("has_local_key", status.has_local_key)
                .with_detail("has_external_key", status.has_external_key)
        };
        self.recorder.append(entry);
        Ok(status)
    }

    /// Records the co-signer's address and re-verifies when it changed or no
    /// status exists yet.
    pub async fn set_external_address(
        &self,
        address: LedgerAddress,
    ) -> LedgerResult<MultisigStatus> {
        let changed = {
            let mut guard = self.external.write().expect("rwlock poisoned");
            let changed = guard.as_ref() != Some(&address);
            *guard = Some(address);
            changed
        };
        match self.status() {
            Some(status) if !changed => {
                debug!("external signer address unchanged");
                Ok(status)
            }
            _ => self.verify().await,
        }
    }

    pub fn external_address(&self) -> Option<LedgerAddress> {
        self.external.read().expect("rwlock poisoned").clone()
    }

    /// Last evaluated status, `None` until a check has succeeded.
    pub fn status(&self) -> Option<MultisigStatus> {
        *self.status.read().expect("rwlock poisoned")
    }

    /// Whether forwarding may start. Runs a first check if none has
    /// succeeded yet.
    pub async fn ensure_configured(&self) -> bool {
        match self.status() {
            Some(status) => status.is_configured,
            None => self
                .verify()
                .await
                .map(|status| status.is_configured)
                .unwrap_or(false),
        }
    }
}
