//! Forwarding state machine: one detected deposit is driven through
//! create, both signatures, validation, broadcast and confirmation, with a
//! bounded number of attempts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use forwarder_domain::config::ForwardingConfig;
use forwarder_domain::model::{
    ForwardingRun, LogLevel, NewLogEntry, RunStatus, RunTransitionError, SignatureFormatError,
    StepKind, REQUIRED_SIGNATURES,
};
use forwarder_domain::{
    ActivityRecorder, ExternalSigner, LedgerClient, LedgerError, SignerError, SignerOutcome,
};
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::verifier::MultisigVerifier;

/// Attempt bounds and the waits between and inside attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Wait after broadcast before the balance is re-read.
    pub settlement_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            settlement_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            retry_delay: Duration::ZERO,
            settlement_delay: Duration::ZERO,
        }
    }
}

/// Why a single attempt stopped; the run retries from `create`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttemptError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("local key is not listed in the owner permission")]
    LocalKeyMissing,
    #[error("external signer cancelled the request")]
    Cancelled,
    #[error(transparent)]
    Signer(#[from] SignerError),
    #[error(transparent)]
    SignatureFormat(#[from] SignatureFormatError),
    #[error("only {found} of {required} required signatures present")]
    Threshold { found: usize, required: usize },
    #[error("broadcast rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("forwarding refused: multisig is not configured")]
    NotConfigured,
    #[error("step {step} failed: {source}")]
    Attempt {
        step: StepKind,
        #[source]
        source: AttemptError,
    },
    #[error("invalid run transition: {0}")]
    Transition(#[from] RunTransitionError),
}

enum AttemptOutcome {
    Forwarded,
    Skipped { balance: u64 },
}

/// `min(detected, balance - reserve)`, floored at zero.
pub fn forward_amount(detected: u64, balance: u64, fee_reserve: u64) -> u64 {
    detected.min(balance.saturating_sub(fee_reserve))
}

pub struct ForwardingPipeline {
    config: Arc<ForwardingConfig>,
    ledger: Arc<dyn LedgerClient>,
    signer: Arc<dyn ExternalSigner>,
    verifier: Arc<MultisigVerifier>,
    recorder: ActivityRecorder,
    policy: RetryPolicy,
    next_run_id: AtomicU64,
    current: watch::Sender<Option<ForwardingRun>>,
}

impl ForwardingPipeline {
    pub fn new(
        config: Arc<ForwardingConfig>,
        ledger: Arc<dyn LedgerClient>,
        signer: Arc<dyn ExternalSigner>,
        verifier: Arc<MultisigVerifier>,
        recorder: ActivityRecorder,
        policy: RetryPolicy,
    ) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            config,
            ledger,
            signer,
            verifier,
            recorder,
            policy,
            next_run_id: AtomicU64::new(1),
            current,
        }
    }

    /// Snapshot of the active run, or the last one to finish.
    pub fn current_run(&self) -> Option<ForwardingRun> {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ForwardingRun>> {
        self.current.subscribe()
    }

    /// Drives one deposit to a terminal state. Attempt failures are retried
    /// and reported through the returned run; `Err` means the run never
    /// started or its state machine was misused.
    pub async fn run(&self, detected: u64) -> Result<ForwardingRun, PipelineError> {
        if !self.verifier.ensure_configured().await {
            counter!("forwarder_runs_total", "outcome" => "refused").increment(1);
            self.recorder.append(
                NewLogEntry::new(
                    LogLevel::Error,
                    "forwarding refused: multisig is not configured",
                )
                .with_detail("amount", detected),
            );
            return Err(PipelineError::NotConfigured);
        }

        let id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        let mut run = ForwardingRun::new(id, detected);
        run.begin(StepKind::Detect)?;
        run.complete(StepKind::Detect, Some(format!("{detected} SUN")))?;
        self.publish(&run);
        info!(run = id, detected, "forwarding run started");

        let max_attempts = self.policy.max_attempts.max(1);
        let mut accepted = None;
        loop {
            let attempt = run.start_attempt()?;
            self.publish(&run);
            match self.attempt(&mut run, detected, &mut accepted).await {
                Ok(AttemptOutcome::Forwarded) => {
                    run.finish(RunStatus::Completed)?;
                    self.report_success(&run);
                    break;
                }
                Ok(AttemptOutcome::Skipped { balance }) => {
                    run.finish(RunStatus::Skipped)?;
                    counter!("forwarder_attempts_total", "result" => "skipped").increment(1);
                    self.recorder.append(
                        NewLogEntry::new(
                            LogLevel::Warning,
                            "balance does not cover the fee reserve; nothing forwarded",
                        )
                        .with_detail("run", id)
                        .with_detail("balance", balance)
                        .with_detail("fee_reserve", self.config.fee_reserve()),
                    );
                    break;
                }
                Err(PipelineError::Attempt { step, source }) => {
                    counter!("forwarder_attempts_total", "result" => "failed").increment(1);
                    self.recorder.append(
                        NewLogEntry::new(
                            LogLevel::Error,
                            format!("attempt {attempt}/{max_attempts} failed at {step}: {source}"),
                        )
                        .with_detail("run", id)
                        .with_detail("attempt", attempt)
                        .with_detail("step", step.as_ref()),
                    );
                    if attempt >= max_attempts {
                        run.finish(RunStatus::Error)?;
                        self.recorder.append(
                            NewLogEntry::new(
                                LogLevel::Error,
                                format!("run {id} failed after {attempt} attempts"),
                            )
                            .with_detail("amount", detected),
                        );
                        break;
                    }
                    sleep(self.policy.retry_delay).await;
                }
                Err(other) => return Err(other),
            }
        }

        self.publish(&run);
        counter!("forwarder_runs_total", "outcome" => run.status.as_ref().to_owned()).increment(1);
        Ok(run)
    }

    async fn attempt(
        &self,
        run: &mut ForwardingRun,
        detected: u64,
        accepted: &mut Option<String>,
    ) -> Result<AttemptOutcome, PipelineError> {
        let monitored = self.config.monitored_address();

        self.enter(run, StepKind::Create)?;
        let before = self.check(
            run,
            StepKind::Create,
            self.ledger.get_balance(monitored).await.map_err(AttemptError::from),
        )?;
        let amount = forward_amount(detected, before, self.config.fee_reserve());
        if amount == 0 {
            run.complete(StepKind::Create, Some("insufficient balance".to_string()))?;
            return Ok(AttemptOutcome::Skipped { balance: before });
        }
        run.forward_amount = Some(amount);
        let unsigned = self.check(
            run,
            StepKind::Create,
            self.ledger
                .build_transfer(self.config.destination_address(), amount, monitored)
                .await
                .map_err(AttemptError::from),
        )?;
        run.tx_id = Some(unsigned.id.clone());
        self.advance(run, StepKind::Create, format!("{amount} SUN in {}", unsigned.id))?;

        self.enter(run, StepKind::SignLocal)?;
        let permissions = self.check(
            run,
            StepKind::SignLocal,
            self.ledger
                .get_account_permissions(monitored)
                .await
                .map_err(AttemptError::from),
        )?;
        let key_index = self.check(
            run,
            StepKind::SignLocal,
            permissions
                .key_index(monitored)
                .ok_or(AttemptError::LocalKeyMissing),
        )?;
        let partial = self.check(
            run,
            StepKind::SignLocal,
            self.ledger
                .apply_local_signature(unsigned, self.config.credential(), key_index)
                .await
                .map_err(AttemptError::from),
        )?;
        self.recorder.append(
            NewLogEntry::new(LogLevel::Signature, "local signature applied")
                .with_detail("tx_id", partial.tx.id.as_str())
                .with_detail("key_index", key_index),
        );
        self.advance(run, StepKind::SignLocal, format!("key index {key_index}"))?;

        self.enter(run, StepKind::SignExternal)?;
        self.recorder.record(LogLevel::Info, "waiting for external signer");
        let started = Instant::now();
        let outcome = self.signer.sign(partial).await;
        histogram!("forwarder_signer_wait_seconds").record(started.elapsed().as_secs_f64());
        let signed = self.check(
            run,
            StepKind::SignExternal,
            match outcome {
                Ok(SignerOutcome::Signed(tx)) => Ok(tx),
                Ok(SignerOutcome::Cancelled) => Err(AttemptError::Cancelled),
                Err(err) => Err(err.into()),
            },
        )?;
        self.recorder.append(
            NewLogEntry::new(LogLevel::Signature, "external signature received")
                .with_detail("tx_id", signed.tx.id.as_str()),
        );
        self.advance(run, StepKind::SignExternal, "signed")?;

        self.enter(run, StepKind::Validate)?;
        let found = self.check(
            run,
            StepKind::Validate,
            signed.signature_count().map_err(AttemptError::from),
        )?;
        let required = REQUIRED_SIGNATURES as usize;
        if found < required {
            return self.check(
                run,
                StepKind::Validate,
                Err(AttemptError::Threshold { found, required }),
            );
        }
        self.advance(run, StepKind::Validate, format!("{found} signatures"))?;

        self.enter(run, StepKind::Broadcast)?;
        if let Some(previous) = accepted.as_deref() {
            warn!(run = run.id, previous, "broadcasting a second transfer in one run");
            self.recorder.append(
                NewLogEntry::new(
                    LogLevel::Warning,
                    format!(
                        "transfer {previous} was already accepted in this run; broadcasting again"
                    ),
                )
                .with_detail("run", run.id)
                .with_detail("attempt", run.attempt)
                .with_detail("tx_id", signed.tx.id.as_str()),
            );
        }
        let receipt = self.check(
            run,
            StepKind::Broadcast,
            self.ledger.broadcast(&signed).await.map_err(AttemptError::from),
        )?;
        if !receipt.accepted {
            let reason = receipt
                .message
                .unwrap_or_else(|| "no reason given".to_string());
            return self.check(run, StepKind::Broadcast, Err(AttemptError::Rejected(reason)));
        }
        self.recorder.append(
            NewLogEntry::new(LogLevel::Broadcast, "transaction broadcast")
                .with_detail("tx_id", receipt.tx_id.as_str())
                .with_detail("amount", amount),
        );
        run.tx_id = Some(receipt.tx_id.clone());
        *accepted = Some(receipt.tx_id.clone());
        self.advance(run, StepKind::Broadcast, receipt.tx_id)?;

        // A failed re-read still retries from `create`, even though the
        // ledger already holds this transfer.
        self.enter(run, StepKind::Confirm)?;
        sleep(self.policy.settlement_delay).await;
        let after = self.check(
            run,
            StepKind::Confirm,
            self.ledger.get_balance(monitored).await.map_err(AttemptError::from),
        )?;
        let expected = before.saturating_sub(amount);
        if after > expected {
            run.network_fee = None;
            self.recorder.append(
                NewLogEntry::new(
                    LogLevel::Warning,
                    format!("debit of {amount} SUN not observed after broadcast"),
                )
                .with_detail("run", run.id)
                .with_detail("before", before)
                .with_detail("after", after),
            );
            self.advance(run, StepKind::Confirm, "debit not observed")?;
        } else {
            let fee = expected - after;
            run.network_fee = Some(fee);
            self.recorder.append(
                NewLogEntry::new(LogLevel::Balance, format!("balance after forward: {after} SUN"))
                    .with_detail("network_fee", fee),
            );
            self.advance(run, StepKind::Confirm, format!("fee {fee} SUN"))?;
        }

        Ok(AttemptOutcome::Forwarded)
    }

    fn enter(&self, run: &mut ForwardingRun, step: StepKind) -> Result<(), PipelineError> {
        run.begin(step)?;
        debug!(run = run.id, attempt = run.attempt, %step, "step started");
        self.publish(run);
        Ok(())
    }

    fn advance(
        &self,
        run: &mut ForwardingRun,
        step: StepKind,
        detail: impl Into<String>,
    ) -> Result<(), PipelineError> {
        run.complete(step, Some(detail.into()))?;
        self.publish(run);
        Ok(())
    }

    /// Marks `step` failed when `result` is an error.
    fn check<T>(
        &self,
        run: &mut ForwardingRun,
        step: StepKind,
        result: Result<T, AttemptError>,
    ) -> Result<T, PipelineError> {
        match result {
            Ok(value) => Ok(value),
            Err(source) => {
                run.fail(step, source.to_string())?;
                self.publish(run);
                Err(PipelineError::Attempt { step, source })
            }
        }
    }

    fn report_success(&self, run: &ForwardingRun) {
        let amount = run.forward_amount.unwrap_or_default();
        counter!("forwarder_attempts_total", "result" => "forwarded").increment(1);
        counter!("forwarder_forwarded_sun_total").increment(amount);
        let mut entry = NewLogEntry::new(
            LogLevel::Success,
            format!(
                "forwarded {amount} SUN to {}",
                self.config.destination_address()
            ),
        )
        .with_detail("run", run.id)
        .with_detail("attempt", run.attempt);
        if let Some(tx_id) = &run.tx_id {
            entry = entry.with_detail("tx_id", tx_id.as_str());
        }
        if let Some(fee) = run.network_fee {
            entry = entry.with_detail("network_fee", fee);
        }
        self.recorder.append(entry);
    }

    fn publish(&self, run: &ForwardingRun) {
        self.current.send_replace(Some(run.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{config, external_address, two_of_two, MockLedger, MockSigner};
    use forwarder_domain::model::{AccountPermissions, LogEntry, PermissionKey, StepStatus};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    struct Harness {
        ledger: Arc<MockLedger>,
        signer: Arc<MockSigner>,
        recorder: ActivityRecorder,
        pipeline: ForwardingPipeline,
    }

    async fn harness(ledger: MockLedger, signer: MockSigner) -> Harness {
        let ledger = Arc::new(ledger);
        let signer = Arc::new(signer);
        let recorder = ActivityRecorder::new();
        let config = config(5, Duration::from_secs(1));
        let verifier = Arc::new(MultisigVerifier::new(
            ledger.clone(),
            config.monitored_address().clone(),
            Some(external_address()),
            recorder.clone(),
        ));
        verifier.verify().await.unwrap();
        let pipeline = ForwardingPipeline::new(
            config,
            ledger.clone(),
            signer.clone(),
            verifier,
            recorder.clone(),
            RetryPolicy::immediate(3),
        );
        Harness {
            ledger,
            signer,
            recorder,
            pipeline,
        }
    }

    fn entries_starting_with<'a>(entries: &'a [LogEntry], prefix: &str) -> Vec<&'a LogEntry> {
        entries
            .iter()
            .filter(|entry| entry.message.starts_with(prefix))
            .collect()
    }

    #[test]
    fn forward_amount_is_capped_by_reserve() {
        assert_eq!(forward_amount(50, 150, 5), 50);
        assert_eq!(forward_amount(50, 30, 5), 25);
        assert_eq!(forward_amount(50, 5, 5), 0);
        assert_eq!(forward_amount(50, 3, 5), 0);
    }

    #[tokio::test]
    async fn forwards_detected_deposit() {
        let ledger = MockLedger::new(two_of_two()).with_balance(150);
        *ledger.balance_after_broadcast.lock().unwrap() = Some(99);
        let h = harness(ledger, MockSigner::default()).await;

        let run = h.pipeline.run(50).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.forward_amount, Some(50));
        assert_eq!(run.network_fee, Some(1));
        assert_eq!(run.attempt, 1);
        assert!(run.steps().iter().all(|s| s.status == StepStatus::Completed));
        assert_eq!(*h.ledger.built_amounts.lock().unwrap(), vec![50]);
        assert_eq!(h.pipeline.current_run(), Some(run));
    }

    #[tokio::test]
    async fn signs_with_the_local_key_position() {
        let h = harness(MockLedger::new(two_of_two()).with_balance(150), MockSigner::default()).await;

        h.pipeline.run(50).await.unwrap();

        assert_eq!(*h.ledger.key_indexes.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn retries_rejected_broadcasts() {
        let ledger = MockLedger::new(two_of_two()).with_balance(150);
        ledger.reject_broadcasts.store(2, Ordering::SeqCst);
        let h = harness(ledger, MockSigner::default()).await;

        let run = h.pipeline.run(50).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.attempt, 3);
        assert_eq!(h.ledger.broadcasts.load(Ordering::SeqCst), 3);
        let entries = h.recorder.list();
        assert_eq!(entries_starting_with(&entries, "attempt ").len(), 2);
        let successes: Vec<_> = entries
            .iter()
            .filter(|entry| entry.level == LogLevel::Success)
            .collect();
        assert_eq!(successes.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_signing_never_broadcasts() {
        let signer = MockSigner::default();
        signer.cancel.store(true, Ordering::SeqCst);
        let h = harness(MockLedger::new(two_of_two()).with_balance(150), signer).await;

        let run = h.pipeline.run(50).await.unwrap();

        assert_eq!(run.status, RunStatus::Error);
        assert_eq!(run.attempt, 3);
        assert_eq!(h.signer.calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.ledger.broadcasts.load(Ordering::SeqCst), 0);
        assert_eq!(run.step(StepKind::SignExternal).status, StepStatus::Error);
        assert_eq!(run.step(StepKind::Broadcast).status, StepStatus::Pending);
        let entries = h.recorder.list();
        assert_eq!(entries[0].message, "run 1 failed after 3 attempts");
    }

    #[tokio::test]
    async fn unobserved_debit_is_reported_without_a_fee() {
        let h = harness(MockLedger::new(two_of_two()).with_balance(150), MockSigner::default()).await;

        let run = h.pipeline.run(50).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.network_fee, None);
        assert_eq!(h.ledger.broadcasts.load(Ordering::SeqCst), 1);
        let confirm = run.step(StepKind::Confirm);
        assert_eq!(confirm.status, StepStatus::Completed);
        assert_eq!(confirm.detail.as_deref(), Some("debit not observed"));
        let entries = h.recorder.list();
        let warnings = entries_starting_with(&entries, "debit of 50 SUN not observed");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, LogLevel::Warning);
        let detail = warnings[0].detail.as_ref().unwrap();
        assert_eq!(detail["before"], json!(150));
        assert_eq!(detail["after"], json!(150));
    }

    #[tokio::test]
    async fn missing_external_signature_fails_validation() {
        let signer = MockSigner::default();
        signer.drop_own_signature.store(true, Ordering::SeqCst);
        let h = harness(MockLedger::new(two_of_two()).with_balance(150), signer).await;

        let run = h.pipeline.run(50).await.unwrap();

        assert_eq!(run.status, RunStatus::Error);
        assert_eq!(run.attempt, 3);
        assert_eq!(run.step(StepKind::Validate).status, StepStatus::Error);
        assert_eq!(run.step(StepKind::Broadcast).status, StepStatus::Pending);
        assert_eq!(h.ledger.broadcasts.load(Ordering::SeqCst), 0);
        let entries = h.recorder.list();
        for attempt in 1..=3 {
            let prefix = format!("attempt {attempt}/3 failed at validate");
            assert_eq!(entries_starting_with(&entries, &prefix).len(), 1, "{prefix}");
        }
    }

    #[tokio::test]
    async fn second_broadcast_in_a_run_is_flagged() {
        let ledger = MockLedger::new(two_of_two()).with_balance(150);
        ledger.fail_confirm_once.store(true, Ordering::SeqCst);
        let h = harness(ledger, MockSigner::default()).await;

        let run = h.pipeline.run(50).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.attempt, 2);
        assert_eq!(h.ledger.broadcasts.load(Ordering::SeqCst), 2);
        let entries = h.recorder.list();
        assert_eq!(entries_starting_with(&entries, "attempt 1/3 failed at confirm").len(), 1);
        let flagged = entries_starting_with(&entries, "transfer ");
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].level, LogLevel::Warning);
    }

    #[tokio::test]
    async fn insufficient_balance_skips_without_building() {
        let h = harness(MockLedger::new(two_of_two()).with_balance(5), MockSigner::default()).await;

        let run = h.pipeline.run(50).await.unwrap();

        assert_eq!(run.status, RunStatus::Skipped);
        assert_eq!(h.ledger.builds(), 0);
        assert_eq!(h.signer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.recorder.list()[0].level, LogLevel::Warning);
    }

    #[tokio::test]
    async fn missing_local_key_fails_each_attempt() {
        let perms = AccountPermissions {
            threshold: 2,
            keys: vec![
                PermissionKey {
                    address: external_address(),
                    weight: 1,
                },
                PermissionKey {
                    address: forwarder_domain::LedgerAddress::from_account_hash(&[7; 20]),
                    weight: 1,
                },
            ],
        };
        let h = harness(MockLedger::new(two_of_two()).with_balance(150), MockSigner::default()).await;
        *h.ledger.permissions.lock().unwrap() = perms;

        let run = h.pipeline.run(50).await.unwrap();

        assert_eq!(run.status, RunStatus::Error);
        assert_eq!(run.step(StepKind::SignLocal).status, StepStatus::Error);
        assert_eq!(h.signer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refuses_when_multisig_is_not_configured() {
        let ledger = Arc::new(MockLedger::new(AccountPermissions {
            threshold: 1,
            keys: two_of_two().keys,
        }));
        let recorder = ActivityRecorder::new();
        let config = config(5, Duration::from_secs(1));
        let verifier = Arc::new(MultisigVerifier::new(
            ledger.clone(),
            config.monitored_address().clone(),
            Some(external_address()),
            recorder.clone(),
        ));
        let pipeline = ForwardingPipeline::new(
            config,
            ledger.clone(),
            Arc::new(MockSigner::default()),
            verifier,
            recorder.clone(),
            RetryPolicy::immediate(3),
        );

        let err = pipeline.run(50).await.unwrap_err();

        assert!(matches!(err, PipelineError::NotConfigured));
        assert_eq!(ledger.builds(), 0);
        assert_eq!(pipeline.current_run(), None);
        assert_eq!(recorder.list()[0].level, LogLevel::Error);
    }
}
