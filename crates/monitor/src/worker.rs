use std::sync::Arc;

use metrics::{counter, gauge};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use forwarder_domain::{
    config::{ConfigError, ForwardingConfig},
    model::{BalanceObservation, ForwardingRun, LogLevel, NewLogEntry},
    services::telemetry::TelemetryError,
    ActivityRecorder, ExternalSigner, LedgerClient, LedgerError, LedgerResult, SignerError,
};

use crate::{
    detector::{BalanceDelta, DeltaDetector},
    pipeline::{ForwardingPipeline, PipelineError, RetryPolicy},
    rpc::TronHttpLedger,
    signer::TimedSigner,
    verifier::MultisigVerifier,
};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("signer error: {0}")]
    Signer(#[from] SignerError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mutable monitoring state. Every read-modify-write happens under one lock
/// so detection and dispatch decisions are serialized.
#[derive(Debug, Default)]
struct MonitorState {
    detector: DeltaDetector,
    run_in_progress: bool,
    /// Deposits seen while a run was active, forwarded as one run afterwards.
    pending: Option<u64>,
}

struct Poller {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct MonitorInner {
    config: Arc<ForwardingConfig>,
    ledger: Arc<dyn LedgerClient>,
    verifier: Arc<MultisigVerifier>,
    pipeline: Arc<ForwardingPipeline>,
    recorder: ActivityRecorder,
    state: Mutex<MonitorState>,
    poller: Mutex<Option<Poller>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonitorSnapshot {
    pub running: bool,
    pub run_in_progress: bool,
    pub baseline: Option<u64>,
    pub pending_deposit: Option<u64>,
}

/// Owns the balance poller and dispatches forwarding runs, one at a time.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

impl Monitor {
    pub fn new(
        config: Arc<ForwardingConfig>,
        ledger: Arc<dyn LedgerClient>,
        signer: Arc<dyn ExternalSigner>,
        recorder: ActivityRecorder,
        policy: RetryPolicy,
    ) -> Self {
        let verifier = Arc::new(MultisigVerifier::new(
            ledger.clone(),
            config.monitored_address().clone(),
            config.signer().address.clone(),
            recorder.clone(),
        ));
        let pipeline = Arc::new(ForwardingPipeline::new(
            config.clone(),
            ledger.clone(),
            signer,
            verifier.clone(),
            recorder.clone(),
            policy,
        ));
        Self {
            inner: Arc::new(MonitorInner {
                config,
                ledger,
                verifier,
                pipeline,
                recorder,
                state: Mutex::new(MonitorState::default()),
                poller: Mutex::new(None),
            }),
        }
    }

    pub fn recorder(&self) -> &ActivityRecorder {
        &self.inner.recorder
    }

    pub fn verifier(&self) -> &Arc<MultisigVerifier> {
        &self.inner.verifier
    }

    pub fn config(&self) -> &ForwardingConfig {
        &self.inner.config
    }

    /// Starts polling. Returns `false` when the poller was already running.
    /// The balance baseline is reset, so the first reading never forwards.
    pub async fn start(&self) -> bool {
        if self.is_running().await {
            return false;
        }
        // Runs outside the poller lock. Failures are logged by the verifier;
        // the pipeline retries the check before its first run.
        if self.inner.verifier.status().is_none() {
            let _ = self.inner.verifier.verify().await;
        }

        let mut poller = self.inner.poller.lock().await;
        if poller.as_ref().is_some_and(|p| !p.task.is_finished()) {
            return false;
        }
        self.inner.state.lock().await.detector.reset();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(self.inner.clone(), cancel.clone()));
        *poller = Some(Poller { cancel, task });

        self.inner.recorder.append(
            NewLogEntry::new(LogLevel::Info, "balance monitoring started")
                .with_detail("address", self.inner.config.monitored_address().as_str())
                .with_detail(
                    "poll_interval_ms",
                    self.inner.config.poll_interval().as_millis() as u64,
                ),
        );
        true
    }

    /// Stops polling and waits for the poll task to exit; no balance query is
    /// issued after this returns. In-flight runs keep going.
    pub async fn stop(&self) -> bool {
        let Some(poller) = self.inner.poller.lock().await.take() else {
            return false;
        };
        poller.cancel.cancel();
        if let Err(err) = poller.task.await {
            warn!(?err, "poll task ended abnormally");
        }
        self.inner
            .recorder
            .record(LogLevel::Info, "balance monitoring stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.inner
            .poller
            .lock()
            .await
            .as_ref()
            .is_some_and(|p| !p.task.is_finished())
    }

    pub async fn snapshot(&self) -> MonitorSnapshot {
        let running = self.is_running().await;
        let state = self.inner.state.lock().await;
        MonitorSnapshot {
            running,
            run_in_progress: state.run_in_progress,
            baseline: state.detector.baseline(),
            pending_deposit: state.pending,
        }
    }

    pub fn current_run(&self) -> Option<ForwardingRun> {
        self.inner.pipeline.current_run()
    }

    pub fn subscribe_runs(&self) -> watch::Receiver<Option<ForwardingRun>> {
        self.inner.pipeline.subscribe()
    }
}

async fn poll_loop(inner: Arc<MonitorInner>, cancel: CancellationToken) {
    let mut ticker = interval(inner.config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = inner.ledger.get_balance(inner.config.monitored_address()) => result,
        };
        inner.handle_balance(result).await;
    }
    debug!("poll loop exited");
}

impl MonitorInner {
    async fn handle_balance(self: &Arc<Self>, result: LedgerResult<u64>) {
        let observation = match result {
            Ok(amount) => BalanceObservation::now(amount),
            Err(err) => {
                counter!("monitor_balance_polls_total", "result" => "error").increment(1);
                self.recorder.append(
                    NewLogEntry::new(LogLevel::Error, format!("balance query failed: {err}"))
                        .with_detail("address", self.config.monitored_address().as_str()),
                );
                return;
            }
        };
        counter!("monitor_balance_polls_total", "result" => "ok").increment(1);
        gauge!("monitor_balance_sun").set(observation.amount as f64);

        let mut state = self.state.lock().await;
        let delta = state.detector.observe(observation.amount);
        match delta {
            BalanceDelta::Unchanged => {
                debug!(balance = observation.amount, "balance unchanged");
            }
            BalanceDelta::Initial(amount) => {
                self.recorder.append(
                    NewLogEntry::new(LogLevel::Balance, format!("baseline balance {amount} SUN"))
                        .with_detail("observed_at", observation.observed_at.to_rfc3339()),
                );
            }
            BalanceDelta::Decrease(amount) => {
                self.recorder.append(
                    NewLogEntry::new(
                        LogLevel::Balance,
                        format!("balance decreased by {amount} SUN"),
                    )
                    .with_detail("balance", observation.amount),
                );
            }
            BalanceDelta::Increase(amount) => {
                self.recorder.append(
                    NewLogEntry::new(
                        LogLevel::Detection,
                        format!("incoming deposit of {amount} SUN detected"),
                    )
                    .with_detail("balance", observation.amount),
                );
                if state.run_in_progress {
                    let pending = state.pending.unwrap_or(0).saturating_add(amount);
                    state.pending = Some(pending);
                    self.recorder.append(
                        NewLogEntry::new(
                            LogLevel::Info,
                            "forwarding run in progress; deposit deferred",
                        )
                        .with_detail("pending", pending),
                    );
                } else {
                    state.run_in_progress = true;
                    drop(state);
                    self.dispatch(amount);
                }
            }
        }
    }

    /// Runs the pipeline on its own task, then drains the deferred slot
    /// before clearing the in-progress flag.
    fn dispatch(self: &Arc<Self>, amount: u64) {
        let inner = self.clone();
        tokio::spawn(async move {
            let mut amount = amount;
            loop {
                match inner.pipeline.run(amount).await {
                    Ok(run) => debug!(run = run.id, status = run.status.as_ref(), "run finished"),
                    Err(PipelineError::NotConfigured) => {}
                    Err(err) => {
                        inner
                            .recorder
                            .record(LogLevel::Error, format!("forwarding run aborted: {err}"));
                    }
                }

                let mut state = inner.state.lock().await;
                match state.pending.take() {
                    Some(next) => {
                        drop(state);
                        inner.recorder.append(
                            NewLogEntry::new(LogLevel::Info, "dispatching deferred deposit")
                                .with_detail("amount", next),
                        );
                        amount = next;
                    }
                    None => {
                        state.run_in_progress = false;
                        break;
                    }
                }
            }
        });
    }
}

/// Production wiring: HTTP ledger, HTTP co-signer behind its timeout
/// policy, monitoring until ctrl-c.
pub async fn run_monitor(config: ForwardingConfig) -> Result<(), MonitorError> {
    let config = Arc::new(config);
    let monitor = build_monitor(config, ActivityRecorder::new())?;
    monitor.start().await;
    tokio::signal::ctrl_c().await?;
    monitor.stop().await;
    Ok(())
}

pub fn build_monitor(
    config: Arc<ForwardingConfig>,
    recorder: ActivityRecorder,
) -> Result<Monitor, MonitorError> {
    let ledger = Arc::new(TronHttpLedger::from_config(&config)?);
    let signer = Arc::new(TimedSigner::from_settings(config.signer())?);
    Ok(Monitor::new(
        config,
        ledger,
        signer,
        recorder,
        RetryPolicy::default(),
    ))
}
