use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StepKind {
    Detect,
    Create,
    SignLocal,
    SignExternal,
    Validate,
    Broadcast,
    Confirm,
}

impl StepKind {
    pub const ALL: [StepKind; 7] = [
        StepKind::Detect,
        StepKind::Create,
        StepKind::SignLocal,
        StepKind::SignExternal,
        StepKind::Validate,
        StepKind::Broadcast,
        StepKind::Confirm,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Steps covered by a single attempt (everything after detection).
    pub fn is_attempt_step(self) -> bool {
        self != StepKind::Detect
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Active,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingStep {
    pub kind: StepKind,
    pub status: StepStatus,
    pub timestamp: Option<DateTime<Utc>>,
    pub detail: Option<String>,
}

impl ForwardingStep {
    fn pending(kind: StepKind) -> Self {
        Self {
            kind,
            status: StepStatus::Pending,
            timestamp: None,
            detail: None,
        }
    }

    fn set(&mut self, status: StepStatus, detail: Option<String>) {
        self.status = status;
        self.timestamp = Some(Utc::now());
        if detail.is_some() {
            self.detail = detail;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Active,
    Completed,
    /// Ended without building a transaction (nothing left after the fee reserve).
    Skipped,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Active)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunTransitionError {
    #[error("run already finished as {0:?}")]
    Terminal(RunStatus),
    #[error("step {step} cannot start before {blocked_by} completes")]
    OutOfOrder { step: StepKind, blocked_by: StepKind },
    #[error("step {step} is {status:?}, expected {expected:?}")]
    WrongStatus {
        step: StepKind,
        status: StepStatus,
        expected: StepStatus,
    },
    #[error("run cannot complete while {0} is unfinished")]
    Incomplete(StepKind),
}

/// Lifecycle of one detected deposit.
///
/// Steps only advance in [`StepKind::ALL`] order. A retry resets every
/// attempt step back to pending while keeping the detection step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingRun {
    pub id: u64,
    pub detected_amount: u64,
    pub attempt: u32,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub forward_amount: Option<u64>,
    pub tx_id: Option<String>,
    pub network_fee: Option<u64>,
    steps: Vec<ForwardingStep>,
}

impl ForwardingRun {
    pub fn new(id: u64, detected_amount: u64) -> Self {
        Self {
            id,
            detected_amount,
            attempt: 0,
            status: RunStatus::Active,
            started_at: Utc::now(),
            finished_at: None,
            forward_amount: None,
            tx_id: None,
            network_fee: None,
            steps: StepKind::ALL.iter().copied().map(ForwardingStep::pending).collect(),
        }
    }

    pub fn steps(&self) -> &[ForwardingStep] {
        &self.steps
    }

    pub fn step(&self, kind: StepKind) -> &ForwardingStep {
        &self.steps[kind.index()]
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn begin(&mut self, kind: StepKind) -> Result<(), RunTransitionError> {
        self.ensure_active()?;
        if let Some(blocked_by) = self.steps[..kind.index()]
            .iter()
            .find(|step| step.status != StepStatus::Completed)
        {
            return Err(RunTransitionError::OutOfOrder {
                step: kind,
                blocked_by: blocked_by.kind,
            });
        }
        self.expect_status(kind, StepStatus::Pending)?;
        self.steps[kind.index()].set(StepStatus::Active, None);
        Ok(())
    }

    pub fn complete(
        &mut self,
        kind: StepKind,
        detail: Option<String>,
    ) -> Result<(), RunTransitionError> {
        self.ensure_active()?;
        self.expect_status(kind, StepStatus::Active)?;
        self.steps[kind.index()].set(StepStatus::Completed, detail);
        Ok(())
    }

    pub fn fail(&mut self, kind: StepKind, detail: impl Into<String>) -> Result<(), RunTransitionError> {
        self.ensure_active()?;
        self.expect_status(kind, StepStatus::Active)?;
        self.steps[kind.index()].set(StepStatus::Error, Some(detail.into()));
        Ok(())
    }

    /// Opens the next attempt, returning its 1-based number.
    pub fn start_attempt(&mut self) -> Result<u32, RunTransitionError> {
        self.ensure_active()?;
        for step in self.steps.iter_mut().filter(|step| step.kind.is_attempt_step()) {
            *step = ForwardingStep::pending(step.kind);
        }
        self.attempt += 1;
        Ok(self.attempt)
    }

    pub fn finish(&mut self, status: RunStatus) -> Result<(), RunTransitionError> {
        self.ensure_active()?;
        if status == RunStatus::Completed {
            if let Some(step) = self
                .steps
                .iter()
                .find(|step| step.status != StepStatus::Completed)
            {
                return Err(RunTransitionError::Incomplete(step.kind));
            }
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), RunTransitionError> {
        if self.status.is_terminal() {
            return Err(RunTransitionError::Terminal(self.status));
        }
        Ok(())
    }

    fn expect_status(&self, kind: StepKind, expected: StepStatus) -> Result<(), RunTransitionError> {
        let status = self.steps[kind.index()].status;
        if status != expected {
            return Err(RunTransitionError::WrongStatus {
                step: kind,
                status,
                expected,
            });
        }
        Ok(())
    }
}
