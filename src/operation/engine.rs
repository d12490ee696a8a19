//! Attempt/Error state machine with operator-directed recovery.
//!
//! An operation is an ordered list of steps. Each step is attempted; on
//! failure the operation enters that step's error state and asks the
//! operator how to proceed. Retry re-enters the attempt, Ignore moves on as
//! if the step succeeded, and Abort ends the operation.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::step::Step;
use crate::error::{PlateschedError, Result};
use crate::operator::{ABORT, ErrorChannel, ErrorReport, IGNORE, RETRY};

/// Where the operation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationState {
    Idle,
    Attempt(usize),
    Error(usize),
    Done,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Attempt(i) => write!(f, "Attempt({})", i),
            Self::Error(i) => write!(f, "Error({})", i),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// What moves the operation between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Success,
    Failure,
    Retry,
    Ignore,
    Abort,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: OperationState,
    pub trigger: Trigger,
    pub to: OperationState,
    pub at: DateTime<Utc>,
}

/// How an operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Completed,
    /// Finished, but these steps were skipped by Ignore.
    CompletedWithIgnored(Vec<usize>),
    /// Aborted at this step.
    Aborted { at: usize },
}

/// Options offered to the operator when a step fails, and their labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPolicy {
    pub allow_ignore: bool,
    pub allow_abort: bool,
    pub retry_label: String,
    pub ignore_label: String,
    pub abort_label: String,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            allow_ignore: false,
            allow_abort: true,
            retry_label: RETRY.to_string(),
            ignore_label: IGNORE.to_string(),
            abort_label: ABORT.to_string(),
        }
    }
}

impl RecoveryPolicy {
    /// Retry only.
    pub fn retry_only() -> Self {
        Self {
            allow_abort: false,
            ..Self::default()
        }
    }

    /// Retry, Ignore and Abort.
    pub fn permissive() -> Self {
        Self {
            allow_ignore: true,
            ..Self::default()
        }
    }

    /// Labels used by robot moves.
    pub fn for_moves(allow_ignore: bool, allow_abort: bool) -> Self {
        Self {
            allow_ignore,
            allow_abort,
            retry_label: "Try move again".to_string(),
            ignore_label: "Skip to next move".to_string(),
            abort_label: ABORT.to_string(),
        }
    }

    /// Labels offered, in order: retry, then ignore and abort if allowed.
    pub fn options(&self) -> Vec<String> {
        let mut options = vec![self.retry_label.clone()];
        if self.allow_ignore {
            options.push(self.ignore_label.clone());
        }
        if self.allow_abort {
            options.push(self.abort_label.clone());
        }
        options
    }

    /// Map a chosen label back to its trigger.
    pub fn trigger_for(&self, label: &str) -> Option<Trigger> {
        if label == self.retry_label {
            Some(Trigger::Retry)
        } else if self.allow_ignore && label == self.ignore_label {
            Some(Trigger::Ignore)
        } else if self.allow_abort && label == self.abort_label {
            Some(Trigger::Abort)
        } else {
            None
        }
    }
}

struct OperationStep<C> {
    step: Box<dyn Step<C>>,
    policy: RecoveryPolicy,
}

/// A sequence of steps driven through Attempt/Error states.
pub struct RecoverableOperation<C> {
    name: String,
    steps: Vec<OperationStep<C>>,
    errors: Arc<dyn ErrorChannel>,
    cancel: CancellationToken,
    state: watch::Sender<OperationState>,
    history: Vec<Transition>,
    last_error: Option<String>,
}

impl<C: Send + Sync> RecoverableOperation<C> {
    pub fn new(name: impl Into<String>, errors: Arc<dyn ErrorChannel>) -> Self {
        let (state, _) = watch::channel(OperationState::Idle);
        Self {
            name: name.into(),
            steps: Vec::new(),
            errors,
            cancel: CancellationToken::new(),
            state,
            history: Vec::new(),
            last_error: None,
        }
    }

    /// Append a step with its recovery policy.
    pub fn with_step(mut self, step: impl Step<C> + 'static, policy: RecoveryPolicy) -> Self {
        self.steps.push(OperationStep {
            step: Box::new(step),
            policy,
        });
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> OperationState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<OperationState> {
        self.state.subscribe()
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Message of the most recent step failure.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn after(&self, step: usize) -> OperationState {
        if step + 1 < self.steps.len() {
            OperationState::Attempt(step + 1)
        } else {
            OperationState::Done
        }
    }

    fn next_state(&self, trigger: Trigger) -> Option<OperationState> {
        use OperationState::*;
        match (self.state(), trigger) {
            (Done, _) => None,
            (_, Trigger::Abort) => Some(Done),
            (Idle, Trigger::Success) if self.steps.is_empty() => Some(Done),
            (Idle, Trigger::Success) => Some(Attempt(0)),
            (Attempt(i), Trigger::Success) => Some(self.after(i)),
            (Attempt(i), Trigger::Failure) => Some(Error(i)),
            (Error(i), Trigger::Retry) => Some(Attempt(i)),
            (Error(i), Trigger::Ignore) if self.steps[i].policy.allow_ignore => Some(self.after(i)),
            _ => None,
        }
    }

    /// Apply a trigger. Abort is accepted from every state but Done; other
    /// triggers only where the state table allows them.
    pub fn fire(&mut self, trigger: Trigger) -> Result<OperationState> {
        let from = self.state();
        let to = self.next_state(trigger).ok_or_else(|| PlateschedError::InvalidTransition {
            state: from.to_string(),
            trigger: trigger.to_string(),
        })?;
        tracing::debug!(operation = %self.name, from = %from, trigger = %trigger, to = %to, "Leaving state");
        self.history.push(Transition {
            from,
            trigger,
            to,
            at: Utc::now(),
        });
        self.state.send_replace(to);
        Ok(to)
    }

    /// Drive the operation from Idle to Done.
    pub async fn run(&mut self, ctx: &C) -> Result<OperationOutcome> {
        if self.state() != OperationState::Idle {
            return Err(PlateschedError::InvalidTransition {
                state: self.state().to_string(),
                trigger: "run".to_string(),
            });
        }
        tracing::info!(operation = %self.name, steps = self.steps.len(), "Starting operation");

        let mut ignored = Vec::new();
        let mut aborted_at = None;
        if self.cancel.is_cancelled() {
            aborted_at = Some(0);
            self.fire(Trigger::Abort)?;
        } else {
            self.fire(Trigger::Success)?;
        }

        loop {
            match self.state() {
                OperationState::Done => break,
                OperationState::Idle => {
                    self.fire(Trigger::Success)?;
                }
                OperationState::Attempt(i) => {
                    let trigger = self.attempt(i, ctx).await;
                    if trigger == Trigger::Abort {
                        aborted_at = Some(i);
                    }
                    self.fire(trigger)?;
                }
                OperationState::Error(i) => {
                    let trigger = self.recover(i).await;
                    match trigger {
                        Trigger::Ignore => ignored.push(i),
                        Trigger::Abort => aborted_at = Some(i),
                        _ => {}
                    }
                    self.fire(trigger)?;
                }
            }
        }

        let outcome = match aborted_at {
            Some(at) => OperationOutcome::Aborted { at },
            None if ignored.is_empty() => OperationOutcome::Completed,
            None => OperationOutcome::CompletedWithIgnored(ignored),
        };
        tracing::info!(operation = %self.name, outcome = ?outcome, "Operation finished");
        Ok(outcome)
    }

    async fn attempt(&mut self, i: usize, ctx: &C) -> Trigger {
        let step = &self.steps[i].step;
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = step.execute(ctx) => Some(result),
        };
        match result {
            None => Trigger::Abort,
            Some(Ok(())) => Trigger::Success,
            Some(Err(e)) => {
                tracing::warn!(operation = %self.name, step = self.steps[i].step.name(), error = %e, "Step failed");
                self.last_error = Some(e.to_string());
                Trigger::Failure
            }
        }
    }

    async fn recover(&self, i: usize) -> Trigger {
        let OperationStep { step, policy } = &self.steps[i];
        let message = format!(
            "{}: {} failed: {}",
            self.name,
            step.name(),
            self.last_error.as_deref().unwrap_or("unknown error")
        );
        let report = ErrorReport::new(message, policy.options()).with_details(format!("step {}", i + 1));
        let choice = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            choice = self.errors.add_error(report) => choice,
        };
        // A closed channel or a cancellation means nobody can decide.
        choice.and_then(|c| policy.trigger_for(&c)).unwrap_or(Trigger::Abort)
    }
}

impl<C> fmt::Debug for RecoverableOperation<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoverableOperation")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .field("state", &*self.state.borrow())
            .finish()
    }
}
